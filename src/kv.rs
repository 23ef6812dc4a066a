//! Versioned key-value store (C1, SPEC_FULL.md §5): an LMDB-backed map of
//! raw byte keys to raw byte values, plus an undo log keyed by version tag
//! that lets any of the last `keep_versions` commits be undone in order.
//!
//! Modelled on the donor's `ZionStorage`: one `heed::Env`, one write
//! transaction per commit, undo records captured *before* the mutation so
//! rollback is a pure replay of prior values.

use crate::error::{CoreError, CoreResult};
use heed::types::{Bytes, SerdeBincode};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One key's value immediately before a version's commit touched it.
/// `None` means the key did not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UndoEntry {
    changes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Meta {
    /// Committed version tags, oldest first.
    order: Vec<Vec<u8>>,
}

const META_KEY: &[u8] = b"meta";

#[derive(Clone)]
pub struct KvStore {
    env: Env,
    data: Database<Bytes, Bytes>,
    undo: Database<Bytes, SerdeBincode<UndoEntry>>,
    meta: Database<Bytes, SerdeBincode<Meta>>,
    keep_versions: usize,
}

impl KvStore {
    pub fn open(path: &Path, map_size_gb: u64, keep_versions: usize) -> CoreResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| CoreError::storage(e.to_string()))?;
        let map_size_bytes = (map_size_gb as usize) * 1024 * 1024 * 1024;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_bytes)
                .max_dbs(3)
                .open(path)
                .map_err(|e| CoreError::storage(e.to_string()))?
        };

        let mut wtxn = env.write_txn().map_err(|e| CoreError::storage(e.to_string()))?;
        let data = env
            .create_database(&mut wtxn, Some("data"))
            .map_err(|e| CoreError::storage(e.to_string()))?;
        let undo = env
            .create_database(&mut wtxn, Some("undo"))
            .map_err(|e| CoreError::storage(e.to_string()))?;
        let meta = env
            .create_database(&mut wtxn, Some("meta"))
            .map_err(|e| CoreError::storage(e.to_string()))?;
        wtxn.commit().map_err(|e| CoreError::storage(e.to_string()))?;

        Ok(KvStore {
            env,
            data,
            undo,
            meta,
            keep_versions,
        })
    }

    fn read_meta(&self, rtxn: &heed::RoTxn) -> CoreResult<Meta> {
        Ok(self
            .meta
            .get(rtxn, META_KEY)
            .map_err(|e| CoreError::storage(e.to_string()))?
            .unwrap_or_default())
    }

    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(|e| CoreError::storage(e.to_string()))?;
        Ok(self
            .data
            .get(&rtxn, key)
            .map_err(|e| CoreError::storage(e.to_string()))?
            .map(|v| v.to_vec()))
    }

    pub fn last_version_id(&self) -> CoreResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(|e| CoreError::storage(e.to_string()))?;
        let meta = self.read_meta(&rtxn)?;
        Ok(meta.order.last().cloned())
    }

    pub fn rollback_versions(&self) -> CoreResult<Vec<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(|e| CoreError::storage(e.to_string()))?;
        Ok(self.read_meta(&rtxn)?.order)
    }

    /// Atomically apply `to_insert` and `to_remove` under a new version tag,
    /// recording the prior value of every touched key so the version can
    /// later be undone.
    pub fn bulk_insert(
        &self,
        version_tag: &[u8],
        to_insert: &[(Vec<u8>, Vec<u8>)],
        to_remove: &[Vec<u8>],
    ) -> CoreResult<()> {
        let mut wtxn = self.env.write_txn().map_err(|e| CoreError::storage(e.to_string()))?;
        let mut meta = self.read_meta(&wtxn)?;

        let mut changes = Vec::with_capacity(to_insert.len() + to_remove.len());
        for key in to_remove {
            let prior = self
                .data
                .get(&wtxn, key)
                .map_err(|e| CoreError::storage(e.to_string()))?
                .map(|v| v.to_vec());
            changes.push((key.clone(), prior));
            self.data.delete(&mut wtxn, key).map_err(|e| CoreError::storage(e.to_string()))?;
        }
        for (key, value) in to_insert {
            let prior = self
                .data
                .get(&wtxn, key)
                .map_err(|e| CoreError::storage(e.to_string()))?
                .map(|v| v.to_vec());
            changes.push((key.clone(), prior));
            self.data
                .put(&mut wtxn, key, value)
                .map_err(|e| CoreError::storage(e.to_string()))?;
        }

        self.undo
            .put(&mut wtxn, version_tag, &UndoEntry { changes })
            .map_err(|e| CoreError::storage(e.to_string()))?;
        meta.order.push(version_tag.to_vec());

        while meta.order.len() > self.keep_versions {
            let dropped = meta.order.remove(0);
            self.undo
                .delete(&mut wtxn, &dropped)
                .map_err(|e| CoreError::storage(e.to_string()))?;
        }

        self.meta
            .put(&mut wtxn, META_KEY, &meta)
            .map_err(|e| CoreError::storage(e.to_string()))?;
        wtxn.commit().map_err(|e| CoreError::storage(e.to_string()))?;
        Ok(())
    }

    /// Undo every committed version strictly newer than `version_tag`,
    /// leaving `version_tag`'s own effects in place. `version_tag` must be
    /// one of the tags still covered by the retained undo log.
    pub fn rollback(&self, version_tag: &[u8]) -> CoreResult<()> {
        let mut wtxn = self.env.write_txn().map_err(|e| CoreError::storage(e.to_string()))?;
        let mut meta = self.read_meta(&wtxn)?;

        let pos = meta
            .order
            .iter()
            .position(|v| v.as_slice() == version_tag)
            .ok_or_else(|| CoreError::storage("rollback target is not a known retained version"))?;

        let to_undo: Vec<Vec<u8>> = meta.order[pos + 1..].to_vec();
        for version in to_undo.iter().rev() {
            let entry = self
                .undo
                .get(&wtxn, version)
                .map_err(|e| CoreError::storage(e.to_string()))?
                .ok_or_else(|| CoreError::storage("undo log missing for a version pending rollback"))?;
            for (key, prior) in entry.changes.iter().rev() {
                match prior {
                    Some(value) => {
                        self.data
                            .put(&mut wtxn, key, value)
                            .map_err(|e| CoreError::storage(e.to_string()))?;
                    }
                    None => {
                        self.data
                            .delete(&mut wtxn, key)
                            .map_err(|e| CoreError::storage(e.to_string()))?;
                    }
                }
            }
            self.undo.delete(&mut wtxn, version).map_err(|e| CoreError::storage(e.to_string()))?;
        }

        meta.order.truncate(pos + 1);
        self.meta
            .put(&mut wtxn, META_KEY, &meta)
            .map_err(|e| CoreError::storage(e.to_string()))?;
        wtxn.commit().map_err(|e| CoreError::storage(e.to_string()))?;
        Ok(())
    }

    /// Drop undo-log retention down to `keep`, freeing storage for versions
    /// that will never be rolled back to. Does not touch current data.
    pub fn clean(&self, keep: usize) -> CoreResult<()> {
        let mut wtxn = self.env.write_txn().map_err(|e| CoreError::storage(e.to_string()))?;
        let mut meta = self.read_meta(&wtxn)?;
        while meta.order.len() > keep {
            let dropped = meta.order.remove(0);
            self.undo.delete(&mut wtxn, &dropped).map_err(|e| CoreError::storage(e.to_string()))?;
        }
        self.meta
            .put(&mut wtxn, META_KEY, &meta)
            .map_err(|e| CoreError::storage(e.to_string()))?;
        wtxn.commit().map_err(|e| CoreError::storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, KvStore) {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), 1, 10).unwrap();
        (dir, store)
    }

    #[test]
    fn bulk_insert_then_get() {
        let (_dir, store) = open_store();
        store.bulk_insert(b"v1", &[(b"k".to_vec(), b"v".to_vec())], &[]).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.last_version_id().unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn rollback_preserves_target_version_effects() {
        let (_dir, store) = open_store();
        store.bulk_insert(b"v1", &[(b"k".to_vec(), b"a".to_vec())], &[]).unwrap();
        store.bulk_insert(b"v2", &[(b"k".to_vec(), b"b".to_vec())], &[]).unwrap();
        store.bulk_insert(b"v3", &[(b"k".to_vec(), b"c".to_vec())], &[]).unwrap();

        store.rollback(b"v1").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.last_version_id().unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn rollback_is_idempotent_to_the_same_target() {
        let (_dir, store) = open_store();
        store.bulk_insert(b"v1", &[(b"k".to_vec(), b"a".to_vec())], &[]).unwrap();
        store.bulk_insert(b"v2", &[(b"k".to_vec(), b"b".to_vec())], &[]).unwrap();
        store.rollback(b"v1").unwrap();
        let after_first = store.get(b"k").unwrap();

        store.bulk_insert(b"v2b", &[(b"k".to_vec(), b"b2".to_vec())], &[]).unwrap();
        store.rollback(b"v1").unwrap();
        let after_second = store.get(b"k").unwrap();

        assert_eq!(after_first, after_second);
    }

    #[test]
    fn rollback_restores_removed_keys() {
        let (_dir, store) = open_store();
        store.bulk_insert(b"v1", &[(b"k".to_vec(), b"a".to_vec())], &[]).unwrap();
        store.bulk_insert(b"v2", &[], &[b"k".to_vec()]).unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        store.rollback(b"v1").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn rollback_to_unknown_version_errors() {
        let (_dir, store) = open_store();
        store.bulk_insert(b"v1", &[(b"k".to_vec(), b"a".to_vec())], &[]).unwrap();
        assert!(store.rollback(b"nonexistent").is_err());
    }

    #[test]
    fn clean_drops_old_undo_logs_without_touching_data() {
        let (_dir, store) = open_store();
        store.bulk_insert(b"v1", &[(b"k".to_vec(), b"a".to_vec())], &[]).unwrap();
        store.bulk_insert(b"v2", &[(b"k".to_vec(), b"b".to_vec())], &[]).unwrap();
        store.clean(1).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.rollback_versions().unwrap(), vec![b"v2".to_vec()]);
    }
}
