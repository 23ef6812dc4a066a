//! Authenticated state prover (C2, SPEC_FULL.md §5): wraps the AVL+ tree in
//! [`tree`] with a pending-operation log, and delegates durability and
//! rollback to the versioned key-value store (C1, [`crate::kv`]).
//!
//! Every committed digest doubles as a kv version tag, so C2's own rollback
//! is nothing more than handing the target digest to `KvStore::rollback` —
//! no separate undo mechanism is needed here.

pub mod tree;

use crate::error::{CoreError, CoreResult};
use crate::ids::{BoxId, StateDigest};
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tree::AvlTree;

const SNAPSHOT_KEY: &[u8] = b"__prover_snapshot__";

#[derive(Clone, Debug)]
enum PendingOp {
    Insert(BoxId, Vec<u8>),
    Remove(BoxId),
}

#[derive(Serialize, Deserialize)]
struct TreeSnapshot {
    entries: Vec<(BoxId, Vec<u8>)>,
}

pub struct Prover {
    kv: Arc<KvStore>,
    tree: AvlTree,
    pending: Vec<PendingOp>,
}

impl Prover {
    pub fn open(kv: Arc<KvStore>) -> CoreResult<Self> {
        let tree = match kv.get(SNAPSHOT_KEY)? {
            Some(bytes) => Self::tree_from_snapshot(&bytes)?,
            None => AvlTree::new(),
        };

        if kv.last_version_id()?.is_none() {
            // Seed the empty tree as version zero so later rollbacks always
            // have a known version to land on, even before the first block.
            let snapshot = Self::snapshot_bytes(&tree)?;
            kv.bulk_insert(
                StateDigest::empty().as_bytes(),
                &[(SNAPSHOT_KEY.to_vec(), snapshot)],
                &[],
            )?;
        }

        Ok(Prover {
            kv,
            tree,
            pending: Vec::new(),
        })
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    pub fn digest(&self) -> StateDigest {
        self.tree.digest()
    }

    pub fn unauthenticated_lookup(&self, id: &BoxId) -> Option<Vec<u8>> {
        self.tree.get(id).map(|v| v.to_vec())
    }

    pub fn perform_insert(&mut self, id: BoxId, value: Vec<u8>) -> CoreResult<()> {
        if !self.tree.insert(id, value.clone()) {
            return Err(CoreError::StateInvalid {
                id: crate::ids::ModifierId(id.0),
                message: "box id already present in authenticated state".into(),
            });
        }
        self.pending.push(PendingOp::Insert(id, value));
        Ok(())
    }

    pub fn perform_remove(&mut self, id: BoxId) -> CoreResult<()> {
        if self.tree.remove(&id).is_none() {
            return Err(CoreError::StateInvalid {
                id: crate::ids::ModifierId(id.0),
                message: "box id absent from authenticated state".into(),
            });
        }
        self.pending.push(PendingOp::Remove(id));
        Ok(())
    }

    pub fn has_pending_ops(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Serializes the pending operation log without committing it — the
    /// byte string whose blake3 digest a header's `ad_proofs_root` must
    /// match.
    pub fn serialize_pending_proof(&self) -> Vec<u8> {
        bincode::serialize(&self.pending.iter().map(PendingOpBytes::from).collect::<Vec<_>>())
            .expect("pending op log is always serializable")
    }

    /// Commits the pending operation log: persists the new tree snapshot
    /// plus any extra metadata key-value pairs under the tree's new digest
    /// as the kv version tag, and clears the pending log.
    pub fn generate_proof_and_update_storage(
        &mut self,
        extra_metadata: &[(Vec<u8>, Vec<u8>)],
    ) -> CoreResult<(Vec<u8>, StateDigest)> {
        let proof = self.serialize_pending_proof();
        let digest = self.digest();
        let snapshot = Self::snapshot_bytes(&self.tree)?;

        let mut to_insert = extra_metadata.to_vec();
        to_insert.push((SNAPSHOT_KEY.to_vec(), snapshot));
        self.kv.bulk_insert(digest.as_bytes(), &to_insert, &[])?;

        self.pending.clear();
        Ok((proof, digest))
    }

    /// Rolls the tree (and the underlying kv store) back to a previously
    /// committed digest, discarding everything committed after it.
    pub fn rollback(&mut self, digest: StateDigest) -> CoreResult<()> {
        self.kv.rollback(digest.as_bytes())?;
        let bytes = self
            .kv
            .get(SNAPSHOT_KEY)?
            .ok_or_else(|| CoreError::storage("snapshot missing after rollback"))?;
        self.tree = Self::tree_from_snapshot(&bytes)?;
        self.pending.clear();
        Ok(())
    }

    /// Runs `f` against a disposable copy of the tree and pending log,
    /// restoring both afterward regardless of what `f` did. Used for
    /// proof-of-concept application (C3's `proofs_for_transactions`) where
    /// the digest must not move.
    pub fn run_speculative<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved_tree = self.tree.clone();
        let saved_pending = self.pending.clone();
        let result = f(self);
        self.tree = saved_tree;
        self.pending = saved_pending;
        result
    }

    fn snapshot_bytes(tree: &AvlTree) -> CoreResult<Vec<u8>> {
        // A full key/value walk is adequate at the scale this crate targets;
        // larger deployments would persist the tree structurally instead.
        let entries = tree.entries();
        bincode::serialize(&TreeSnapshot { entries }).map_err(|e| CoreError::storage(e.to_string()))
    }

    fn tree_from_snapshot(bytes: &[u8]) -> CoreResult<AvlTree> {
        let snapshot: TreeSnapshot =
            bincode::deserialize(bytes).map_err(|e| CoreError::storage(e.to_string()))?;
        let mut tree = AvlTree::new();
        for (key, value) in snapshot.entries {
            tree.insert(key, value);
        }
        Ok(tree)
    }
}

#[derive(Serialize, Deserialize)]
enum PendingOpBytes {
    Insert(BoxId, Vec<u8>),
    Remove(BoxId),
}

impl From<&PendingOp> for PendingOpBytes {
    fn from(op: &PendingOp) -> Self {
        match op {
            PendingOp::Insert(id, value) => PendingOpBytes::Insert(*id, value.clone()),
            PendingOp::Remove(id) => PendingOpBytes::Remove(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_prover() -> (tempfile::TempDir, Prover) {
        let dir = tempdir().unwrap();
        let kv = Arc::new(KvStore::open(dir.path(), 1, 10).unwrap());
        let prover = Prover::open(kv).unwrap();
        (dir, prover)
    }

    #[test]
    fn insert_changes_digest_and_commit_persists_it() {
        let (_dir, mut prover) = open_prover();
        let before = prover.digest();
        prover.perform_insert(BoxId([1; 32]), vec![1, 2, 3]).unwrap();
        assert_ne!(prover.digest(), before);
        let (_, digest) = prover.generate_proof_and_update_storage(&[]).unwrap();
        assert_eq!(digest, prover.digest());
    }

    #[test]
    fn rollback_to_prior_digest_restores_tree() {
        let (_dir, mut prover) = open_prover();
        let empty_digest = prover.digest();
        prover.perform_insert(BoxId([1; 32]), vec![9]).unwrap();
        prover.generate_proof_and_update_storage(&[]).unwrap();
        assert!(prover.unauthenticated_lookup(&BoxId([1; 32])).is_some());

        prover.rollback(empty_digest).unwrap();
        assert_eq!(prover.digest(), empty_digest);
        assert!(prover.unauthenticated_lookup(&BoxId([1; 32])).is_none());
    }

    #[test]
    fn rollback_then_reapply_then_rollback_is_idempotent() {
        let (_dir, mut prover) = open_prover();
        let v0 = prover.digest();
        prover.perform_insert(BoxId([1; 32]), vec![1]).unwrap();
        prover.generate_proof_and_update_storage(&[]).unwrap();
        let v1 = prover.digest();

        prover.rollback(v0).unwrap();
        let first_rollback_digest = prover.digest();

        prover.perform_insert(BoxId([2; 32]), vec![2]).unwrap();
        prover.generate_proof_and_update_storage(&[]).unwrap();
        assert_ne!(prover.digest(), v1);

        prover.rollback(v0).unwrap();
        assert_eq!(prover.digest(), first_rollback_digest);
    }

    #[test]
    fn speculative_apply_leaves_digest_unchanged() {
        let (_dir, mut prover) = open_prover();
        let before = prover.digest();
        let result = prover.run_speculative(|p| {
            p.perform_insert(BoxId([3; 32]), vec![3]).unwrap();
            p.digest()
        });
        assert_ne!(result, before);
        assert_eq!(prover.digest(), before);
        assert!(prover.unauthenticated_lookup(&BoxId([3; 32])).is_none());
    }
}
