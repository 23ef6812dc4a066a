//! Header chain processor (C4, SPEC_FULL.md §4.4): header validation,
//! scoring, reorg bookkeeping, difficulty retargeting and `reportInvalid`.
//!
//! Grounded on the donor's `blockchain/chain.rs` (in-memory indexing,
//! `MAX_REORG_DEPTH`, strict `>` tip-update rule) and
//! `blockchain/validation.rs` (sequential numbered rejection checks).

pub mod retarget;

use crate::config::StateMode;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ModifierId, StateDigest, GENESIS_PARENT_SENTINEL};
use crate::time::NetworkTimeProvider;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const GENESIS_HEIGHT: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifierType {
    Payload,
    AdProofs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub id: ModifierId,
    pub parent_id: ModifierId,
    pub height: i64,
    pub timestamp: u64,
    pub difficulty: BigUint,
    pub state_root: StateDigest,
    pub ad_proofs_root: [u8; 32],
    pub payload_id: ModifierId,
    pub ad_proofs_id: ModifierId,
    pub nonce: u64,
    pub miner_pubkey: [u8; 32],
    pub signature: Vec<u8>,
}

impl Header {
    /// Bytes covered by the miner signature and the PoW hash: everything
    /// except the signature and `id` themselves.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.parent_id.as_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.difficulty.to_bytes_be());
        buf.extend_from_slice(self.state_root.as_bytes());
        buf.extend_from_slice(&self.ad_proofs_root);
        buf.extend_from_slice(self.payload_id.as_bytes());
        buf.extend_from_slice(self.ad_proofs_id.as_bytes());
        buf.extend_from_slice(&self.miner_pubkey);
        buf
    }

    fn pow_bytes(&self) -> Vec<u8> {
        let mut buf = self.signing_bytes();
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf
    }

    pub fn pow_hash(&self) -> [u8; 32] {
        *blake3::hash(&self.pow_bytes()).as_bytes()
    }

    pub fn calculate_id(&self) -> ModifierId {
        let mut buf = self.pow_bytes();
        buf.extend_from_slice(&self.signature);
        ModifierId::from_hash(&[&buf])
    }

    pub fn sign(&mut self, signing_key: &SigningKey) {
        self.miner_pubkey = VerifyingKey::from(signing_key).to_bytes();
        let signature = signing_key.sign(&self.signing_bytes());
        self.signature = signature.to_bytes().to_vec();
        self.id = self.calculate_id();
    }

    pub fn verify_signature(&self) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.miner_pubkey) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(self.signature.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        verifying_key.verify(&self.signing_bytes(), &signature).is_ok()
    }
}

/// `validatePow(hash, difficulty)`: the hash, read as a big-endian integer,
/// must not exceed `u256::MAX / difficulty`.
pub fn validate_pow(hash: &[u8; 32], difficulty: &BigUint) -> bool {
    if difficulty.is_zero() {
        return false;
    }
    let max = BigUint::from_bytes_be(&[0xffu8; 32]);
    let target = &max / difficulty;
    BigUint::from_bytes_be(hash) <= target
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressInfo {
    pub rollback_to: Option<ModifierId>,
    pub to_apply: Vec<ModifierId>,
    pub new_best_header: Option<ModifierId>,
    pub to_download: Vec<(ModifierType, ModifierId)>,
}

fn score_key(id: &ModifierId) -> [u8; 32] {
    *ModifierId::from_hash(&[b"score", id.as_bytes()]).as_bytes()
}

fn header_key(id: &ModifierId) -> [u8; 32] {
    *ModifierId::from_hash(&[b"header", id.as_bytes()]).as_bytes()
}

fn height_ids_key(height: i64) -> [u8; 32] {
    *ModifierId::from_hash(&[b"heightids", &height.to_be_bytes()]).as_bytes()
}

fn best_header_key() -> [u8; 32] {
    [0xABu8; 32]
}

fn best_block_key() -> [u8; 32] {
    [0xACu8; 32]
}

pub struct HeaderProcessor {
    kv: Arc<crate::kv::KvStore>,
    clock: Arc<dyn NetworkTimeProvider>,
    max_time_drift_ms: u64,
    max_rollback: i64,
    verify_transactions: bool,
    state_mode: StateMode,

    headers: RwLock<HashMap<ModifierId, Header>>,
    scores: RwLock<HashMap<ModifierId, BigUint>>,
    height_ids: RwLock<HashMap<i64, Vec<ModifierId>>>,
    best_header_id: RwLock<Option<ModifierId>>,
    best_block_id: RwLock<Option<ModifierId>>,
}

impl HeaderProcessor {
    pub fn new(
        kv: Arc<crate::kv::KvStore>,
        clock: Arc<dyn NetworkTimeProvider>,
        max_time_drift_ms: u64,
        max_rollback: i64,
        verify_transactions: bool,
        state_mode: StateMode,
    ) -> Self {
        HeaderProcessor {
            kv,
            clock,
            max_time_drift_ms,
            max_rollback,
            verify_transactions,
            state_mode,
            headers: RwLock::new(HashMap::new()),
            scores: RwLock::new(HashMap::new()),
            height_ids: RwLock::new(HashMap::new()),
            best_header_id: RwLock::new(None),
            best_block_id: RwLock::new(None),
        }
    }

    pub fn best_header_id(&self) -> Option<ModifierId> {
        *self.best_header_id.read().unwrap()
    }

    pub fn best_header(&self) -> Option<Header> {
        let id = self.best_header_id()?;
        self.headers.read().unwrap().get(&id).cloned()
    }

    pub fn best_block_id(&self) -> Option<ModifierId> {
        *self.best_block_id.read().unwrap()
    }

    pub fn set_best_block(&self, id: ModifierId) {
        *self.best_block_id.write().unwrap() = Some(id);
    }

    pub fn header(&self, id: &ModifierId) -> Option<Header> {
        self.headers.read().unwrap().get(id).cloned()
    }

    pub fn score_of(&self, id: &ModifierId) -> Option<BigUint> {
        self.scores.read().unwrap().get(id).cloned()
    }

    pub fn height_ids_at(&self, height: i64) -> Vec<ModifierId> {
        self.height_ids.read().unwrap().get(&height).cloned().unwrap_or_default()
    }

    pub fn header_chain_back(&self, start: ModifierId, limit: usize, until: impl Fn(&Header) -> bool) -> Vec<Header> {
        let headers = self.headers.read().unwrap();
        self.header_chain_back_locked(&headers, start, limit, until)
    }

    fn header_chain_back_locked(
        &self,
        headers: &HashMap<ModifierId, Header>,
        start: ModifierId,
        limit: usize,
        until: impl Fn(&Header) -> bool,
    ) -> Vec<Header> {
        let mut out = Vec::new();
        let mut cursor = start;
        loop {
            let Some(h) = headers.get(&cursor) else { break };
            out.push(h.clone());
            if out.len() >= limit || until(h) {
                break;
            }
            if h.parent_id == GENESIS_PARENT_SENTINEL {
                break;
            }
            cursor = h.parent_id;
        }
        out
    }

    pub fn required_difficulty_after(&self, parent: &Header) -> CoreResult<BigUint> {
        let headers = self.headers.read().unwrap();
        self.required_difficulty_after_locked(&headers, parent)
    }

    fn required_difficulty_after_locked(
        &self,
        headers: &HashMap<ModifierId, Header>,
        parent: &Header,
    ) -> CoreResult<BigUint> {
        if parent.height <= 2 {
            return Ok(BigUint::from(retarget::INITIAL_DIFFICULTY));
        }
        let sample_heights = retarget::heights_for_retargeting_at(parent.height);
        if sample_heights.len() < retarget::RETARGETING_EPOCHS_QTY {
            return Ok(parent.difficulty.clone());
        }
        let needed_depth = (sample_heights[0] - sample_heights[sample_heights.len() - 1]) as usize + 1;
        let ancestry = self.header_chain_back_locked(headers, parent.id, needed_depth, |_| false);

        let mut samples = Vec::with_capacity(sample_heights.len());
        for h in sample_heights.iter().rev() {
            let offset = (parent.height - h) as usize;
            match ancestry.get(offset) {
                Some(hdr) => samples.push(retarget::Sample {
                    height: hdr.height,
                    difficulty: hdr.difficulty.clone(),
                    timestamp: hdr.timestamp,
                }),
                None => return Ok(parent.difficulty.clone()),
            }
        }
        Ok(retarget::linear_retarget(&samples).unwrap_or_else(|| BigUint::from(retarget::INITIAL_DIFFICULTY)))
    }

    pub fn validate(&self, header: &Header) -> CoreResult<()> {
        let headers = self.headers.read().unwrap();
        let best_header_id = self.best_header_id.read().unwrap();

        let parent = if header.parent_id == GENESIS_PARENT_SENTINEL {
            if best_header_id.is_some() || header.height != GENESIS_HEIGHT {
                return Err(CoreError::ChainStructural {
                    id: header.id,
                    message: "genesis header must be unique and at genesis height".into(),
                });
            }
            None
        } else {
            let parent = headers.get(&header.parent_id).ok_or_else(|| CoreError::ChainStructural {
                id: header.id,
                message: "parent header unknown".into(),
            })?;
            if header.height != parent.height + 1 {
                return Err(CoreError::ChainStructural {
                    id: header.id,
                    message: format!("height {} is not parent height {} + 1", header.height, parent.height),
                });
            }
            if header.timestamp < parent.timestamp {
                return Err(CoreError::ChainStructural {
                    id: header.id,
                    message: "timestamp precedes parent".into(),
                });
            }
            Some(parent)
        };

        let now = self.clock.now_ms();
        if header.timestamp > now.saturating_add(self.max_time_drift_ms) {
            return Err(CoreError::ChainStructural {
                id: header.id,
                message: "timestamp too far in the future".into(),
            });
        }

        let required_difficulty = match parent {
            Some(parent) => self.required_difficulty_after_locked(&headers, parent)?,
            None => BigUint::from(retarget::INITIAL_DIFFICULTY),
        };
        if header.difficulty < required_difficulty {
            return Err(CoreError::ChainStructural {
                id: header.id,
                message: format!("difficulty {} below required {}", header.difficulty, required_difficulty),
            });
        }

        if !validate_pow(&header.pow_hash(), &header.difficulty) {
            return Err(CoreError::PowInvalid {
                id: header.id,
                message: "proof-of-work check failed".into(),
            });
        }

        if let (Some(parent), Some(best_id)) = (parent, *best_header_id) {
            if let Some(best) = headers.get(&best_id) {
                if best.height - parent.height >= self.max_rollback {
                    return Err(CoreError::Capacity {
                        message: format!("parent at height {} is too deep to build on (best height {})", parent.height, best.height),
                    });
                }
            }
        }

        if !header.verify_signature() {
            return Err(CoreError::SemanticInvalid {
                id: header.id,
                message: "miner signature invalid".into(),
            });
        }

        Ok(())
    }

    /// Assumes `header` has already passed [`Self::validate`].
    pub fn process(&self, header: Header) -> CoreResult<ProgressInfo> {
        let id = header.id;
        let mut headers = self.headers.write().unwrap();
        let mut scores = self.scores.write().unwrap();
        let mut height_ids = self.height_ids.write().unwrap();
        let mut best_header_id = self.best_header_id.write().unwrap();

        let score = if header.parent_id == GENESIS_PARENT_SENTINEL {
            header.difficulty.clone()
        } else {
            let parent_score = scores.get(&header.parent_id).ok_or_else(|| CoreError::ChainStructural {
                id,
                message: "parent score unknown".into(),
            })?;
            parent_score + &header.difficulty
        };

        scores.insert(id, score.clone());
        height_ids.entry(header.height).or_default().push(id);
        headers.insert(id, header.clone());

        let ids_bytes: Vec<u8> = height_ids[&header.height]
            .iter()
            .flat_map(|m| m.as_bytes().to_vec())
            .collect();
        let mut kvs = vec![
            (score_key(&id).to_vec(), score.to_bytes_be()),
            (header_key(&id).to_vec(), bincode::serialize(&header).map_err(|e| CoreError::storage(e.to_string()))?),
            (height_ids_key(header.height).to_vec(), ids_bytes),
        ];

        let old_best = *best_header_id;
        let current_best_score = old_best.and_then(|b| scores.get(&b)).cloned();
        let is_new_best = match &current_best_score {
            None => true,
            Some(best_score) => score > *best_score,
        };

        let mut progress = ProgressInfo {
            to_download: vec![(ModifierType::Payload, header.payload_id)],
            ..Default::default()
        };
        if self.verify_transactions && self.state_mode == StateMode::Digest {
            progress.to_download.push((ModifierType::AdProofs, header.ad_proofs_id));
        }

        if is_new_best {
            *best_header_id = Some(id);
            kvs.push((best_header_key().to_vec(), id.as_bytes().to_vec()));
            progress.new_best_header = Some(id);

            let mut path = Vec::new();
            let mut fork_point = None;
            let mut cursor = id;
            loop {
                let h = headers[&cursor].height;
                let already_first = height_ids.get(&h).and_then(|l| l.first()).copied() == Some(cursor);
                let old_height_covers = old_best
                    .map(|o| headers.get(&o).map(|oh| oh.height).unwrap_or(i64::MIN) >= h)
                    .unwrap_or(false);
                if already_first && old_height_covers {
                    fork_point = Some(cursor);
                    break;
                }
                path.push(cursor);
                if !already_first {
                    let list = height_ids.entry(h).or_default();
                    if let Some(pos) = list.iter().position(|x| *x == cursor) {
                        list.swap(0, pos);
                    }
                }
                let parent = headers[&cursor].parent_id;
                if parent == GENESIS_PARENT_SENTINEL || !headers.contains_key(&parent) {
                    break;
                }
                cursor = parent;
            }
            path.reverse();
            if old_best.is_some() {
                progress.rollback_to = fork_point;
                progress.to_apply = path;
            }
        }

        self.kv.bulk_insert(id.as_bytes(), &kvs, &[])?;
        Ok(progress)
    }

    pub fn report_invalid(&self, id: ModifierId) -> CoreResult<()> {
        let mut headers = self.headers.write().unwrap();
        let mut scores = self.scores.write().unwrap();
        let mut best_header_id = self.best_header_id.write().unwrap();
        let mut best_block_id = self.best_block_id.write().unwrap();

        let header = headers.remove(&id);
        scores.remove(&id);
        let parent_id = header.as_ref().map(|h| h.parent_id);

        let to_remove = vec![score_key(&id).to_vec(), header_key(&id).to_vec()];
        let mut to_update = Vec::new();

        if *best_header_id == Some(id) {
            *best_header_id = parent_id;
            if let Some(p) = parent_id {
                to_update.push((best_header_key().to_vec(), p.as_bytes().to_vec()));
            }
        }
        if *best_block_id == Some(id) {
            *best_block_id = parent_id;
            if let Some(p) = parent_id {
                to_update.push((best_block_key().to_vec(), p.as_bytes().to_vec()));
            }
        }

        self.kv.bulk_insert(id.as_bytes(), &to_update, &to_remove)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedClock;
    use rand::rngs::OsRng;
    use tempfile::tempdir;

    fn processor(max_rollback: i64) -> (tempfile::TempDir, HeaderProcessor, FixedClock) {
        let dir = tempdir().unwrap();
        let kv = Arc::new(crate::kv::KvStore::open(dir.path(), 1, 50).unwrap());
        let clock = FixedClock::new(1_000_000);
        let proc = HeaderProcessor::new(kv, Arc::new(clock.clone()), 2 * 60 * 60 * 1000, max_rollback, true, StateMode::Utxo);
        (dir, proc, clock)
    }

    fn mined_header(parent: Option<&Header>, timestamp: u64, difficulty: u64, signing_key: &SigningKey) -> Header {
        let (parent_id, height) = match parent {
            Some(p) => (p.id, p.height + 1),
            None => (GENESIS_PARENT_SENTINEL, GENESIS_HEIGHT),
        };
        let difficulty = BigUint::from(difficulty);
        let mut nonce = 0u64;
        loop {
            let mut header = Header {
                id: ModifierId([0; 32]),
                parent_id,
                height,
                timestamp,
                difficulty: difficulty.clone(),
                state_root: StateDigest::empty(),
                ad_proofs_root: [0; 32],
                payload_id: ModifierId::from_hash(&[&height.to_be_bytes(), &nonce.to_be_bytes()]),
                ad_proofs_id: ModifierId([0; 32]),
                nonce,
                miner_pubkey: [0; 32],
                signature: Vec::new(),
            };
            header.sign(signing_key);
            if validate_pow(&header.pow_hash(), &header.difficulty) {
                return header;
            }
            nonce += 1;
        }
    }

    #[test]
    fn genesis_then_linear_extension_scores_accumulate() {
        let (_dir, proc, clock) = processor(50);
        let key = SigningKey::generate(&mut OsRng);
        let genesis = mined_header(None, clock.now_ms(), 1000, &key);
        proc.validate(&genesis).unwrap();
        let progress = proc.process(genesis.clone()).unwrap();
        assert_eq!(progress.new_best_header, Some(genesis.id));

        let a = mined_header(Some(&genesis), clock.now_ms() + 1, 1000, &key);
        proc.validate(&a).unwrap();
        proc.process(a.clone()).unwrap();

        assert_eq!(proc.best_header_id(), Some(a.id));
        assert_eq!(proc.score_of(&a.id), Some(BigUint::from(2000u32)));
    }

    #[test]
    fn reorg_promotes_longer_fork_to_front_of_height_index() {
        let (_dir, proc, clock) = processor(50);
        let key = SigningKey::generate(&mut OsRng);

        let g = mined_header(None, clock.now_ms(), 1000, &key);
        proc.validate(&g).unwrap();
        proc.process(g.clone()).unwrap();

        let a = mined_header(Some(&g), clock.now_ms() + 1, 1000, &key);
        proc.validate(&a).unwrap();
        proc.process(a.clone()).unwrap();
        let b = mined_header(Some(&a), clock.now_ms() + 2, 1000, &key);
        proc.validate(&b).unwrap();
        proc.process(b.clone()).unwrap();

        // Competing fork from genesis, same per-block difficulty, needs to
        // reach height 3 to out-score the two-block A-B chain (score 3).
        let a2 = mined_header(Some(&g), clock.now_ms() + 1, 1000, &key);
        proc.validate(&a2).unwrap();
        proc.process(a2.clone()).unwrap();
        let b2 = mined_header(Some(&a2), clock.now_ms() + 2, 1000, &key);
        proc.validate(&b2).unwrap();
        proc.process(b2.clone()).unwrap();
        let c2 = mined_header(Some(&b2), clock.now_ms() + 3, 1000, &key);
        proc.validate(&c2).unwrap();
        let progress = proc.process(c2.clone()).unwrap();

        assert_eq!(proc.best_header_id(), Some(c2.id));
        assert_eq!(progress.new_best_header, Some(c2.id));
        assert_eq!(proc.height_ids_at(1).first(), Some(&a2.id));
        assert_eq!(proc.height_ids_at(2).first(), Some(&b2.id));
    }

    #[test]
    fn header_with_stale_timestamp_is_rejected() {
        let (_dir, proc, clock) = processor(50);
        let key = SigningKey::generate(&mut OsRng);
        let g = mined_header(None, clock.now_ms(), 1000, &key);
        proc.validate(&g).unwrap();
        proc.process(g.clone()).unwrap();

        let bad = mined_header(Some(&g), g.timestamp.saturating_sub(1), 1000, &key);
        assert!(proc.validate(&bad).is_err());
    }

    #[test]
    fn report_invalid_resets_best_header_to_parent() {
        let (_dir, proc, clock) = processor(50);
        let key = SigningKey::generate(&mut OsRng);
        let g = mined_header(None, clock.now_ms(), 1000, &key);
        proc.validate(&g).unwrap();
        proc.process(g.clone()).unwrap();
        let a = mined_header(Some(&g), clock.now_ms() + 1, 1000, &key);
        proc.validate(&a).unwrap();
        proc.process(a.clone()).unwrap();

        proc.report_invalid(a.id).unwrap();
        assert_eq!(proc.best_header_id(), Some(g.id));
        assert!(proc.header(&a.id).is_none());
    }
}
