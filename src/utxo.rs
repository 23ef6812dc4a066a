//! UTXO state (C3, SPEC_FULL.md §4.3): applies block transactions to the
//! authenticated prover under consensus rules, and offers the speculative
//! application path the miner uses to build AD proofs for a candidate.
//!
//! Grounded on the donor's `state/mod.rs::process_block` (per-transaction
//! contextual checks) and `storage/lmdb.rs` (rollback-on-failure
//! atomicity), generalized from address-string ownership to
//! `Proposition`/`unlockTry`.

use crate::error::{CoreError, CoreResult};
use crate::header::Header;
use crate::ids::{ModifierId, StateDigest};
use crate::prover::Prover;
use crate::tx::{BoxType, Transaction, UnlockContext, UtxoBox};
use std::sync::{Arc, Mutex};

fn block_id_key(id: &ModifierId) -> Vec<u8> {
    ModifierId::from_hash(&[b"blockid", id.as_bytes()]).as_bytes().to_vec()
}

fn state_root_index_key(digest: &StateDigest) -> Vec<u8> {
    ModifierId::from_hash(&[b"rootidx", digest.as_bytes()]).as_bytes().to_vec()
}

fn best_version_key() -> Vec<u8> {
    vec![0xBDu8; 32]
}

fn best_height_key() -> Vec<u8> {
    vec![0xBEu8; 32]
}

/// A lightweight, cloneable view: a version tag and a height, both backed
/// by the same shared prover. Every mutation returns a new `UtxoState`
/// rather than mutating this one in place.
#[derive(Clone)]
pub struct UtxoState {
    pub version: ModifierId,
    pub height: i64,
    prover: Arc<Mutex<Prover>>,
}

impl UtxoState {
    /// Default depth beyond which a rollback is refused by callers that
    /// enforce it (SPEC_FULL.md §4.3).
    pub const MAX_ROLLBACK_DEPTH: usize = 10;

    pub fn new(prover: Arc<Mutex<Prover>>) -> Self {
        UtxoState {
            version: ModifierId([0; 32]),
            height: crate::ids::PRE_GENESIS_HEIGHT,
            prover,
        }
    }

    pub fn digest(&self) -> StateDigest {
        self.prover.lock().unwrap().digest()
    }

    /// Validates `tx` against the current state without applying it —
    /// used by mempool admission to reject unspendable or malformed
    /// transactions before they occupy pool space.
    pub fn validate_tx(&self, tx: &Transaction) -> CoreResult<()> {
        let prover = self.prover.lock().unwrap();
        self.validate_tx_locked(&prover, tx)
    }

    fn validate_tx_locked(&self, prover: &Prover, tx: &Transaction) -> CoreResult<()> {
        if !tx.is_semantically_valid() {
            return Err(CoreError::SemanticInvalid {
                id: tx.id(),
                message: "transaction failed semantic validation".into(),
            });
        }

        let ctx = UnlockContext {
            tx_id: tx.id(),
            height: self.height,
        };
        let mut debit: u128 = 0;
        for u in &tx.unlockers {
            let raw = prover
                .unauthenticated_lookup(&u.box_id)
                .ok_or_else(|| CoreError::StateInvalid {
                    id: tx.id(),
                    message: format!("referenced box {} not found", u.box_id),
                })?;
            let utxo_box = UtxoBox::from_bytes(&raw).ok_or_else(|| CoreError::UnknownType {
                id: tx.id(),
                message: "could not deserialize referenced box".into(),
            })?;
            if !utxo_box.proposition.unlock_try(u.proof.as_ref(), ctx) {
                return Err(CoreError::StateInvalid {
                    id: tx.id(),
                    message: format!("box {} failed to unlock", u.box_id),
                });
            }
            debit += utxo_box.amount as u128;
        }

        let credit: u128 = tx
            .boxes
            .iter()
            .filter(|b| b.box_type != BoxType::Coinbase)
            .map(|b| b.amount as u128)
            .sum();
        if debit < credit {
            return Err(CoreError::StateInvalid {
                id: tx.id(),
                message: format!("debit {debit} below credit {credit}"),
            });
        }
        Ok(())
    }

    /// Applies a block's transactions to C2. On success, returns the new
    /// state plus the freshly produced AD proof when `carries_ad_proof` is
    /// false (the caller did not already have one to verify against).
    pub fn apply_block(
        &self,
        header: &Header,
        transactions: &[Transaction],
        carries_ad_proof: bool,
    ) -> CoreResult<(UtxoState, Option<Vec<u8>>)> {
        let mut prover = self.prover.lock().unwrap();
        let root_before = prover.digest();

        for tx in transactions {
            if let Err(e) = self.validate_tx_locked(&prover, tx) {
                prover.rollback(root_before)?;
                return Err(e);
            }
            for u in &tx.unlockers {
                if let Err(e) = prover.perform_remove(u.box_id) {
                    prover.rollback(root_before)?;
                    return Err(e);
                }
            }
            for b in &tx.boxes {
                if let Err(e) = prover.perform_insert(b.id, b.to_bytes()) {
                    prover.rollback(root_before)?;
                    return Err(e);
                }
            }
        }

        let proof_preview = prover.serialize_pending_proof();
        let ad_proofs_root = *blake3::hash(&proof_preview).as_bytes();
        if ad_proofs_root != header.ad_proofs_root {
            prover.rollback(root_before)?;
            return Err(CoreError::StateInvalid {
                id: header.id,
                message: "AD proof digest does not match header.ad_proofs_root".into(),
            });
        }

        let metadata = vec![
            (block_id_key(&header.id), header.state_root.as_bytes().to_vec()),
            (state_root_index_key(&header.state_root), header.id.as_bytes().to_vec()),
            (best_version_key(), header.id.as_bytes().to_vec()),
            (best_height_key(), header.height.to_be_bytes().to_vec()),
        ];
        let (proof, digest) = prover.generate_proof_and_update_storage(&metadata)?;

        if digest != header.state_root {
            prover.rollback(root_before)?;
            return Err(CoreError::StateInvalid {
                id: header.id,
                message: "resulting digest does not match header.state_root".into(),
            });
        }

        let new_state = UtxoState {
            version: header.id,
            height: header.height,
            prover: self.prover.clone(),
        };
        let delivered_proof = if carries_ad_proof { None } else { Some(proof) };
        Ok((new_state, delivered_proof))
    }

    /// Digest-only regime: advances the pointer without touching C2.
    pub fn apply_header_only(&self, header: &Header) -> UtxoState {
        UtxoState {
            version: header.id,
            height: header.height,
            prover: self.prover.clone(),
        }
    }

    pub fn rollback_to(&self, version: ModifierId) -> CoreResult<UtxoState> {
        let mut prover = self.prover.lock().unwrap();
        let digest_bytes = prover
            .kv()
            .get(&block_id_key(&version))?
            .ok_or_else(|| CoreError::storage("unknown rollback version"))?;
        if digest_bytes.len() != 33 {
            return Err(CoreError::storage("corrupt state-root index entry"));
        }
        let mut arr = [0u8; 33];
        arr.copy_from_slice(&digest_bytes);
        let digest = StateDigest(arr);
        prover.rollback(digest)?;

        let height = prover
            .kv()
            .get(&best_height_key())?
            .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
            .map(i64::from_be_bytes)
            .unwrap_or(crate::ids::PRE_GENESIS_HEIGHT);

        Ok(UtxoState {
            version,
            height,
            prover: self.prover.clone(),
        })
    }

    pub fn rollback_versions(&self) -> CoreResult<Vec<ModifierId>> {
        let prover = self.prover.lock().unwrap();
        let digests = prover.kv().rollback_versions()?;
        let mut out = Vec::new();
        for d in digests {
            if d.len() != 33 {
                continue;
            }
            let mut arr = [0u8; 33];
            arr.copy_from_slice(&d);
            let digest = StateDigest(arr);
            if let Some(id_bytes) = prover.kv().get(&state_root_index_key(&digest))? {
                if id_bytes.len() == 32 {
                    let mut b = [0u8; 32];
                    b.copy_from_slice(&id_bytes);
                    out.push(ModifierId(b));
                }
            }
        }
        Ok(out)
    }

    /// Applies `transactions` speculatively: the digest is restored before
    /// returning regardless of outcome. Transactions that fail validation
    /// (against the speculative state as it stands after earlier
    /// transactions in the batch) are skipped rather than aborting the
    /// whole batch.
    pub fn proofs_for_transactions(&self, transactions: &[Transaction]) -> CoreResult<(Vec<u8>, StateDigest)> {
        let mut prover = self.prover.lock().unwrap();
        let result = prover.run_speculative(|p| {
            for tx in transactions {
                if self.validate_tx_locked(p, tx).is_err() {
                    continue;
                }
                for u in &tx.unlockers {
                    let _ = p.perform_remove(u.box_id);
                }
                for b in &tx.boxes {
                    let _ = p.perform_insert(b.id, b.to_bytes());
                }
            }
            (p.serialize_pending_proof(), p.digest())
        });
        Ok(result)
    }
}
