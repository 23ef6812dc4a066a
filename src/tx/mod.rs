//! Box/Proposition/Transaction model (SPEC_FULL.md §3): a UTXO whose
//! ownership is expressed as a checkable predicate (`Proposition`) rather
//! than the donor's plain address string, and a transaction that merely
//! lists the boxes it unlocks and the boxes it produces.
//!
//! Named `UtxoBox` rather than `Box` to avoid colliding with
//! `std::boxed::Box`.

use crate::ids::{BoxId, ModifierId};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxType {
    Asset,
    Open,
    Coinbase,
}

impl BoxType {
    fn tag(self) -> u8 {
        match self {
            BoxType::Asset => 0,
            BoxType::Open => 1,
            BoxType::Coinbase => 2,
        }
    }
}

/// Context made available to a proposition's `unlock_try`.
#[derive(Debug, Clone, Copy)]
pub struct UnlockContext {
    pub tx_id: ModifierId,
    pub height: i64,
}

/// An ownership predicate. Only the pubkey-hash variant is implemented —
/// scripting is out of scope (SPEC_FULL.md non-goals) — but the predicate
/// boundary is kept explicit so a future variant slots in without touching
/// `UtxoState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposition {
    /// Spendable by a signature from the holder of the hashed public key.
    PubkeyHash([u8; 32]),
    /// Always unlockable; used for supply-bootstrap boxes in tests and
    /// genesis setup.
    Open,
}

impl Proposition {
    pub fn pubkey_hash(pubkey: &[u8; 32]) -> Self {
        Proposition::PubkeyHash(*blake3::hash(pubkey).as_bytes())
    }

    /// Attempts to unlock this proposition given an optional proof (a
    /// signature, for `PubkeyHash`) and the unlocking context.
    pub fn unlock_try(&self, proof: Option<&Proof>, ctx: UnlockContext) -> bool {
        match self {
            Proposition::Open => true,
            Proposition::PubkeyHash(hash) => {
                let Some(proof) = proof else { return false };
                if blake3::hash(&proof.pubkey).as_bytes() != hash {
                    return false;
                }
                let Ok(verifying_key) = VerifyingKey::from_bytes(&proof.pubkey) else {
                    return false;
                };
                let signature = Signature::from_bytes(&proof.signature);
                verifying_key.verify(ctx.tx_id.as_bytes(), &signature).is_ok()
            }
        }
    }
}

/// A proof accompanying an unlocker: a public key and a signature over the
/// spending transaction's ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub pubkey: [u8; 32],
    pub signature: [u8; 64],
}

impl Proof {
    pub fn sign(signing_key: &SigningKey, tx_id: ModifierId) -> Self {
        let signature = signing_key.sign(tx_id.as_bytes());
        Proof {
            pubkey: VerifyingKey::from(signing_key).to_bytes(),
            signature: signature.to_bytes(),
        }
    }
}

/// A single box unlock attempt within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unlocker {
    pub box_id: BoxId,
    pub proof: Option<Proof>,
}

/// An immutable UTXO. Its identity is `id`, derived from the rest of its
/// fields plus the disambiguating `nonce`/`parent_tx` pair so two boxes with
/// otherwise-identical contents never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoBox {
    pub id: BoxId,
    pub box_type: BoxType,
    pub proposition: Proposition,
    pub nonce: u32,
    pub amount: u64,
}

impl UtxoBox {
    pub fn new(box_type: BoxType, proposition: Proposition, nonce: u32, amount: u64, parent_tx: ModifierId, index: u32) -> Self {
        let id = BoxId::from_hash(&[
            &[box_type.tag()],
            parent_tx.as_bytes(),
            &index.to_be_bytes(),
            &nonce.to_be_bytes(),
        ]);
        UtxoBox {
            id,
            box_type,
            proposition,
            nonce,
            amount,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("box is always serializable")
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// A set of box unlocks, a set of newly created boxes, and the sender's
/// signature over both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub unlockers: Vec<Unlocker>,
    pub boxes: Vec<UtxoBox>,
    pub timestamp: u64,
    pub sender_pubkey: [u8; 32],
    pub signature: [u8; 64],
}

impl Transaction {
    /// Bytes covered by the sender's signature: everything except the
    /// signature itself (and the per-unlocker proofs, which authenticate
    /// individual inputs rather than the transaction as a whole).
    fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for u in &self.unlockers {
            buf.extend_from_slice(u.box_id.as_bytes());
        }
        for b in &self.boxes {
            buf.extend_from_slice(&b.to_bytes());
        }
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.sender_pubkey);
        buf
    }

    pub fn id(&self) -> ModifierId {
        let mut buf = self.signing_bytes();
        buf.extend_from_slice(&self.signature);
        ModifierId::from_hash(&[&buf])
    }

    pub fn sign(&mut self, signing_key: &SigningKey) {
        self.sender_pubkey = VerifyingKey::from(signing_key).to_bytes();
        let signature = signing_key.sign(&self.signing_bytes());
        self.signature = signature.to_bytes();
    }

    /// Per-unlocker signature, over the freshly-assigned transaction ID —
    /// this must be produced *after* `sign` assigns the sender key and
    /// before `unlockers[i].proof` is attached by the caller.
    pub fn unlock_proof(&self, signing_key: &SigningKey) -> Proof {
        Proof::sign(signing_key, self.id())
    }

    fn verify_sender_signature(&self) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.sender_pubkey) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature);
        verifying_key.verify(&self.signing_bytes(), &signature).is_ok()
    }

    /// Static structural checks, independent of any state: at least one
    /// unlocker unless every new box is a coinbase output, no duplicate
    /// unlocked box IDs, no duplicate produced box IDs, and a valid sender
    /// signature (coinbase transactions, which have no unlockers, carry no
    /// meaningful sender signature and are exempt).
    pub fn is_semantically_valid(&self) -> bool {
        if self.boxes.is_empty() {
            return false;
        }
        let all_coinbase = self.boxes.iter().all(|b| b.box_type == BoxType::Coinbase);
        if self.unlockers.is_empty() && !all_coinbase {
            return false;
        }

        let mut seen_inputs = std::collections::HashSet::new();
        for u in &self.unlockers {
            if !seen_inputs.insert(u.box_id) {
                return false;
            }
        }
        let mut seen_outputs = std::collections::HashSet::new();
        for b in &self.boxes {
            if !seen_outputs.insert(b.id) {
                return false;
            }
        }

        if self.unlockers.is_empty() {
            true
        } else {
            self.verify_sender_signature()
        }
    }

    pub fn serialized_len(&self) -> usize {
        bincode::serialize(self).map(|b| b.len()).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    fn spendable_box(owner: &SigningKey, amount: u64) -> UtxoBox {
        let pubkey = VerifyingKey::from(owner).to_bytes();
        UtxoBox::new(
            BoxType::Asset,
            Proposition::pubkey_hash(&pubkey),
            0,
            amount,
            ModifierId([7; 32]),
            0,
        )
    }

    #[test]
    fn coinbase_with_no_unlockers_is_semantically_valid() {
        let miner = keypair();
        let pubkey = VerifyingKey::from(&miner).to_bytes();
        let coinbase_box = UtxoBox::new(BoxType::Coinbase, Proposition::pubkey_hash(&pubkey), 0, 50, ModifierId([1; 32]), 0);
        let tx = Transaction {
            unlockers: vec![],
            boxes: vec![coinbase_box],
            timestamp: 1,
            sender_pubkey: [0; 32],
            signature: [0; 64],
        };
        assert!(tx.is_semantically_valid());
    }

    #[test]
    fn non_coinbase_without_unlockers_is_invalid() {
        let owner = keypair();
        let out = spendable_box(&owner, 10);
        let tx = Transaction {
            unlockers: vec![],
            boxes: vec![out],
            timestamp: 1,
            sender_pubkey: [0; 32],
            signature: [0; 64],
        };
        assert!(!tx.is_semantically_valid());
    }

    #[test]
    fn spend_roundtrips_signature_and_proposition_unlock() {
        let owner = keypair();
        let input_box = spendable_box(&owner, 10);
        let recipient = keypair();
        let out = spendable_box(&recipient, 10);

        let mut tx = Transaction {
            unlockers: vec![Unlocker { box_id: input_box.id, proof: None }],
            boxes: vec![out],
            timestamp: 1,
            sender_pubkey: [0; 32],
            signature: [0; 64],
        };
        tx.sign(&owner);
        let proof = tx.unlock_proof(&owner);
        tx.unlockers[0].proof = Some(proof);

        assert!(tx.is_semantically_valid());
        let ctx = UnlockContext { tx_id: tx.id(), height: 1 };
        assert!(input_box.proposition.unlock_try(tx.unlockers[0].proof.as_ref(), ctx));
    }

    #[test]
    fn wrong_key_fails_to_unlock() {
        let owner = keypair();
        let attacker = keypair();
        let input_box = spendable_box(&owner, 10);
        let out = spendable_box(&owner, 10);

        let mut tx = Transaction {
            unlockers: vec![Unlocker { box_id: input_box.id, proof: None }],
            boxes: vec![out],
            timestamp: 1,
            sender_pubkey: [0; 32],
            signature: [0; 64],
        };
        tx.sign(&attacker);
        let proof = tx.unlock_proof(&attacker);
        let ctx = UnlockContext { tx_id: tx.id(), height: 1 };
        assert!(!input_box.proposition.unlock_try(Some(&proof), ctx));
    }

    #[test]
    fn duplicate_unlockers_are_rejected() {
        let owner = keypair();
        let input_box = spendable_box(&owner, 10);
        let out = spendable_box(&owner, 10);
        let tx = Transaction {
            unlockers: vec![
                Unlocker { box_id: input_box.id, proof: None },
                Unlocker { box_id: input_box.id, proof: None },
            ],
            boxes: vec![out],
            timestamp: 1,
            sender_pubkey: [0; 32],
            signature: [0; 64],
        };
        assert!(!tx.is_semantically_valid());
    }

    #[test]
    fn box_bytes_roundtrip() {
        let owner = keypair();
        let b = spendable_box(&owner, 42);
        let bytes = b.to_bytes();
        let back = UtxoBox::from_bytes(&bytes).unwrap();
        assert_eq!(b, back);
    }
}
