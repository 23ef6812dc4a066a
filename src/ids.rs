//! Opaque identifiers and digests (SPEC_FULL.md §3).
//!
//! Modifier/box IDs are 32 raw bytes compared as an unsigned lexicographic
//! total order; the authenticated-state digest is 33 bytes (root plus a
//! tree-height byte). Both are value types — no content-equality wrapper,
//! per SPEC_FULL.md §9's instruction to key maps on raw bytes directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The well-known parent sentinel for genesis headers.
pub const GENESIS_PARENT_SENTINEL: ModifierId = ModifierId([0u8; 32]);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModifierId(pub [u8; 32]);

impl ModifierId {
    pub fn from_hash(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        ModifierId(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ModifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ModifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModifierId({})", self.to_hex())
    }
}

/// 32-byte box identifier. Distinct type from [`ModifierId`] even though the
/// representation coincides, so the two ID spaces cannot be confused at
/// the type level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoxId(pub [u8; 32]);

impl BoxId {
    pub fn from_hash(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        BoxId(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxId({})", self.to_hex())
    }
}

/// 33-byte authenticated-state digest: 32-byte AVL+ root plus a tree-height
/// byte, per SPEC_FULL.md §3.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateDigest(pub [u8; 33]);

impl StateDigest {
    pub fn new(root: [u8; 32], tree_height: u8) -> Self {
        let mut bytes = [0u8; 33];
        bytes[..32].copy_from_slice(&root);
        bytes[32] = tree_height;
        StateDigest(bytes)
    }

    /// The empty tree's digest: all-zero root, height zero.
    pub fn empty() -> Self {
        StateDigest([0u8; 33])
    }

    pub fn root(&self) -> [u8; 32] {
        let mut root = [0u8; 32];
        root.copy_from_slice(&self.0[..32]);
        root
    }

    pub fn tree_height(&self) -> u8 {
        self.0[32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDigest({})", self.to_hex())
    }
}

/// Distinguished height preceding genesis (height 0).
pub const PRE_GENESIS_HEIGHT: i64 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifier_id_hash_is_deterministic() {
        let a = ModifierId::from_hash(&[b"score", &[1, 2, 3]]);
        let b = ModifierId::from_hash(&[b"score", &[1, 2, 3]]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_hash_differently() {
        let a = ModifierId::from_hash(&[b"score", &[1]]);
        let b = ModifierId::from_hash(&[b"height", &[1]]);
        assert_ne!(a, b);
    }

    #[test]
    fn digest_roundtrips_root_and_height() {
        let root = [7u8; 32];
        let d = StateDigest::new(root, 5);
        assert_eq!(d.root(), root);
        assert_eq!(d.tree_height(), 5);
    }

    #[test]
    fn ordering_is_total_lexicographic() {
        let a = ModifierId([0; 32]);
        let mut b = [0u8; 32];
        b[31] = 1;
        let b = ModifierId(b);
        assert!(a < b);
    }
}
