//! Hash types for trie nodes and state roots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte trie node hash, computed as Blake3(node_bytes).
///
/// Trie nodes are content-addressed: a node is requested by its hash and a
/// delivered blob is accepted only if it hashes back to a requested value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

/// The root hash of a state trie. Sessions are keyed by it.
pub type StateRoot = Hash;

impl Hash {
    /// Hash arbitrary node bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_display_is_truncated() {
        let hash = Hash([0xab; 32]);
        assert_eq!(format!("{}", hash), "abababababababab");
        assert_eq!(format!("{:?}", hash), "Hash(abababababababab)");
    }

    #[test]
    fn test_digest_matches_blake3() {
        let data = b"trie node";
        assert_eq!(Hash::digest(data).0, *blake3::hash(data).as_bytes());
    }

    #[test]
    fn test_hash_serde_roundtrip() {
        let hash = Hash::digest(b"root");
        let json = serde_json::to_string(&hash).unwrap();
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    proptest! {
        #[test]
        fn test_digest_distinguishes_inputs(a in any::<Vec<u8>>(), b in any::<Vec<u8>>()) {
            prop_assume!(a != b);
            prop_assert_ne!(Hash::digest(&a), Hash::digest(&b));
        }
    }
}
