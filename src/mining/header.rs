// Block header template and proof-of-work hashing
//
// Standard 80-byte header layout, all integers little-endian:
//   version(4) | prev_block_hash(32) | merkle_root(32) | time(4) | bits(4) | nonce(4)
// The proof-of-work hash is SHA-256(SHA-256(header)).
//
// Hashes are written as hex in display order (byte-reversed), matching block
// explorers; internally they are kept in serialization order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub const HEADER_LEN: usize = 80;

/// Header fields fixed for a run; only the nonce varies during the search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderTemplate {
    pub version: i32,
    #[serde(with = "display_hex")]
    pub prev_block_hash: [u8; 32],
    #[serde(with = "display_hex")]
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
}

impl BlockHeaderTemplate {
    /// Serialize the header with `nonce`
    pub fn serialize(&self, nonce: u32) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..36].copy_from_slice(&self.prev_block_hash);
        bytes[36..68].copy_from_slice(&self.merkle_root);
        bytes[68..72].copy_from_slice(&self.time.to_le_bytes());
        bytes[72..76].copy_from_slice(&self.bits.to_le_bytes());
        bytes[76..80].copy_from_slice(&nonce.to_le_bytes());
        bytes
    }

    /// Double SHA-256 of the header with `nonce`, in serialization order
    pub fn hash(&self, nonce: u32) -> [u8; 32] {
        HeaderHasher::new(self).hash(nonce)
    }

    /// Genesis block header of the Bitcoin main chain
    pub fn genesis() -> Self {
        let mut merkle_root = [0u8; 32];
        // Display-order hex of the genesis merkle root, reversed into place
        let display = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        if let Ok(bytes) = decode_display_hex(display) {
            merkle_root = bytes;
        }
        Self {
            version: 1,
            prev_block_hash: [0u8; 32],
            merkle_root,
            time: 1_231_006_505,
            bits: 0x1d00_ffff,
        }
    }
}

impl Default for BlockHeaderTemplate {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Hasher with the nonce-independent prefix already absorbed.
///
/// Cloning a SHA-256 state that has consumed the first 76 bytes skips the
/// first compression block on every attempt.
#[derive(Clone)]
pub struct HeaderHasher {
    prefix: Sha256,
}

impl HeaderHasher {
    pub fn new(template: &BlockHeaderTemplate) -> Self {
        let bytes = template.serialize(0);
        let mut prefix = Sha256::new();
        prefix.update(&bytes[..HEADER_LEN - 4]);
        Self { prefix }
    }

    pub fn hash(&self, nonce: u32) -> [u8; 32] {
        let mut first = self.prefix.clone();
        first.update(nonce.to_le_bytes());
        let inner = first.finalize();
        Sha256::digest(inner).into()
    }

    /// Most significant 64 bits of the hash read as a little-endian 256-bit
    /// number; this is what the difficulty target is compared against
    pub fn hash_value(&self, nonce: u32) -> u64 {
        hash_value(&self.hash(nonce))
    }
}

/// Leading 64 bits of a hash in serialization order
pub fn hash_value(hash: &[u8; 32]) -> u64 {
    let mut top = [0u8; 8];
    top.copy_from_slice(&hash[24..32]);
    u64::from_le_bytes(top)
}

/// Display-order hex of a hash (byte-reversed)
pub fn to_display_hex(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

fn decode_display_hex(text: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(text).map_err(|e| e.to_string())?;
    let mut hash: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
    hash.reverse();
    Ok(hash)
}

mod display_hex {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_display_hex(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        decode_display_hex(&text).map_err(serde::de::Error::custom)
    }
}
