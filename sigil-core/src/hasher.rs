//! Content hashing for file bundles
//!
//! SHA-256 digests rendered as multibase base16 multihashes, plus the
//! order-independent aggregate hash embedded in the signature envelope.

use sha2::{Digest, Sha256};

use crate::error::SigilError;

/// Multibase prefix marking a lowercase base16 rendering.
pub const BASE16_PREFIX: char = 'f';

/// Multihash header for a 32-byte SHA-256 digest (code 0x12, length 0x20).
const MULTIHASH_SHA2_256: [u8; 2] = [0x12, 0x20];

/// Hash a byte blob into its prefixed content-hash string.
///
/// The result is `f1220` followed by 64 lowercase hex characters. The
/// `1220` multihash header makes the string self-describing, so envelopes
/// stay decodable if the digest algorithm ever changes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();

    let mut multihash = Vec::with_capacity(2 + digest.len());
    multihash.extend_from_slice(&MULTIHASH_SHA2_256);
    multihash.extend_from_slice(&digest);

    format!("{}{}", BASE16_PREFIX, hex::encode(multihash))
}

/// Normalize a hash to carry the base16 prefix.
///
/// Older signature documents stored hashes without the multibase prefix;
/// every comparison goes through this first so both generations match.
pub fn normalize(hash: &str) -> String {
    if hash.starts_with(BASE16_PREFIX) {
        hash.to_string()
    } else {
        format!("{BASE16_PREFIX}{hash}")
    }
}

/// Aggregate a set of content hashes into the single hash the envelope signs.
///
/// A single hash aggregates to itself, unhashed. Larger sets are sorted
/// lexicographically, serialized as a JSON string array and hashed, which
/// makes the result independent of the order files were added in. Any
/// implementation must reproduce this bit-exactly, since the aggregate is
/// what gets signed.
pub fn aggregate(hashes: &[String]) -> Result<String, SigilError> {
    match hashes {
        [] => Err(SigilError::EmptyInput),
        [only] => Ok(only.clone()),
        _ => {
            let mut sorted: Vec<&String> = hashes.iter().collect();
            sorted.sort();
            let encoded =
                serde_json::to_vec(&sorted).expect("string array serialization is infallible");
            Ok(hash_bytes(&encoded))
        }
    }
}
