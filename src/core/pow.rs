//! Proof-of-work primitives
//!
//! Work candidates are base64-encoded JSON preimages; a candidate is
//! accepted when the SHA-256 of the base64 text has at least the current
//! difficulty's count of leading zero bits.  The miner exploits the fact
//! that a 48-byte-aligned preimage prefix base64-encodes to a whole number
//! of 64-byte SHA-256 blocks: the hash state after the prefix is computed
//! once and only the short nonce tail is hashed per candidate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

/// Base64 encoding of the closing `}` of a preimage, appended after the
/// nonce slices to complete a candidate.
pub const NONCE_TAIL_B64: &str = "fQ==";

/// Count of leading zero bits of a hash.
pub fn apparent_difficulty(hash: &[u8; 32]) -> u32 {
    let mut bits = 0;
    for &c in hash {
        if c == 0x00 {
            bits += 8;
            continue;
        }
        return bits
            + match c {
                0x01 => 7,
                0x02..=0x03 => 6,
                0x04..=0x07 => 5,
                0x08..=0x0f => 4,
                0x10..=0x1f => 3,
                0x20..=0x3f => 2,
                0x40..=0x7f => 1,
                _ => 0,
            };
    }
    bits
}

/// Whether a hash satisfies the given difficulty.
pub fn meets_difficulty(hash: &[u8; 32], difficulty: u32) -> bool {
    apparent_difficulty(hash) >= difficulty
}

/// SHA-256 of a byte string.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hash state seeded with a candidate prefix.
///
/// The prefix must base64-encode the 48-byte-aligned preimage head so the
/// state lands exactly on a block boundary; finalizing a tail then costs a
/// single block of compression per candidate.
#[derive(Clone)]
pub struct Midstate {
    hasher: Sha256,
}

impl Midstate {
    /// Seed the state with the base64 prefix.
    pub fn new(prefix: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prefix);
        Midstate { hasher }
    }

    /// Hash of prefix || tail.
    pub fn finalize_tail(&self, tail: &[u8]) -> [u8; 32] {
        let mut hasher = self.hasher.clone();
        hasher.update(tail);
        hasher.finalize().into()
    }
}

/// Render a hash as a big-endian decimal integer, the encoding the server
/// expects for the `work` field of a mining report.
pub fn hash_to_decimal(hash: &[u8; 32]) -> String {
    BigUint::from_bytes_be(hash).to_str_radix(10)
}

static NONCE_TABLE: Lazy<String> = Lazy::new(|| {
    let mut table = String::with_capacity(4000);
    for i in 0..1000 {
        table.push_str(&BASE64.encode(format!("{i:03}")));
    }
    table
});

/// Table of the base64 encodings of the three-digit decimal strings
/// `000`..`999`.  Each aligned 3-byte group encodes to exactly 4 base64
/// characters, so slice `i` lives at `4*i..4*i+4`.
pub fn nonce_table() -> &'static str {
    &NONCE_TABLE
}

/// The 4-character base64 slice for three-digit nonce `i`.
pub fn nonce_slice(i: usize) -> &'static str {
    &NONCE_TABLE[4 * i..4 * i + 4]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apparent_difficulty() {
        let mut hash = [0xffu8; 32];
        hash[0] = 0x00;
        hash[1] = 0x00;
        hash[2] = 0x01;
        assert_eq!(apparent_difficulty(&hash), 23);

        assert_eq!(apparent_difficulty(&[0u8; 32]), 256);
        assert_eq!(apparent_difficulty(&[0xff; 32]), 0);

        let mut one_bit = [0u8; 32];
        one_bit[0] = 0x80;
        assert_eq!(apparent_difficulty(&one_bit), 0);
        one_bit[0] = 0x40;
        assert_eq!(apparent_difficulty(&one_bit), 1);
    }

    #[test]
    fn test_meets_difficulty_monotone() {
        let mut hash = [0xffu8; 32];
        hash[0] = 0x00;
        hash[1] = 0x00;
        hash[2] = 0x01;
        assert!(meets_difficulty(&hash, 16));
        assert!(meets_difficulty(&hash, 23));
        assert!(!meets_difficulty(&hash, 24));
        // d' <= d implies every hash meeting d also meets d'
        for d in 0..=23 {
            assert!(meets_difficulty(&hash, d));
        }
    }

    #[test]
    fn test_midstate_matches_direct_hash() {
        let prefix = b"eyJsZWdhbGVzZSI6IHsidGVybXMiOiB0cnVlfSwg";
        let tail = b"MDAwMDAxfQ==";
        let midstate = Midstate::new(prefix);
        let mut direct = Vec::new();
        direct.extend_from_slice(prefix);
        direct.extend_from_slice(tail);
        assert_eq!(midstate.finalize_tail(tail), sha256(&direct));
        // The midstate is reusable across tails.
        assert_eq!(midstate.finalize_tail(b"fQ=="), {
            let mut d2 = prefix.to_vec();
            d2.extend_from_slice(b"fQ==");
            sha256(&d2)
        });
    }

    #[test]
    fn test_hash_to_decimal() {
        let mut hash = [0u8; 32];
        hash[31] = 0x01;
        assert_eq!(hash_to_decimal(&hash), "1");
        hash[31] = 0xff;
        assert_eq!(hash_to_decimal(&hash), "255");
        hash[30] = 0x01;
        assert_eq!(hash_to_decimal(&hash), "511");
        assert_eq!(
            hash_to_decimal(&[0xff; 32]),
            BigUint::parse_bytes(
                b"ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
                16
            )
            .unwrap()
            .to_str_radix(10)
        );
    }

    #[test]
    fn test_nonce_table() {
        let table = nonce_table();
        assert_eq!(table.len(), 4000);
        assert!(table.starts_with("MDAwMDAxMDAy")); // "000", "001", "002"
        assert!(table.ends_with("OTk5")); // "999"
        assert_eq!(nonce_slice(0), "MDAw");
        assert_eq!(nonce_slice(999), "OTk5");
        // Each slice decodes back to its three-digit string.
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        for i in [0usize, 7, 42, 100, 500, 999] {
            let decoded = STANDARD.decode(nonce_slice(i)).unwrap();
            assert_eq!(decoded, format!("{i:03}").into_bytes());
        }
    }

    #[test]
    fn test_nonce_tail_decodes_to_brace() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        assert_eq!(STANDARD.decode(NONCE_TAIL_B64).unwrap(), b"}");
    }
}
