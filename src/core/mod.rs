//! Core types for the webcash protocol
//!
//! This module contains the fundamental value types used throughout the
//! crate: the fixed-precision [`Amount`], the secret and public claim-code
//! forms, and the proof-of-work primitives.

mod amount;
pub mod pow;
mod webcash;

pub use amount::Amount;
pub use webcash::{PublicWebcash, SecretWebcash};

/// Protocol constants shared by the miner and the server.
pub mod constants {
    /// Number of base units per whole webcash (1e-8 precision).
    pub const UNITS_PER_COIN: i64 = 100_000_000;

    /// Hex length of a secret key string.
    pub const SECRET_HEX_LEN: usize = 64;

    /// Size of a SHA-256 hash in bytes.
    pub const HASH_SIZE: usize = 32;

    /// Anti-DoS floor: mining reports below this many leading zero bits are
    /// rejected regardless of the current difficulty.
    pub const MIN_REPORT_DIFFICULTY: u32 = 25;
}

#[cfg(test)]
mod tests {
    use super::constants::*;

    #[test]
    fn test_constants() {
        assert_eq!(UNITS_PER_COIN, 100_000_000);
        assert_eq!(SECRET_HEX_LEN, 64);
        assert_eq!(HASH_SIZE, 32);
        assert_eq!(MIN_REPORT_DIFFICULTY, 25);
    }
}
