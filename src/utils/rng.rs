//! Secret generation
//!
//! All claim-code secrets come from a process-wide ChaCha-based CSPRNG
//! seeded from OS entropy.  The submission worker reseeds it periodically;
//! the miner refuses to start if the startup self-test fails.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

static RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

/// 32 fresh random bytes.
pub fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    RNG.lock().fill_bytes(&mut bytes);
    bytes
}

/// A fresh secret key as 64 lowercase hex characters.
pub fn fresh_secret_hex() -> String {
    hex::encode(random_bytes())
}

/// Replace the generator state with fresh OS entropy.
pub fn reseed() {
    *RNG.lock() = StdRng::from_entropy();
}

/// Startup self-test: consecutive draws must be non-zero and distinct.
/// A failure here means the entropy source is broken and no secret the
/// process would generate can be trusted.
pub fn sanity_check() -> bool {
    let a = random_bytes();
    let b = random_bytes();
    a != [0u8; 32] && b != [0u8; 32] && a != b
}
