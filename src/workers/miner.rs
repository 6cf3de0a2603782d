//! Mining search threads
//!
//! Each thread independently builds a candidate preimage around two fresh
//! secrets, seeds a SHA-256 midstate with the base64 prefix, and scans all
//! ordered pairs of three-digit nonce slices.  A hit is pushed to the
//! solution queue and the thread restarts with new secrets so that two
//! back-to-back solutions never share a claim code.

use crate::core::pow::{self, Midstate};
use crate::core::SecretWebcash;
use crate::utils::{self, rng};
use crate::workers::{MinerContext, Solution};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Candidates scanned between attempt-counter updates and difficulty
/// re-reads.
const SCAN_BATCH: usize = 200;

/// How long a thread sleeps while the difficulty exceeds the user cap.
const PAUSE_INTERVAL: Duration = Duration::from_secs(5);

/// Build the padded, base64-encoded preimage prefix for one search round.
///
/// The JSON head is padded with spaces to a multiple of 48 bytes and its
/// final byte set to `'1'`, so the base64 encoding is a whole number of
/// 64-byte SHA-256 blocks and every candidate nonce continues the decimal
/// literal the prefix opened.
pub fn build_preimage_prefix(
    keep: &SecretWebcash,
    subsidy: &SecretWebcash,
    difficulty: u32,
    timestamp: f64,
) -> String {
    let subsidy_str = subsidy.to_string();
    let prefix = format!(
        "{{\"legalese\": {{\"terms\": true}}, \"webcash\": [\"{keep}\", \"{subsidy_str}\"], \
         \"subsidy\": [\"{subsidy_str}\"], \"difficulty\": {difficulty}, \
         \"timestamp\": {timestamp}, \"nonce\": "
    );
    let padded_len = 48 * (1 + prefix.len() / 48);
    let mut bytes = prefix.into_bytes();
    bytes.resize(padded_len, b' ');
    bytes[padded_len - 1] = b'1';
    BASE64.encode(bytes)
}

/// Entry point of one search thread.
pub fn mining_thread(ctx: Arc<MinerContext>, max_difficulty: u32) {
    let tail_b64 = pow::NONCE_TAIL_B64.as_bytes();

    while !ctx.shutdown.load(Ordering::Relaxed) {
        let (difficulty, mining_amount, subsidy_amount) = ctx.snapshot();

        // Suspend mining until the difficulty drops below the user cap.
        if difficulty > max_difficulty {
            debug!(difficulty, max_difficulty, "difficulty above cap; pausing");
            thread::sleep(PAUSE_INTERVAL);
            continue;
        }

        let keep = SecretWebcash {
            amount: mining_amount - subsidy_amount,
            sk: rng::fresh_secret_hex(),
        };
        let subsidy = SecretWebcash {
            amount: subsidy_amount,
            sk: rng::fresh_secret_hex(),
        };

        let prefix_b64 =
            build_preimage_prefix(&keep, &subsidy, difficulty, utils::unix_seconds_f64());
        let midstate = Midstate::new(prefix_b64.as_bytes());

        'search: for i in 0..1000usize {
            if ctx.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let slice_i = pow::nonce_slice(i);

            for batch in 0..(1000 / SCAN_BATCH) {
                ctx.attempts.fetch_add(SCAN_BATCH as i64, Ordering::Relaxed);
                let current_difficulty = ctx.difficulty.load(Ordering::Relaxed);

                for j in batch * SCAN_BATCH..(batch + 1) * SCAN_BATCH {
                    let slice_j = pow::nonce_slice(j);
                    let mut tail = [0u8; 12];
                    tail[..4].copy_from_slice(slice_i.as_bytes());
                    tail[4..8].copy_from_slice(slice_j.as_bytes());
                    tail[8..].copy_from_slice(tail_b64);

                    let hash = midstate.finalize_tail(&tail);
                    // Fast filter: two leading zero bytes before the full check.
                    if hash[0] == 0
                        && hash[1] == 0
                        && pow::meets_difficulty(&hash, current_difficulty)
                    {
                        let preimage = format!(
                            "{prefix_b64}{slice_i}{slice_j}{}",
                            pow::NONCE_TAIL_B64
                        );
                        info!(
                            hash = %hex::encode(hash),
                            keep = %keep,
                            "found proof-of-work solution"
                        );
                        ctx.solutions.push_back(
                            Solution { hash, preimage, keep: keep.clone() },
                            &ctx.shutdown,
                        );
                        break 'search;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pow::sha256;
    use crate::core::Amount;
    use serde_json::Value;

    fn test_secrets() -> (SecretWebcash, SecretWebcash) {
        (
            SecretWebcash { amount: Amount(19_000_000_000_000), sk: "ab".repeat(32) },
            SecretWebcash { amount: Amount(1_000_000_000_000), sk: "cd".repeat(32) },
        )
    }

    #[test]
    fn test_prefix_is_block_aligned() {
        let (keep, subsidy) = test_secrets();
        let prefix = build_preimage_prefix(&keep, &subsidy, 28, 1650000000.5);
        // A 48-byte-aligned input base64-encodes to 64-byte-aligned output.
        assert_eq!(prefix.len() % 64, 0);
        assert!(!prefix.contains('='));
    }

    #[test]
    fn test_completed_preimage_is_valid_json() {
        let (keep, subsidy) = test_secrets();
        let prefix = build_preimage_prefix(&keep, &subsidy, 28, 1650000000.0);
        let mut decoded = BASE64.decode(&prefix).unwrap();
        decoded.extend_from_slice(b"042");
        decoded.extend_from_slice(b"777");
        decoded.push(b'}');

        let preimage: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(preimage["legalese"]["terms"], Value::Bool(true));
        assert_eq!(preimage["difficulty"], Value::from(28));
        assert_eq!(preimage["webcash"][0], Value::from(keep.to_string()));
        assert_eq!(preimage["webcash"][1], Value::from(subsidy.to_string()));
        assert_eq!(preimage["subsidy"][0], Value::from(subsidy.to_string()));
        // The padding byte opens the decimal literal the nonce continues.
        assert_eq!(preimage["nonce"], Value::from(1_042_777));
    }

    #[test]
    fn test_candidate_hash_matches_midstate() {
        let (keep, subsidy) = test_secrets();
        let prefix = build_preimage_prefix(&keep, &subsidy, 20, 1650000000.0);
        let midstate = Midstate::new(prefix.as_bytes());

        let slice_i = pow::nonce_slice(42);
        let slice_j = pow::nonce_slice(777);
        let mut tail = [0u8; 12];
        tail[..4].copy_from_slice(slice_i.as_bytes());
        tail[4..8].copy_from_slice(slice_j.as_bytes());
        tail[8..].copy_from_slice(pow::NONCE_TAIL_B64.as_bytes());

        let via_midstate = midstate.finalize_tail(&tail);
        let full = format!("{prefix}{slice_i}{slice_j}{}", pow::NONCE_TAIL_B64);
        assert_eq!(via_midstate, sha256(full.as_bytes()));
    }

    #[test]
    fn test_thread_exits_on_shutdown() {
        let ctx = Arc::new(MinerContext::new());
        // Difficulty above the cap keeps the loop in its pause branch until
        // the shutdown flag flips.
        ctx.difficulty.store(200, Ordering::Relaxed);
        ctx.request_shutdown();
        let handle = {
            let ctx = ctx.clone();
            std::thread::spawn(move || mining_thread(ctx, 80))
        };
        handle.join().unwrap();
    }
}
