//! Submission worker
//!
//! A single thread drains the solution queue in FIFO order, submits each
//! proof-of-work to the server, and hands accepted claim codes to the
//! wallet.  Between drains it sleeps on the queue condvar with a deadline
//! equal to the nearer of its two timers: the periodic RNG reseed and the
//! protocol-settings fetch.

use crate::core::pow;
use crate::core::SecretWebcash;
use crate::protocol::{ReportOutcome, ServerClient};
use crate::utils::{self, rng};
use crate::wallet::Wallet;
use crate::workers::{MinerContext, Solution};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How often the process-wide RNG is reseeded from OS entropy.
const RNG_RESEED_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// How often the protocol settings are refetched.
const SETTINGS_FETCH_INTERVAL: Duration = Duration::from_secs(15);

/// File targets for solutions and claim codes that could not take the
/// normal path.
pub struct SideLogs {
    /// Claim codes that could not be inserted into the wallet.
    pub webcash_log: PathBuf,
    /// Rejected solutions, kept for postmortem.
    pub orphan_log: PathBuf,
}

/// Entry point of the submission worker thread.
pub fn submission_thread(
    ctx: Arc<MinerContext>,
    client: ServerClient,
    wallet: Arc<Wallet>,
    logs: SideLogs,
) {
    let mut reseed_rng = true;
    let mut fetch_settings = true;
    let mut first_run = true;
    let mut next_reseed = Instant::now();
    let mut next_fetch = Instant::now();
    let mut last_fetch = Instant::now();

    while !ctx.shutdown.load(Ordering::Relaxed) {
        if reseed_rng {
            reseed_rng = false;
            rng::reseed();
            next_reseed = Instant::now() + RNG_RESEED_INTERVAL;
        }

        if fetch_settings {
            fetch_settings = false;
            let now = Instant::now();
            let attempts = ctx.attempts.swap(0, Ordering::Relaxed);
            match client.protocol_settings() {
                Ok(settings) => {
                    if !first_run {
                        info!(
                            difficulty = settings.difficulty,
                            ratio = settings.ratio,
                            speed = %utils::speed_string(attempts, now - last_fetch),
                            expect = %utils::expect_string(attempts, now - last_fetch, settings.difficulty),
                            "server settings"
                        );
                    }
                    first_run = false;
                    ctx.apply_settings(&settings);
                }
                Err(err) => warn!(%err, "failed to fetch protocol settings"),
            }
            last_fetch = now;
            next_fetch = now + SETTINGS_FETCH_INTERVAL;
        }

        while let Some(solution) = ctx.solutions.pop_front() {
            let current_difficulty = ctx.difficulty.load(Ordering::Relaxed);
            let apparent = pow::apparent_difficulty(&solution.hash);

            // The difficulty may have moved against us while the solution
            // sat in the queue.
            if apparent < current_difficulty {
                warn!(apparent, current_difficulty, "stale mining report detected; skipping");
                log_orphan(&logs.orphan_log, &solution, apparent);
                continue;
            }

            match client.submit_mining_report(&solution.preimage, &solution.hash) {
                Err(err) => {
                    // No response at all: transient error or server timeout.
                    // Re-queue at the front and wait for the next wake-up.
                    error!(%err, "no response to mining report; waiting to re-attempt");
                    ctx.solutions.push_front(solution);
                    break;
                }
                Ok(ReportOutcome::Rejected { status, body }) => {
                    error!(status, %body, "mining report rejected");
                    // The current difficulty likely changed; refetch now.
                    next_fetch = Instant::now();
                    log_orphan(&logs.orphan_log, &solution, apparent);
                }
                Ok(outcome) => {
                    if let ReportOutcome::Accepted { difficulty_target: Some(bits) } = outcome {
                        let old_bits = ctx.difficulty.swap(bits, Ordering::Relaxed);
                        if old_bits != bits {
                            info!(difficulty = bits, "difficulty adjustment occurred");
                        }
                    }
                    if let Err(err) = wallet.insert(&client, &solution.keep, true) {
                        // The report was accepted, so the claim code has
                        // value; never lose it.
                        error!(%err, "wallet insert failed; saving claim code to side log");
                        log_claim(&logs.webcash_log, &solution.keep);
                    }
                }
            }
        }

        ctx.solutions.wait_until(next_reseed.min(next_fetch));
        let now = Instant::now();
        if now >= next_reseed {
            reseed_rng = true;
        }
        if now >= next_fetch {
            fetch_settings = true;
        }
    }
}

/// Create a side log if it does not exist yet, so the user sees the file
/// before anything needs to be written to it.
pub fn touch_log(path: &Path) -> std::io::Result<()> {
    OpenOptions::new().append(true).create(true).open(path).map(|_| ())
}

/// Append a rejected solution to the orphan log.
fn log_orphan(path: &Path, solution: &Solution, apparent_difficulty: u32) {
    let line = format!(
        "{} {} {} difficulty={}\n",
        solution.preimage,
        hex::encode(solution.hash),
        solution.keep,
        apparent_difficulty
    );
    if let Err(err) = append_line(path, &line) {
        error!(%err, path = %path.display(), "failed to write orphan log");
    }
}

/// Append a claim code to the webcash side log.
pub fn log_claim(path: &Path, claim: &SecretWebcash) {
    if let Err(err) = append_line(path, &format!("{claim}\n")) {
        error!(%err, path = %path.display(), "failed to write claim code log");
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()
}
