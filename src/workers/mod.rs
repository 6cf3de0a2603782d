//! Mining workers
//!
//! The miner runs a pool of search threads ([`miner`]) feeding a bounded
//! solution queue drained by a single submission worker ([`submit`]).  The
//! shared state that the original program kept in process globals lives in
//! an explicit [`MinerContext`] owned by the binary.

pub mod miner;
pub mod submit;

use crate::core::{Amount, SecretWebcash};
use crate::protocol::ProtocolSettings;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// A solved proof-of-work awaiting submission.
#[derive(Debug, Clone)]
pub struct Solution {
    /// SHA-256 of the base64 preimage.
    pub hash: [u8; 32],
    /// The complete base64-encoded preimage.
    pub preimage: String,
    /// The claim code the miner keeps if the report is accepted.
    pub keep: SecretWebcash,
}

/// Maximum number of queued solutions; search threads block once the
/// submission worker falls this far behind.
const QUEUE_CAPACITY: usize = 64;

/// FIFO solution queue shared between the search threads and the
/// submission worker.
pub struct SolutionQueue {
    queue: Mutex<VecDeque<Solution>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl SolutionQueue {
    fn new() -> Self {
        SolutionQueue {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append a solution, blocking while the queue is full.  Checks the
    /// shutdown flag once a second so a stuck submitter cannot pin the
    /// search threads forever.
    pub fn push_back(&self, solution: Solution, shutdown: &AtomicBool) {
        let mut queue = self.queue.lock();
        while queue.len() >= QUEUE_CAPACITY {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            self.not_full.wait_for(&mut queue, Duration::from_secs(1));
        }
        queue.push_back(solution);
        self.not_empty.notify_all();
    }

    /// Re-queue a solution at the front after a transport failure.  Never
    /// blocks: the transient requeue must not deadlock against a full
    /// queue.
    pub fn push_front(&self, solution: Solution) {
        let mut queue = self.queue.lock();
        queue.push_front(solution);
        self.not_empty.notify_all();
    }

    /// Take the oldest solution, if any.
    pub fn pop_front(&self) -> Option<Solution> {
        let mut queue = self.queue.lock();
        let solution = queue.pop_front();
        if solution.is_some() {
            self.not_full.notify_all();
        }
        solution
    }

    /// Sleep until a solution arrives or the deadline passes.
    pub fn wait_until(&self, deadline: Instant) {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.not_empty.wait_until(&mut queue, deadline);
        }
    }

    /// Number of queued solutions.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared miner state: the cached protocol settings, the attempt counter,
/// the shutdown flag, and the solution queue.
pub struct MinerContext {
    /// Current server difficulty.
    pub difficulty: AtomicU32,
    /// Total value a mining report may claim, in 1e-8 units.
    pub mining_amount: AtomicI64,
    /// Subsidy portion of the mining amount, in 1e-8 units.
    pub subsidy_amount: AtomicI64,
    /// Hash attempts since the last settings fetch.
    pub attempts: AtomicI64,
    /// Set to request that all threads exit at their next loop boundary.
    pub shutdown: AtomicBool,
    /// Solved proof-of-works awaiting submission.
    pub solutions: SolutionQueue,
}

impl MinerContext {
    /// Fresh context with placeholder settings; callers overwrite them from
    /// the server before spawning threads.
    pub fn new() -> Self {
        MinerContext {
            difficulty: AtomicU32::new(16),
            mining_amount: AtomicI64::new(0),
            subsidy_amount: AtomicI64::new(0),
            attempts: AtomicI64::new(0),
            shutdown: AtomicBool::new(false),
            solutions: SolutionQueue::new(),
        }
    }

    /// Store freshly fetched protocol settings.
    pub fn apply_settings(&self, settings: &ProtocolSettings) {
        self.difficulty.store(settings.difficulty, Ordering::Relaxed);
        self.mining_amount.store(settings.mining_amount.0, Ordering::Relaxed);
        self.subsidy_amount.store(settings.subsidy_amount.0, Ordering::Relaxed);
    }

    /// Atomic snapshot of (difficulty, mining amount, subsidy amount).
    pub fn snapshot(&self) -> (u32, Amount, Amount) {
        (
            self.difficulty.load(Ordering::Relaxed),
            Amount(self.mining_amount.load(Ordering::Relaxed)),
            Amount(self.subsidy_amount.load(Ordering::Relaxed)),
        )
    }

    /// Signal all threads to exit at their next loop boundary.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Wake the submission worker so it notices promptly.
        self.solutions.not_empty.notify_all();
    }
}

impl Default for MinerContext {
    fn default() -> Self {
        Self::new()
    }
}
