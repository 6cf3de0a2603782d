//! Economy state
//!
//! [`WebcashEconomy`] owns the database pool and a set of cached atomic
//! counters.  The counters are updated after each committed transaction
//! and may be read without touching the database; the tables remain the
//! source of truth and the caches are reloaded from them on startup.

use crate::core::Amount;
use crate::error::Result;
use crate::utils;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Value issued per mining report during epoch 0, in 1e-8 units
/// (200,000 webcash).
pub const INITIAL_MINING_AMOUNT: i64 = 20_000_000_000_000;

/// Subsidy portion of the epoch-0 mining amount (10,000 webcash).
pub const INITIAL_SUBSIDY_AMOUNT: i64 = 1_000_000_000_000;

/// Mining reports per issuance epoch; amounts halve at each boundary.
pub const REPORTS_PER_EPOCH: u64 = 525_000;

/// Target seconds between accepted mining reports.
pub const TARGET_INTERVAL_SECS: u64 = 10;

/// Difficulty before the first report is accepted.
pub const DEFAULT_DIFFICULTY: u32 = 28;

/// Difficulty is re-evaluated every this many reports.
pub const REPORTS_PER_INTERVAL: u64 = 128;

/// Reports considered when comparing actual to expected elapsed time.
pub const LOOK_BACK_WINDOW: u64 = 128;

/// After this epoch both issuance amounts are zero.
const MAX_HALVINGS: u64 = 63;

const TARGET_INTERVAL_NS: i64 = TARGET_INTERVAL_SECS as i64 * 1_000_000_000;

/// Aggregate snapshot returned by [`WebcashEconomy::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebcashStats {
    /// Time the snapshot was taken, Unix nanoseconds.
    pub timestamp_ns: i64,
    /// Value issued so far, in 1e-8 units.
    pub total_circulation: u128,
    /// Value the issuance schedule calls for at this time.
    pub expected_circulation: u128,
    /// Accepted mining reports.
    pub num_reports: u64,
    /// Committed replacements.
    pub num_replace: u64,
    /// Live unspent outputs.
    pub num_unspent: u64,
    /// Per-report issuance at the snapshot's epoch.
    pub mining_amount: Amount,
    /// Per-report subsidy at the snapshot's epoch.
    pub subsidy_amount: Amount,
    /// Issuance epoch.
    pub epoch: u64,
    /// Current difficulty.
    pub difficulty: u32,
}

impl WebcashStats {
    /// Issued-to-expected circulation ratio; 1.0 while either side is zero
    /// to avoid transient startup noise.
    pub fn ratio(&self) -> f64 {
        if self.total_circulation > 0 && self.expected_circulation > 0 {
            self.total_circulation as f64 / self.expected_circulation as f64
        } else {
            1.0
        }
    }
}

/// The server's economy state: database pool plus cached counters.
pub struct WebcashEconomy {
    pool: SqlitePool,
    /// Current difficulty, as recorded by the last accepted report.
    pub difficulty: AtomicU32,
    /// Accepted mining reports.
    pub num_reports: AtomicU64,
    /// Committed replacements.
    pub num_replace: AtomicU64,
    /// Live unspent outputs.
    pub num_unspent: AtomicU64,
    genesis_ns: i64,
}

impl WebcashEconomy {
    /// Load the cached counters from the durable tables.  The genesis
    /// timestamp is recorded on first boot and treated as constant
    /// afterwards.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let num_reports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mining_reports")
            .fetch_one(&pool)
            .await?;
        let num_replace: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replacements")
            .fetch_one(&pool)
            .await?;
        let num_unspent: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unspent_outputs")
            .fetch_one(&pool)
            .await?;
        let difficulty: Option<i64> = sqlx::query_scalar(
            "SELECT next_difficulty FROM mining_reports ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&pool)
        .await?;

        let genesis: Option<String> =
            sqlx::query_scalar("SELECT value FROM meta WHERE key = 'genesis_ns'")
                .fetch_optional(&pool)
                .await?;
        let genesis_ns = match genesis.and_then(|v| v.parse().ok()) {
            Some(ns) => ns,
            None => {
                let now = utils::unix_nanos();
                sqlx::query("INSERT OR IGNORE INTO meta (key, value) VALUES ('genesis_ns', ?1)")
                    .bind(now.to_string())
                    .execute(&pool)
                    .await?;
                now
            }
        };

        Ok(WebcashEconomy {
            pool,
            difficulty: AtomicU32::new(
                difficulty.map(|d| d as u32).unwrap_or(DEFAULT_DIFFICULTY),
            ),
            num_reports: AtomicU64::new(num_reports as u64),
            num_replace: AtomicU64::new(num_replace as u64),
            num_unspent: AtomicU64::new(num_unspent as u64),
            genesis_ns,
        })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Genesis time in Unix nanoseconds.
    pub fn genesis_ns(&self) -> i64 {
        self.genesis_ns
    }

    /// The issuance epoch after `num_reports` accepted reports.
    pub fn epoch(num_reports: u64) -> u64 {
        num_reports / REPORTS_PER_EPOCH
    }

    /// Total value a mining report may claim, as a pure function of the
    /// report count.
    pub fn mining_amount(num_reports: u64) -> Amount {
        let epoch = Self::epoch(num_reports);
        if epoch > MAX_HALVINGS {
            Amount::ZERO
        } else {
            Amount(INITIAL_MINING_AMOUNT >> epoch)
        }
    }

    /// Subsidy a mining report must surrender, as a pure function of the
    /// report count.
    pub fn subsidy_amount(num_reports: u64) -> Amount {
        let epoch = Self::epoch(num_reports);
        if epoch > MAX_HALVINGS {
            Amount::ZERO
        } else {
            Amount(INITIAL_SUBSIDY_AMOUNT >> epoch)
        }
    }

    /// Total value issued by the first `reports` accepted reports,
    /// piecewise over epochs with per-epoch halving.
    pub fn circulation_after(reports: u64) -> u128 {
        let mut total: u128 = 0;
        let mut remaining = reports;
        let mut epoch = 0u64;
        let mut value = INITIAL_MINING_AMOUNT as u128;
        while remaining > REPORTS_PER_EPOCH {
            total += value * REPORTS_PER_EPOCH as u128;
            remaining -= REPORTS_PER_EPOCH;
            epoch += 1;
            value = if epoch > MAX_HALVINGS {
                0
            } else {
                (INITIAL_MINING_AMOUNT as u128) >> epoch
            };
        }
        total + remaining as u128 * value
    }

    /// Value the issuance schedule calls for at the given time.
    pub fn expected_circulation(&self, now_ns: i64) -> u128 {
        let elapsed = (now_ns - self.genesis_ns).max(0);
        Self::circulation_after((elapsed / TARGET_INTERVAL_NS) as u64)
    }

    /// The look-back window used by the difficulty retarget at the given
    /// (post-insert) report count.  At exactly the first retarget there is
    /// no report before the window, so it shrinks by one to land on the
    /// first report.
    pub fn look_back_window(new_count: u64) -> u64 {
        if new_count == LOOK_BACK_WINDOW {
            LOOK_BACK_WINDOW - 1
        } else {
            LOOK_BACK_WINDOW
        }
    }

    /// The difficulty retarget rule: raise when reports arrive early while
    /// issuance runs ahead of schedule, lower when they arrive late while
    /// issuance lags, otherwise hold.
    pub fn retarget(
        current: u32,
        actual_ns: i64,
        expected_ns: i64,
        total_circulation: u128,
        expected_circulation: u128,
    ) -> u32 {
        let mut next = current;
        if actual_ns <= expected_ns && expected_circulation <= total_circulation {
            next += 1;
        }
        if expected_ns <= actual_ns && total_circulation <= expected_circulation {
            next = next.saturating_sub(1);
        }
        next
    }

    /// Coherent statistics snapshot.
    ///
    /// The counters are updated independently after commits, so the pair
    /// (num_reports, difficulty) is re-read until stable; the remaining
    /// counters may lag each other by design.
    pub fn stats(&self, now_ns: i64) -> WebcashStats {
        let (num_reports, difficulty) = loop {
            let n = self.num_reports.load(Ordering::SeqCst);
            let d = self.difficulty.load(Ordering::SeqCst);
            if n == self.num_reports.load(Ordering::SeqCst) {
                break (n, d);
            }
        };

        let epoch = Self::epoch(num_reports);
        WebcashStats {
            timestamp_ns: now_ns,
            total_circulation: Self::circulation_after(num_reports),
            expected_circulation: self.expected_circulation(now_ns),
            num_reports,
            num_replace: self.num_replace.load(Ordering::SeqCst),
            num_unspent: self.num_unspent.load(Ordering::SeqCst),
            mining_amount: Self::mining_amount(num_reports),
            subsidy_amount: Self::subsidy_amount(num_reports),
            epoch,
            difficulty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::db;

    #[test]
    fn test_issuance_schedule() {
        assert_eq!(WebcashEconomy::mining_amount(0), Amount(20_000_000_000_000));
        assert_eq!(WebcashEconomy::subsidy_amount(0), Amount(1_000_000_000_000));
        // First halving.
        assert_eq!(
            WebcashEconomy::mining_amount(REPORTS_PER_EPOCH),
            Amount(10_000_000_000_000)
        );
        assert_eq!(
            WebcashEconomy::subsidy_amount(REPORTS_PER_EPOCH),
            Amount(500_000_000_000)
        );
        // Issuance ends after epoch 63.
        assert_eq!(WebcashEconomy::mining_amount(64 * REPORTS_PER_EPOCH), Amount::ZERO);
        assert_eq!(WebcashEconomy::subsidy_amount(64 * REPORTS_PER_EPOCH), Amount::ZERO);
    }

    #[test]
    fn test_circulation_piecewise() {
        assert_eq!(WebcashEconomy::circulation_after(0), 0);
        assert_eq!(WebcashEconomy::circulation_after(1), 20_000_000_000_000);
        assert_eq!(
            WebcashEconomy::circulation_after(REPORTS_PER_EPOCH),
            REPORTS_PER_EPOCH as u128 * 20_000_000_000_000
        );
        // One report into epoch 1 adds the halved amount.
        assert_eq!(
            WebcashEconomy::circulation_after(REPORTS_PER_EPOCH + 1),
            REPORTS_PER_EPOCH as u128 * 20_000_000_000_000 + 10_000_000_000_000
        );
    }

    #[test]
    fn test_mining_issuance_law() {
        // sum over the first n reports of mining_amount(i) equals the
        // piecewise circulation total across an epoch boundary.
        let window = 3u64;
        for base in [0u64, REPORTS_PER_EPOCH - 2] {
            let mut expected = WebcashEconomy::circulation_after(base);
            for i in base..base + window {
                expected += WebcashEconomy::mining_amount(i).0 as u128;
            }
            assert_eq!(WebcashEconomy::circulation_after(base + window), expected);
        }
    }

    #[test]
    fn test_look_back_window_boundary() {
        assert_eq!(WebcashEconomy::look_back_window(128), 127);
        assert_eq!(WebcashEconomy::look_back_window(256), 128);
        assert_eq!(WebcashEconomy::look_back_window(384), 128);
    }

    #[test]
    fn test_retarget_rule() {
        let hour = 3_600_000_000_000i64;
        // Early and ahead of the curve: raise.
        assert_eq!(WebcashEconomy::retarget(28, hour / 2, hour, 100, 50), 29);
        // Late and behind the curve: lower.
        assert_eq!(WebcashEconomy::retarget(28, 2 * hour, hour, 50, 100), 27);
        // Early but behind: hold.
        assert_eq!(WebcashEconomy::retarget(28, hour / 2, hour, 50, 100), 28);
        // Late but ahead: hold.
        assert_eq!(WebcashEconomy::retarget(28, 2 * hour, hour, 100, 50), 28);
        // Zero never underflows.
        assert_eq!(WebcashEconomy::retarget(0, 2 * hour, hour, 50, 100), 0);
    }

    #[tokio::test]
    async fn test_fresh_economy_stats() {
        let pool = db::open_pool("sqlite::memory:", 1).await.unwrap();
        let economy = WebcashEconomy::open(pool).await.unwrap();

        let stats = economy.stats(economy.genesis_ns());
        assert_eq!(stats.num_reports, 0);
        assert_eq!(stats.num_replace, 0);
        assert_eq!(stats.num_unspent, 0);
        assert_eq!(stats.difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(stats.epoch, 0);
        assert_eq!(stats.total_circulation, 0);
        assert_eq!(stats.expected_circulation, 0);
        assert_eq!(stats.mining_amount, Amount(20_000_000_000_000));
        assert_eq!(stats.subsidy_amount, Amount(1_000_000_000_000));
        assert_eq!(stats.ratio(), 1.0);

        // Ten seconds later the schedule expects one report's issuance.
        let later = economy.genesis_ns() + 10_000_000_000;
        let stats = economy.stats(later);
        assert_eq!(stats.expected_circulation, 20_000_000_000_000);
    }

    #[tokio::test]
    async fn test_genesis_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("economy.db");
        let database = db_path.to_str().unwrap().to_owned();

        let first_genesis = {
            let pool = db::open_pool(&database, 1).await.unwrap();
            let economy = WebcashEconomy::open(pool).await.unwrap();
            economy.genesis_ns()
        };
        let pool = db::open_pool(&database, 1).await.unwrap();
        let economy = WebcashEconomy::open(pool).await.unwrap();
        assert_eq!(economy.genesis_ns(), first_genesis);
    }
}
