//! Utility functions and helpers

pub mod rng;

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

/// Initialize logging from a level string such as `info` or `webcash=debug`.
pub fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Current time as whole seconds since the Unix epoch.
pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

/// Current time as fractional seconds since the Unix epoch, the encoding
/// used for the `timestamp` field of a mining preimage.
pub fn unix_seconds_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Current time as nanoseconds since the Unix epoch, the encoding used for
/// `received` columns of the ledger.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as i64
}

/// Format a hash rate for display, e.g. `1.25 Mhps`.
pub fn speed_string(attempts: i64, elapsed: Duration) -> String {
    let speed = attempts as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    if speed < 2e3 {
        format!("{speed:.2} hps")
    } else if speed < 2e6 {
        format!("{:.2} khps", speed / 1e3)
    } else if speed < 2e9 {
        format!("{:.2} Mhps", speed / 1e6)
    } else if speed < 2e12 {
        format!("{:.2} Ghps", speed / 1e9)
    } else {
        format!("{:.2} Thps", speed / 1e12)
    }
}

/// Rough time-to-solution estimate at the given difficulty, e.g. `1d 2h 3m 4s`.
pub fn expect_string(attempts: i64, elapsed: Duration, difficulty: u32) -> String {
    let speed = attempts as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    let expect = (1u128 << difficulty.min(127)) as f64;
    let sec = (expect / speed.max(1.0)).round() as u64;
    let min = sec / 60;
    let hr = min / 60;
    let day = hr / 24;
    let mut res = String::new();
    if day > 0 {
        res.push_str(&format!("{day}d "));
    }
    if hr > 0 {
        res.push_str(&format!("{}h ", hr % 24));
    }
    if min > 0 {
        res.push_str(&format!("{}m ", min % 60));
    }
    res.push_str(&format!("{}s", sec % 60));
    res
}

/// Group an integer with comma thousands separators, e.g. `1,234,567`.
pub fn group_thousands(value: u128) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
