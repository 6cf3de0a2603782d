//! Wire protocol: JSON-over-HTTP message types and the blocking client
//! used by the miner and the wallet.

pub mod client;
pub mod messages;

pub use client::{ReportOutcome, ServerClient};
pub use messages::{HealthCheckStatus, Legalese, ProtocolSettings, ReplaceRequest};
