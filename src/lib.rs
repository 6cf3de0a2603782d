//! # Webcash
//!
//! A centralized digital-cash service: clients mine SHA-256 proof-of-work
//! solutions that entitle them to newly issued cash, and cash consists of
//! opaque secret claim codes that are transferred off-ledger and atomically
//! *replaced* on the server for fresh secrets when ownership changes hands.
//!
//! The crate builds two binaries:
//!
//! - `webminer` — a multi-threaded mining client with a crash-safe local
//!   wallet.
//! - `webcashd` — the trusted ledger server, JSON-over-HTTP backed by a
//!   transactional SQLite store.

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod utils;
pub mod wallet;
pub mod workers;

pub use crate::core::{Amount, PublicWebcash, SecretWebcash};
pub use crate::error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
