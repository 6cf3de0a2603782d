//! Ledger server
//!
//! The HTTP surface is a small axum router over a shared [`AppState`]
//! carrying the [`WebcashEconomy`].  All global mutable state of the
//! service lives behind that explicitly-constructed context object.

pub mod db;
pub mod economy;
pub mod handlers;

use crate::error::Result;
use axum::routing::{get, post};
use axum::Router;
use economy::WebcashEconomy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The economy singleton: pool, caches, issuance schedule.
    pub economy: Arc<WebcashEconomy>,
    /// Directory holding the static terms-of-service documents.
    pub terms_dir: PathBuf,
}

impl AppState {
    /// State with the conventional `terms/` document directory.
    pub fn new(economy: Arc<WebcashEconomy>) -> Self {
        AppState { economy, terms_dir: PathBuf::from("terms") }
    }
}

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/terms", get(handlers::terms_html))
        .route("/terms/text", get(handlers::terms_text))
        .route("/api/v1/target", get(handlers::target))
        .route("/api/v1/mining_report", post(handlers::mining_report))
        .route("/api/v1/replace", post(handlers::replace))
        .route("/api/v1/health_check", post(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .with_state(state)
}

/// Bind and serve until the process is terminated.  In-flight requests
/// either commit or roll back at the database layer; partial writes are
/// impossible.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "webcash daemon listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
