//! Webcash server process.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use webcash::config::{ServerArgs, ServerConfig};
use webcash::server::economy::WebcashEconomy;
use webcash::server::{self, db, AppState};
use webcash::utils;
use webcash::Result;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServerArgs::parse();
    utils::init_logging(&args.log_level);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal initialization error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ServerArgs) -> Result<()> {
    let config = ServerConfig::resolve(&args, Path::new("."))?;
    let addr = config.socket_addr()?;

    // Pool sized to the worker count, like the request handling itself.
    let connections = num_cpus::get().clamp(1, 64) as u32;
    let pool = db::open_pool(&config.database, connections).await?;
    let economy = Arc::new(WebcashEconomy::open(pool).await?);

    info!(
        port = config.port,
        database = %config.database,
        num_reports = economy.num_reports.load(std::sync::atomic::Ordering::SeqCst),
        num_unspent = economy.num_unspent.load(std::sync::atomic::Ordering::SeqCst),
        "running webcash daemon"
    );

    server::serve(AppState::new(economy), addr).await
}
