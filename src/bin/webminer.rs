//! Webcash mining daemon.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use webcash::config::MinerArgs;
use webcash::protocol::ServerClient;
use webcash::utils::{self, rng};
use webcash::wallet::Wallet;
use webcash::workers::{miner, submit, MinerContext};
use webcash::{Error, Result};

fn main() -> ExitCode {
    let args = MinerArgs::parse();
    utils::init_logging(&args.log_level);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal initialization error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: MinerArgs) -> Result<()> {
    let workers = args.worker_count()?;

    // Open the wallet first; a wallet held by another process is fatal.
    let wallet = Arc::new(Wallet::open(&args.walletfile)?);
    let client = ServerClient::new(args.server.clone())?;

    info!("fetching current terms of service from server");
    let terms = client.terms_text()?;
    if !wallet.are_terms_accepted(&terms)? {
        let updated = if wallet.have_accepted_terms()? { "updated " } else { "" };
        if args.acceptterms {
            info!("auto-accepting {updated}terms of service");
        } else {
            println!("\n{}\n", terms.trim());
            print!("Do you accept these {updated}terms of service? (y/N): ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            if !line.trim_start().to_ascii_lowercase().starts_with('y') {
                return Err(Error::config("terms of service not accepted by user"));
            }
        }
        wallet.accept_terms(&terms)?;
    }
    info!("terms of service accepted");

    // Create the side logs up front so the user sees the files before any
    // solution needs them.
    submit::touch_log(&args.webcashlog)?;
    submit::touch_log(&args.orphanlog)?;

    if !rng::sanity_check() {
        return Err(Error::config("RNG sanity check failed; RNG is not secure"));
    }

    info!(maxdifficulty = args.maxdifficulty, "setting maximum difficulty");

    let settings = client.protocol_settings()?;
    info!(
        difficulty = settings.difficulty,
        ratio = settings.ratio,
        "server settings"
    );

    let ctx = Arc::new(MinerContext::new());
    ctx.apply_settings(&settings);

    // Submission worker: drains the solution queue, refreshes settings,
    // reseeds the RNG.
    let submit_handle = {
        let ctx = ctx.clone();
        let wallet = wallet.clone();
        let client = client.clone();
        let logs = submit::SideLogs {
            webcash_log: args.webcashlog.clone(),
            orphan_log: args.orphanlog.clone(),
        };
        thread::Builder::new()
            .name("submit".to_owned())
            .spawn(move || submit::submission_thread(ctx, client, wallet, logs))?
    };

    info!(workers, "spawning worker threads");
    let mut mining_threads = Vec::with_capacity(workers);
    for id in 0..workers {
        let ctx = ctx.clone();
        let maxdifficulty = args.maxdifficulty;
        mining_threads.push(
            thread::Builder::new()
                .name(format!("miner-{id}"))
                .spawn(move || miner::mining_thread(ctx, maxdifficulty))?,
        );
    }

    for handle in mining_threads {
        let _ = handle.join();
    }
    let _ = submit_handle.join();

    Ok(())
}
