//! Wallet sweep scenarios against an in-process ledger server.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use webcash::core::Amount;
use webcash::protocol::ServerClient;
use webcash::server::economy::WebcashEconomy;
use webcash::server::{self, db, AppState};
use webcash::wallet::Wallet;
use webcash::SecretWebcash;

const INCOMING_SK: &str = "4b4e7e6bb3b07a3c9e2c1ff42ac0d0a2b2aa9872641964bd1e7e6ab6b9db313e";

async fn serve_test_ledger() -> (AppState, String) {
    let pool = db::open_pool("sqlite::memory:", 1).await.unwrap();
    let economy = Arc::new(WebcashEconomy::open(pool).await.unwrap());
    let state = AppState::new(economy);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, format!("http://{addr}"))
}

/// Credit a secret on the ledger, as if it had been mined or received.
async fn fund_ledger(state: &AppState, secret: &SecretWebcash) {
    let public = secret.to_public();
    sqlx::query("INSERT INTO unspent_outputs (hash, amount) VALUES (?1, ?2)")
        .bind(public.pk.to_vec())
        .bind(secret.amount.0)
        .execute(state.economy.pool())
        .await
        .unwrap();
    state.economy.num_unspent.fetch_add(1, Ordering::SeqCst);
}

#[tokio::test]
async fn sweep_replaces_incoming_secret_with_change() {
    let (state, url) = serve_test_ledger().await;
    let incoming = SecretWebcash { amount: Amount(150_000_000), sk: INCOMING_SK.to_owned() };
    fund_ledger(&state, &incoming).await;

    let dir = tempfile::tempdir().unwrap();
    let wallet = Arc::new(Wallet::open(&dir.path().join("wallet")).unwrap());

    let insert_result = {
        let wallet = wallet.clone();
        let incoming = incoming.clone();
        tokio::task::spawn_blocking(move || {
            let client = ServerClient::new(url).unwrap();
            wallet.insert(&client, &incoming, false)
        })
        .await
        .unwrap()
    };
    insert_result.unwrap();

    // The recovery log holds both the incoming secret and the change
    // secret, in acceptance order.
    let log = std::fs::read_to_string(wallet.recovery_log_path()).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("receive"));
    assert!(lines[0].ends_with(&incoming.to_string()));
    assert!(lines[1].contains("change"));
    let change_claim = lines[1].rsplit(' ').next().unwrap();
    let change = SecretWebcash::parse(change_claim).unwrap();
    assert_eq!(change.amount, incoming.amount);
    assert_ne!(change.sk, incoming.sk);

    // Wallet rows: incoming output spent, change output live, value kept.
    assert_eq!(wallet.is_output_spent(&incoming.to_public()).unwrap(), Some(true));
    assert_eq!(wallet.is_output_spent(&change.to_public()).unwrap(), Some(false));
    assert_eq!(wallet.balance().unwrap(), 150_000_000);

    // Ledger rows: the incoming hash was consumed, the change hash issued,
    // total value conserved.
    let incoming_amount: Option<i64> =
        sqlx::query_scalar("SELECT amount FROM unspent_outputs WHERE hash = ?1")
            .bind(incoming.to_public().pk.to_vec())
            .fetch_optional(state.economy.pool())
            .await
            .unwrap();
    assert_eq!(incoming_amount, None);
    let change_amount: Option<i64> =
        sqlx::query_scalar("SELECT amount FROM unspent_outputs WHERE hash = ?1")
            .bind(change.to_public().pk.to_vec())
            .fetch_optional(state.economy.pool())
            .await
            .unwrap();
    assert_eq!(change_amount, Some(150_000_000));
    let spent: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM spent_hashes WHERE hash = ?1)")
            .bind(incoming.to_public().pk.to_vec())
            .fetch_one(state.economy.pool())
            .await
            .unwrap();
    assert!(spent);
    assert_eq!(state.economy.num_replace.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_sweep_leaves_rows_for_replay() {
    let (_state, url) = serve_test_ledger().await;
    // The incoming secret was never credited on the ledger, so the sweep's
    // replace call fails with "missing".
    let incoming = SecretWebcash { amount: Amount(75_000_000), sk: INCOMING_SK.to_owned() };

    let dir = tempfile::tempdir().unwrap();
    let wallet = Arc::new(Wallet::open(&dir.path().join("wallet")).unwrap());

    let insert_result = {
        let wallet = wallet.clone();
        let incoming = incoming.clone();
        tokio::task::spawn_blocking(move || {
            let client = ServerClient::new(url).unwrap();
            wallet.insert(&client, &incoming, true)
        })
        .await
        .unwrap()
    };
    assert!(insert_result.is_err());

    // Both secrets were still logged before the failure.
    let log = std::fs::read_to_string(wallet.recovery_log_path()).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.lines().next().unwrap().contains("mining"));

    // The staged incoming output is still unspent: a later run can replay
    // the sweep because replacement is idempotent on the input hash.
    assert_eq!(wallet.is_output_spent(&incoming.to_public()).unwrap(), Some(false));
}

#[tokio::test]
async fn sweep_of_mined_outputs_end_to_end() {
    // Mine-like flow: credit two outputs, sweep both, balance equals both.
    let (state, url) = serve_test_ledger().await;
    let first = SecretWebcash { amount: Amount(19_000_000_000_000), sk: "a1".repeat(32) };
    let second = SecretWebcash { amount: Amount(1_000_000_000_000), sk: "b2".repeat(32) };
    fund_ledger(&state, &first).await;
    fund_ledger(&state, &second).await;

    let dir = tempfile::tempdir().unwrap();
    let wallet = Arc::new(Wallet::open(&dir.path().join("wallet")).unwrap());

    for secret in [first, second] {
        let wallet = wallet.clone();
        let url = url.clone();
        tokio::task::spawn_blocking(move || {
            let client = ServerClient::new(url).unwrap();
            wallet.insert(&client, &secret, true)
        })
        .await
        .unwrap()
        .unwrap();
    }

    assert_eq!(wallet.balance().unwrap(), 20_000_000_000_000);
    assert_eq!(state.economy.num_replace.load(Ordering::SeqCst), 2);
}
