//! HTTP request handlers
//!
//! Every mutating endpoint validates its request fully before touching the
//! database, then performs all ledger writes inside one transaction.  An
//! error anywhere rolls the transaction back and produces the uniform
//! HTTP 500 `{"status":"error","error":<kind>}` response shape.

use crate::core::constants::MIN_REPORT_DIFFICULTY;
use crate::core::pow::{apparent_difficulty, sha256};
use crate::core::{Amount, PublicWebcash, SecretWebcash};
use crate::server::economy::{
    WebcashEconomy, DEFAULT_DIFFICULTY, REPORTS_PER_INTERVAL, TARGET_INTERVAL_SECS,
};
use crate::server::AppState;
use crate::utils;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use tracing::{error, info};

/// Error half of every API handler: renders as HTTP 500 with the uniform
/// JSON error body.
pub struct ApiError(pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "status": "error", "error": self.0 }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        error!(%err, "database error while handling request");
        ApiError("internal server error".to_owned())
    }
}

fn api_error(kind: &str) -> ApiError {
    ApiError(kind.to_owned())
}

/// Result type of the JSON API handlers.
pub type ApiResult = std::result::Result<Json<Value>, ApiError>;

/// `legalese.terms` must be present and true.
fn check_legalese(msg: &Value) -> bool {
    msg.get("legalese")
        .and_then(|legalese| legalese.get("terms"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parse an array of secret claim codes, keyed and deduplicated by public
/// hash.
fn parse_secret_claims(value: &Value) -> Option<BTreeMap<[u8; 32], SecretWebcash>> {
    let array = value.as_array()?;
    let mut claims = BTreeMap::new();
    for item in array {
        let secret = SecretWebcash::parse(item.as_str()?)?;
        let public = secret.to_public();
        if claims.insert(public.pk, secret).is_some() {
            return None; // duplicate
        }
    }
    Some(claims)
}

/// Parse an array of public claim strings, preserving the original text of
/// each entry.
fn parse_public_claims(value: &Value) -> Option<Vec<(String, PublicWebcash)>> {
    let array = value.as_array()?;
    let mut claims = Vec::with_capacity(array.len());
    for item in array {
        let text = item.as_str()?;
        claims.push((text.to_owned(), PublicWebcash::parse(text)?));
    }
    Some(claims)
}

/// Sum claim amounts, requiring each amount and every running total to be
/// positive and representable.
fn sum_claims<'a>(claims: impl Iterator<Item = &'a SecretWebcash>) -> Option<Amount> {
    let mut total = Amount::ZERO;
    for claim in claims {
        if !claim.amount.is_positive() {
            return None;
        }
        total = total.checked_add(claim.amount)?;
        if !total.is_positive() {
            return None;
        }
    }
    Some(total)
}

/// `POST /api/v1/replace` — atomically swap unspent secrets for fresh ones
/// of the same total value.
pub async fn replace(State(state): State<AppState>, body: String) -> ApiResult {
    let received = utils::unix_nanos();
    let msg: Value = serde_json::from_str(&body).map_err(|_| api_error("no JSON body"))?;
    if !msg.is_object() {
        return Err(api_error("no JSON body"));
    }
    if !check_legalese(&msg) {
        return Err(api_error("didn't accept terms"));
    }

    let inputs = msg.get("webcashes").ok_or_else(|| api_error("no inputs"))?;
    let inputs = parse_secret_claims(inputs).ok_or_else(|| api_error("can't parse inputs"))?;
    let total_in = sum_claims(inputs.values()).ok_or_else(|| api_error("overflow"))?;

    let outputs = msg.get("new_webcashes").ok_or_else(|| api_error("no outputs"))?;
    let outputs = parse_secret_claims(outputs).ok_or_else(|| api_error("can't parse outputs"))?;
    let total_out = sum_claims(outputs.values()).ok_or_else(|| api_error("overflow"))?;

    if total_in != total_out {
        return Err(api_error("inbalance"));
    }

    let economy = &state.economy;
    let mut tx = economy.pool().begin().await?;

    // Every input must exist unspent with its claimed value.
    for (pk, claim) in &inputs {
        let amount: Option<i64> =
            sqlx::query_scalar("SELECT amount FROM unspent_outputs WHERE hash = ?1")
                .bind(pk.as_slice())
                .fetch_optional(&mut *tx)
                .await?;
        match amount {
            None => return Err(api_error("missing")),
            Some(amount) if amount != claim.amount.0 => return Err(api_error("wrong amount")),
            Some(_) => {}
        }
    }

    // No output may collide with a live unspent record.
    for pk in outputs.keys() {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM unspent_outputs WHERE hash = ?1)")
                .bind(pk.as_slice())
                .fetch_one(&mut *tx)
                .await?;
        if exists {
            return Err(api_error("reuse"));
        }
    }

    for pk in inputs.keys() {
        sqlx::query("INSERT OR IGNORE INTO spent_hashes (hash) VALUES (?1)")
            .bind(pk.as_slice())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM unspent_outputs WHERE hash = ?1")
            .bind(pk.as_slice())
            .execute(&mut *tx)
            .await?;
    }
    for (pk, claim) in &outputs {
        sqlx::query("INSERT INTO unspent_outputs (hash, amount) VALUES (?1, ?2)")
            .bind(pk.as_slice())
            .bind(claim.amount.0)
            .execute(&mut *tx)
            .await?;
    }

    // Audit log.
    let replacement_id = sqlx::query("INSERT INTO replacements (received) VALUES (?1)")
        .bind(received)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
    for (pk, claim) in &inputs {
        sqlx::query(
            "INSERT INTO replacement_inputs (replacement_id, hash, amount) VALUES (?1, ?2, ?3)",
        )
        .bind(replacement_id)
        .bind(pk.as_slice())
        .bind(claim.amount.0)
        .execute(&mut *tx)
        .await?;
    }
    for (pk, claim) in &outputs {
        sqlx::query(
            "INSERT INTO replacement_outputs (replacement_id, hash, amount) VALUES (?1, ?2, ?3)",
        )
        .bind(replacement_id)
        .bind(pk.as_slice())
        .bind(claim.amount.0)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    economy.num_replace.fetch_add(1, Ordering::SeqCst);
    let delta = outputs.len() as i64 - inputs.len() as i64;
    if delta >= 0 {
        economy.num_unspent.fetch_add(delta as u64, Ordering::SeqCst);
    } else {
        economy.num_unspent.fetch_sub((-delta) as u64, Ordering::SeqCst);
    }

    info!(
        inputs = inputs.len(),
        outputs = outputs.len(),
        total = %total_in,
        "replaced inputs"
    );

    Ok(Json(json!({ "status": "success" })))
}

/// `POST /api/v1/mining_report` — validate a proof-of-work and issue its
/// outputs.
pub async fn mining_report(State(state): State<AppState>, body: String) -> ApiResult {
    let received = utils::unix_nanos();
    let msg: Value = serde_json::from_str(&body).map_err(|_| api_error("no JSON body"))?;
    if !msg.is_object() {
        return Err(api_error("no JSON body"));
    }
    if !check_legalese(&msg) {
        return Err(api_error("didn't accept terms"));
    }

    let preimage_b64 = msg
        .get("preimage")
        .and_then(Value::as_str)
        .ok_or_else(|| api_error("missing preimage"))?;
    let preimage_bytes = BASE64
        .decode(preimage_b64)
        .map_err(|_| api_error("preimage is not base64-encoded string"))?;
    let preimage: Value = serde_json::from_slice(&preimage_bytes)
        .map_err(|_| api_error("couldn't parse preimage as JSON"))?;

    // 'webcash': the claim codes this report issues.
    let webcash = preimage
        .get("webcash")
        .ok_or_else(|| api_error("missing 'webcash' field in preimage"))?;
    let webcash = parse_secret_claims(webcash).ok_or_else(|| {
        api_error("'webcash' field in preimage needs to be array of webcash secrets")
    })?;

    // 'subsidy': the subset surrendered to the server operator.
    let subsidy = preimage
        .get("subsidy")
        .ok_or_else(|| api_error("missing 'subsidy' field in preimage"))?;
    let subsidy = parse_secret_claims(subsidy).ok_or_else(|| {
        api_error("'subsidy' field in preimage needs to be array of webcash secrets")
    })?;

    let timestamp = match preimage.get("timestamp") {
        None => None,
        Some(value) => Some(
            value
                .as_f64()
                .ok_or_else(|| api_error("'timestamp' field in preimage must be numeric"))?
                as i64,
        ),
    };

    let committed_difficulty = match preimage.get("difficulty") {
        None => None,
        Some(value) => {
            let difficulty = value.as_u64().ok_or_else(|| {
                api_error("'difficulty' field in preimage must be small positive integer")
            })?;
            if difficulty > 255 {
                return Err(api_error("'difficulty' field in preimage is too high"));
            }
            Some(difficulty as u32)
        }
    };

    let mining_amount = sum_claims(webcash.values()).ok_or_else(|| api_error("overflow"))?;
    let subsidy_amount = sum_claims(subsidy.values()).ok_or_else(|| api_error("overflow"))?;

    // Every subsidy entry must appear verbatim among the issued claims.
    for (pk, claim) in &subsidy {
        match webcash.get(pk) {
            None => return Err(api_error("missing subsidy from webcash")),
            Some(issued) if issued.amount != claim.amount => {
                return Err(api_error("subsidy doesn't match webcash"))
            }
            Some(_) => {}
        }
    }
    if webcash.len() < subsidy.len() || mining_amount < subsidy_amount {
        // Should have failed above.
        return Err(api_error("internal server error"));
    }

    if let Some(ts) = timestamp {
        let received_secs = received / 1_000_000_000;
        if (ts - received_secs).abs() > 2 * 60 * 60 {
            return Err(api_error(
                "timestamp of mining report must be within 2 hours of receipt by server",
            ));
        }
    }

    // The proof of work commits to the base64 text, not the decoded JSON.
    let hash = sha256(preimage_b64.as_bytes());
    let bits = apparent_difficulty(&hash);
    if bits < MIN_REPORT_DIFFICULTY {
        return Err(api_error("difficulty too low"));
    }
    if let Some(committed) = committed_difficulty {
        if bits < committed {
            return Err(api_error("proof-of-work doesn't match committed difficulty"));
        }
    }

    let economy = &state.economy;
    let num_reports = economy.num_reports.load(Ordering::SeqCst);
    let mut tx = economy.pool().begin().await?;

    let last: Option<(i64, f64)> = sqlx::query_as(
        "SELECT next_difficulty, aggregate_work FROM mining_reports ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await?;
    let current_difficulty = last.map(|(d, _)| d as u32).unwrap_or(DEFAULT_DIFFICULTY);
    let last_aggregate_work = last.map(|(_, w)| w).unwrap_or(0.0);

    if let Some(committed) = committed_difficulty {
        if committed < current_difficulty {
            return Err(api_error("committed difficulty is less than current difficulty"));
        }
    }
    if bits < current_difficulty {
        // Not necessarily miner error; the difficulty may have moved.
        return Err(api_error("proof of work doesn't meet current difficulty"));
    }

    let reused: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM mining_reports WHERE preimage = ?1)")
            .bind(preimage_b64)
            .fetch_one(&mut *tx)
            .await?;
    if reused {
        return Err(api_error("reused preimage"));
    }

    if mining_amount != WebcashEconomy::mining_amount(num_reports) {
        return Err(api_error("outputs don't match allowed amount"));
    }
    if subsidy_amount != WebcashEconomy::subsidy_amount(num_reports) {
        return Err(api_error("subsidy doesn't match required amount"));
    }

    for pk in webcash.keys() {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM unspent_outputs WHERE hash = ?1)")
                .bind(pk.as_slice())
                .fetch_one(&mut *tx)
                .await?;
        if exists {
            return Err(api_error("output already exists"));
        }
    }
    for (pk, claim) in &webcash {
        sqlx::query("INSERT INTO unspent_outputs (hash, amount) VALUES (?1, ?2)")
            .bind(pk.as_slice())
            .bind(claim.amount.0)
            .execute(&mut *tx)
            .await?;
    }

    // Difficulty retarget: every 128 reports, compare the elapsed time over
    // the look-back window against the schedule and the issuance curve.
    let new_count = num_reports + 1;
    let mut next_difficulty = current_difficulty;
    if new_count % REPORTS_PER_INTERVAL == 0 {
        let window = WebcashEconomy::look_back_window(new_count);
        let past_received: Option<i64> = sqlx::query_scalar(
            "SELECT received FROM mining_reports ORDER BY id DESC LIMIT 1 OFFSET ?1",
        )
        .bind(window as i64 - 1)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(past_ns) = past_received {
            let actual_ns = received - past_ns;
            let expected_ns = window as i64 * TARGET_INTERVAL_SECS as i64 * 1_000_000_000;
            next_difficulty = WebcashEconomy::retarget(
                current_difficulty,
                actual_ns,
                expected_ns,
                WebcashEconomy::circulation_after(new_count),
                economy.expected_circulation(received),
            );
        }
    }

    // Display-only accumulator; precision loss past 2^53 is accepted.
    let aggregate_work = last_aggregate_work + 2f64.powi(current_difficulty as i32);

    sqlx::query(
        "INSERT INTO mining_reports (received, preimage, difficulty, next_difficulty, aggregate_work)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(received)
    .bind(preimage_b64)
    .bind(current_difficulty as i64)
    .bind(next_difficulty as i64)
    .bind(aggregate_work)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    economy.num_reports.fetch_add(1, Ordering::SeqCst);
    economy.num_unspent.fetch_add(webcash.len() as u64, Ordering::SeqCst);
    economy.difficulty.store(next_difficulty, Ordering::SeqCst);

    info!(
        hash = %hex::encode(hash),
        aggregate_work = aggregate_work.log2(),
        difficulty = next_difficulty,
        num_reports = new_count,
        outputs = webcash.len(),
        "accepted mining report"
    );

    Ok(Json(json!({ "status": "success", "difficulty_target": next_difficulty })))
}

/// `GET /api/v1/target` — current difficulty and issuance amounts.
pub async fn target(State(state): State<AppState>) -> Json<Value> {
    let stats = state.economy.stats(utils::unix_nanos());
    Json(json!({
        "difficulty_target_bits": stats.difficulty,
        "epoch": stats.epoch,
        "mining_amount": stats.mining_amount.to_string(),
        "mining_subsidy_amount": stats.subsidy_amount.to_string(),
        "ratio": stats.ratio(),
    }))
}

/// `GET /stats` — public economy statistics.
pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.economy.stats(utils::unix_nanos());

    let total = stats.total_circulation;
    let integer_part = total / 100_000_000;
    let fractional_part = (total % 100_000_000) as i64;
    let circulation: Value = if fractional_part == 0 {
        json!(integer_part as u64)
    } else {
        json!(total as f64 / 100_000_000.0)
    };
    let fraction_suffix = if fractional_part == 0 {
        String::new()
    } else {
        // "0.0123" minus its leading zero.
        Amount(fractional_part).to_string()[1..].to_owned()
    };
    let circulation_formatted =
        format!("{}{}", utils::group_thousands(integer_part), fraction_suffix);

    Json(json!({
        "circulation": circulation,
        "circulation_formatted": circulation_formatted,
        "ratio": stats.ratio(),
        "mining_reports": stats.num_reports,
        "epoch": stats.epoch,
        "difficulty_target_bits": stats.difficulty,
        "mining_amount": stats.mining_amount.to_string(),
        "mining_subsidy_amount": stats.subsidy_amount.to_string(),
    }))
}

/// `POST /api/v1/health_check` — spend state of a batch of public claim
/// strings, keyed by the caller's exact input text.
pub async fn health_check(State(state): State<AppState>, body: String) -> ApiResult {
    let msg: Value = serde_json::from_str(&body).map_err(|_| api_error("no JSON body"))?;
    let claims = parse_public_claims(&msg).ok_or_else(|| {
        api_error("arguments needs to be array of webcash public webcash strings")
    })?;

    let pool = state.economy.pool();
    let mut results = Map::new();
    for (text, public) in claims {
        let unspent: Option<i64> =
            sqlx::query_scalar("SELECT amount FROM unspent_outputs WHERE hash = ?1")
                .bind(public.pk.as_slice())
                .fetch_optional(pool)
                .await?;
        let status = match unspent {
            Some(amount) => json!({ "spent": false, "amount": Amount(amount).to_string() }),
            None => {
                let spent: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM spent_hashes WHERE hash = ?1)",
                )
                .bind(public.pk.as_slice())
                .fetch_one(pool)
                .await?;
                if spent {
                    json!({ "spent": true })
                } else {
                    // A never-seen claim is indicated by a null spent value.
                    json!({ "spent": null })
                }
            }
        };
        results.insert(text, status);
    }

    Ok(Json(json!({ "status": "success", "results": results })))
}

/// `GET /terms` — the HTML terms-of-service document.
pub async fn terms_html(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(state.terms_dir.join("terms.html")).await {
        Ok(body) => Html(body).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /terms/text` — the plain-text terms-of-service document.
pub async fn terms_text(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(state.terms_dir.join("terms.text")).await {
        Ok(body) => {
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
