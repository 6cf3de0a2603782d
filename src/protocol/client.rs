//! Blocking HTTP client for the ledger server API.
//!
//! The miner and the wallet are thread-based, so the client is a thin
//! blocking wrapper over reqwest with the protocol's 60-second read/write
//! timeout.  Transport failures surface as [`Error::Http`]; HTTP error
//! responses surface as [`Error::ServerRejected`] with the body preserved
//! for the caller to classify.

use crate::core::pow::hash_to_decimal;
use crate::core::SecretWebcash;
use crate::error::{Error, Result};
use crate::protocol::messages::{
    amount_from_value, ratio_from_value, HealthCheckStatus, Legalese, MiningReportResponse,
    ProtocolSettings, ReplaceRequest, StatusResponse,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Read/write timeout for every server call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a mining-report submission that received an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The server accepted the report.
    Accepted {
        /// Updated difficulty for future reports, when present.
        difficulty_target: Option<u32>,
    },
    /// HTTP 400 with the server's stable duplicate-secret error string; the
    /// miner reused a secret by coincidence and the solution is not an
    /// orphan.
    DuplicateSecret,
    /// Any other non-200 response.
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },
}

/// The stable error string the server uses for a duplicate secret.
const DUPLICATE_SECRET_ERROR: &str = "Didn't use a new secret value.";

/// Client for the webcash server API.
#[derive(Clone)]
pub struct ServerClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl ServerClient {
    /// Create a client for the given server endpoint, e.g.
    /// `https://webcash.tech`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(ServerClient { base_url, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch the plain-text terms of service.
    pub fn terms_text(&self) -> Result<String> {
        let resp = self.client.get(self.url("/terms/text")).send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(Error::ServerRejected { status: status.as_u16(), body });
        }
        Ok(body)
    }

    /// Fetch the current difficulty, issuance amounts, and circulation
    /// ratio from `/api/v1/target`.
    pub fn protocol_settings(&self) -> Result<ProtocolSettings> {
        let resp = self.client.get(self.url("/api/v1/target")).send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text()?;
            return Err(Error::ServerRejected { status: status.as_u16(), body });
        }
        let body: Value = resp.json()?;

        let difficulty = body
            .get("difficulty_target_bits")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::parse("expected integer 'difficulty_target_bits'"))?
            as u32;
        let ratio = body
            .get("ratio")
            .and_then(ratio_from_value)
            .ok_or_else(|| Error::parse("expected real number 'ratio'"))?;
        let mining_amount = body
            .get("mining_amount")
            .and_then(amount_from_value)
            .filter(|a| a.0 >= 0)
            .ok_or_else(|| Error::parse("expected non-negative 'mining_amount'"))?;
        let subsidy_amount = body
            .get("mining_subsidy_amount")
            .and_then(amount_from_value)
            .filter(|a| a.0 >= 0)
            .ok_or_else(|| Error::parse("expected non-negative 'mining_subsidy_amount'"))?;

        Ok(ProtocolSettings { mining_amount, subsidy_amount, ratio, difficulty })
    }

    /// Submit a solved proof-of-work.
    ///
    /// The `work` field is the hash rendered as an arbitrary-precision
    /// decimal integer, which no fixed-width JSON number type can carry,
    /// so the body is assembled textually.
    pub fn submit_mining_report(
        &self,
        preimage_b64: &str,
        hash: &[u8; 32],
    ) -> Result<ReportOutcome> {
        let body = format!(
            "{{\"preimage\": \"{}\", \"work\": {}, \"legalese\": {{\"terms\": true}}}}",
            preimage_b64,
            hash_to_decimal(hash)
        );
        debug!(url = %self.url("/api/v1/mining_report"), "submitting mining report");
        let resp = self
            .client
            .post(self.url("/api/v1/mining_report"))
            .header("Content-Type", "application/json")
            .body(body)
            .send()?;

        let status = resp.status().as_u16();
        let text = resp.text()?;
        let parsed: MiningReportResponse =
            serde_json::from_str(&text).unwrap_or(MiningReportResponse {
                status: None,
                difficulty_target: None,
                error: None,
            });

        if status == 200 {
            return Ok(ReportOutcome::Accepted { difficulty_target: parsed.difficulty_target });
        }
        if status == 400 && parsed.error.as_deref() == Some(DUPLICATE_SECRET_ERROR) {
            return Ok(ReportOutcome::DuplicateSecret);
        }
        Ok(ReportOutcome::Rejected { status, body: text })
    }

    /// Atomically replace a set of secrets for a new set of the same total
    /// value.
    pub fn replace(&self, inputs: &[SecretWebcash], outputs: &[SecretWebcash]) -> Result<()> {
        let request = ReplaceRequest {
            legalese: Legalese::accepted(),
            webcashes: inputs.iter().map(|wc| wc.to_string()).collect(),
            new_webcashes: outputs.iter().map(|wc| wc.to_string()).collect(),
        };
        let resp = self
            .client
            .post(self.url("/api/v1/replace"))
            .json(&request)
            .send()?;

        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            return Err(Error::ServerRejected { status: status.as_u16(), body: text });
        }
        let parsed: StatusResponse = serde_json::from_str(&text)?;
        if parsed.status.as_deref() != Some("success") {
            return Err(Error::validation(
                parsed.error.unwrap_or_else(|| "unknown".to_owned()),
            ));
        }
        Ok(())
    }

    /// Query the spend state of a set of public claim strings.  Results are
    /// keyed by the exact input strings.
    pub fn health_check(&self, claims: &[String]) -> Result<BTreeMap<String, HealthCheckStatus>> {
        let resp = self
            .client
            .post(self.url("/api/v1/health_check"))
            .json(&claims)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text()?;
            return Err(Error::ServerRejected { status: status.as_u16(), body });
        }
        let body: Value = resp.json()?;
        let results = body
            .get("results")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::parse("missing 'results' object"))?;
        let mut out = BTreeMap::new();
        for (key, value) in results {
            let status: HealthCheckStatus = serde_json::from_value(value.clone())?;
            out.insert(key.clone(), status);
        }
        Ok(out)
    }
}
