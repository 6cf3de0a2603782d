//! Request and response bodies of the server API.
//!
//! Amount-valued fields arrive either as JSON strings or as bare numbers
//! depending on the server generation, so they are deserialized as raw
//! values and converted through the strict amount parser.

use crate::core::Amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terms-of-service acknowledgement carried by every mutating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Legalese {
    /// Must be `true` for the request to be processed.
    pub terms: bool,
}

impl Legalese {
    /// An affirmative acknowledgement.
    pub fn accepted() -> Self {
        Legalese { terms: true }
    }
}

/// `POST /api/v1/replace` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceRequest {
    /// Terms acknowledgement.
    pub legalese: Legalese,
    /// Secrets being spent.
    pub webcashes: Vec<String>,
    /// Fresh secrets replacing them; must sum to the same total.
    pub new_webcashes: Vec<String>,
}

/// Parsed `GET /api/v1/target` response: everything the miner needs to
/// construct valid work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolSettings {
    /// The amount the miner is allowed to claim.
    pub mining_amount: Amount,
    /// The amount which is surrendered to the server operator.
    pub subsidy_amount: Amount,
    /// The ratio of issued to expected circulation.
    pub ratio: f64,
    /// Leading zero bits required for a work candidate to be accepted.
    pub difficulty: u32,
}

/// `POST /api/v1/mining_report` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct MiningReportResponse {
    /// `"success"` or `"error"`.
    #[serde(default)]
    pub status: Option<String>,
    /// The difficulty future reports must meet.
    #[serde(default)]
    pub difficulty_target: Option<u32>,
    /// Error kind on failure.
    #[serde(default)]
    pub error: Option<String>,
}

/// Generic `{status, error}` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    /// `"success"` or `"error"`.
    #[serde(default)]
    pub status: Option<String>,
    /// Error kind on failure.
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-claim result of `POST /api/v1/health_check`.
///
/// `spent` is `None` for a never-seen claim, `Some(false)` for an unspent
/// claim (with its amount), and `Some(true)` for a previously spent one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckStatus {
    /// Spend state; `null` means never seen.
    pub spent: Option<bool>,
    /// Present iff the claim is unspent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

/// Convert a string-or-number JSON value through the strict amount parser.
pub fn amount_from_value(value: &Value) -> Option<Amount> {
    match value {
        Value::String(s) => Amount::parse(s),
        Value::Number(n) => Amount::parse(&n.to_string()),
        _ => None,
    }
}

/// Convert a number-or-string JSON value to a float ratio.
pub fn ratio_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replace_request_shape() {
        let req = ReplaceRequest {
            legalese: Legalese::accepted(),
            webcashes: vec!["e1:secret:aa".into()],
            new_webcashes: vec!["e1:secret:bb".into()],
        };
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(encoded["legalese"]["terms"], json!(true));
        assert_eq!(encoded["webcashes"][0], json!("e1:secret:aa"));
        assert_eq!(encoded["new_webcashes"][0], json!("e1:secret:bb"));
    }

    #[test]
    fn test_amount_from_value() {
        assert_eq!(amount_from_value(&json!("1.5")), Some(Amount(150_000_000)));
        assert_eq!(amount_from_value(&json!(190000)), Some(Amount(19_000_000_000_000)));
        assert_eq!(amount_from_value(&json!(null)), None);
        assert_eq!(amount_from_value(&json!([])), None);
    }

    #[test]
    fn test_ratio_from_value() {
        assert_eq!(ratio_from_value(&json!(1.25)), Some(1.25));
        assert_eq!(ratio_from_value(&json!("0.5")), Some(0.5));
        assert_eq!(ratio_from_value(&json!({})), None);
    }

    #[test]
    fn test_health_check_status_encoding() {
        let never = HealthCheckStatus { spent: None, amount: None };
        assert_eq!(serde_json::to_value(&never).unwrap(), json!({"spent": null}));

        let unspent = HealthCheckStatus { spent: Some(false), amount: Some("1.5".into()) };
        assert_eq!(
            serde_json::to_value(&unspent).unwrap(),
            json!({"spent": false, "amount": "1.5"})
        );
    }

    #[test]
    fn test_mining_report_response_lenient() {
        let ok: MiningReportResponse =
            serde_json::from_str(r#"{"status":"success","difficulty_target":28}"#).unwrap();
        assert_eq!(ok.difficulty_target, Some(28));

        let err: MiningReportResponse =
            serde_json::from_str(r#"{"error":"Didn't use a new secret value."}"#).unwrap();
        assert_eq!(err.error.as_deref(), Some("Didn't use a new secret value."));
        assert_eq!(err.difficulty_target, None);
    }
}
