//! Response envelope
//!
//! Every entry point answers with the same shape: a `summary` block with the
//! action, stable code and human message, then timestamp and schema version,
//! with the success payload flattened alongside. Infrastructure failures are
//! collapsed to a generic `INTERNAL_ERROR` here; the real cause is logged,
//! never surfaced.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RaidError;

pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;

pub const CODE_OK: &str = "OK";

#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeSummary {
    pub action: &'static str,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub summary: EnvelopeSummary,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(action: &'static str, data: T, now: DateTime<Utc>) -> Self {
        Self {
            summary: EnvelopeSummary {
                action,
                code: CODE_OK,
                message: String::new(),
            },
            updated_at: now,
            schema_version: ENVELOPE_SCHEMA_VERSION,
            data: Some(data),
        }
    }

    pub fn fail(action: &'static str, err: &RaidError, now: DateTime<Utc>) -> Self {
        let message = if err.is_internal() {
            "internal error".to_string()
        } else {
            err.to_string()
        };
        Self {
            summary: EnvelopeSummary {
                action,
                code: err.code(),
                message,
            },
            updated_at: now,
            schema_version: ENVELOPE_SCHEMA_VERSION,
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.summary.code == CODE_OK
    }

    pub fn code(&self) -> &'static str {
        self.summary.code
    }

    pub fn message(&self) -> &str {
        &self.summary.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[derive(Serialize)]
    struct Payload {
        hp_left: i64,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 31, 16, 0, 0).unwrap()
    }

    #[test]
    fn test_success_flattens_payload() {
        let env = Envelope::ok("boss_status", Payload { hp_left: 42 }, now());
        assert!(env.is_ok());
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["summary"]["code"], json!("OK"));
        assert_eq!(value["summary"]["action"], json!("boss_status"));
        assert_eq!(value["hp_left"], json!(42));
        assert_eq!(value["schema_version"], json!(ENVELOPE_SCHEMA_VERSION));
    }

    #[test]
    fn test_domain_failure_keeps_code_and_message() {
        let err = RaidError::DailyLimitReached { used: 10, limit: 10 };
        let env = Envelope::<Payload>::fail("boss_challenge", &err, now());
        assert!(!env.is_ok());
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["summary"]["code"], json!("DAILY_LIMIT_EXCEEDED"));
        assert!(
            value["summary"]["message"]
                .as_str()
                .unwrap()
                .contains("10/10")
        );
        assert!(value.get("hp_left").is_none());
    }

    #[test]
    fn test_internal_failure_is_generic() {
        let err = RaidError::Internal {
            message: "connection pool exploded".into(),
        };
        let env = Envelope::<Payload>::fail("boss_challenge", &err, now());
        assert_eq!(env.code(), "INTERNAL_ERROR");
        assert_eq!(env.message(), "internal error");
    }
}
