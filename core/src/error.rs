//! Domain error taxonomy
//!
//! Every failure a caller can observe carries a stable machine-readable code
//! (`RaidError::code`) so upstream handlers can branch without parsing
//! message text. Store/internal failures are collapsed to `INTERNAL_ERROR`
//! at the envelope boundary; recognized domain errors pass through verbatim.

use thiserror::Error;

use crate::store::StoreError;

/// Top-level domain error for the raid pipeline.
#[derive(Debug, Error)]
pub enum RaidError {
    // ─── Auth failures (never retried internally) ────────────────────────────
    #[error("action ticket is missing or malformed")]
    InvalidTicket,

    #[error("action ticket signature does not verify")]
    InvalidTicketSignature,

    #[error("action ticket record not found")]
    TicketNotFound,

    #[error("action ticket has expired")]
    TicketExpired,

    #[error("action ticket was already consumed")]
    TicketConsumed,

    // ─── Quota failures (caller may retry later) ─────────────────────────────
    #[error("rate limited, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: i64 },

    #[error("action on cooldown for another {remaining_ms}ms")]
    ActionCooldown { remaining_ms: i64 },

    #[error("daily limit reached ({used}/{limit})")]
    DailyLimitReached { used: u32, limit: u32 },

    // ─── State conflicts (caller should re-fetch status) ─────────────────────
    #[error("boss '{boss_id}' not found")]
    BossNotFound { boss_id: String },

    #[error("boss '{boss_id}' encounter already ended")]
    BossEnded { boss_id: String },

    #[error("boss challenge attempts exhausted ({used}/{limit})")]
    BossAttemptsExhausted { used: u32, limit: u32 },

    // ─── Feature gating ──────────────────────────────────────────────────────
    #[error("feature '{feature}' is disabled")]
    FeatureDisabled { feature: &'static str },

    // ─── Infrastructure ──────────────────────────────────────────────────────
    #[error("store operation failed")]
    Store(#[from] StoreError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RaidError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            RaidError::InvalidTicket => "INVALID_TICKET",
            RaidError::InvalidTicketSignature => "INVALID_TICKET_SIGNATURE",
            RaidError::TicketNotFound => "TICKET_NOT_FOUND",
            RaidError::TicketExpired => "TICKET_EXPIRED",
            RaidError::TicketConsumed => "TICKET_CONSUMED",
            RaidError::RateLimited { .. } => "RATE_LIMITED",
            RaidError::ActionCooldown { .. } => "ACTION_COOLDOWN",
            RaidError::DailyLimitReached { .. } => "DAILY_LIMIT_EXCEEDED",
            RaidError::BossNotFound { .. } => "BOSS_NOT_FOUND",
            RaidError::BossEnded { .. } => "BOSS_ENDED",
            RaidError::BossAttemptsExhausted { .. } => "BOSS_ATTEMPTS_EXHAUSTED",
            RaidError::FeatureDisabled { .. } => "FEATURE_DISABLED",
            RaidError::Store(_) | RaidError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether this is an infrastructure failure that should be logged at
    /// error level and surfaced generically.
    pub fn is_internal(&self) -> bool {
        matches!(self, RaidError::Store(_) | RaidError::Internal { .. })
    }

    /// Reconstruct a domain error from a transaction abort code.
    ///
    /// Transaction closures run inside the store and abort with the stable
    /// code; this maps the abort back onto the taxonomy so callers see the
    /// same error whether the check failed before or inside the commit.
    pub fn from_abort(code: &str, message: &str) -> Self {
        match code {
            "INVALID_TICKET" => RaidError::InvalidTicket,
            "INVALID_TICKET_SIGNATURE" => RaidError::InvalidTicketSignature,
            "TICKET_NOT_FOUND" => RaidError::TicketNotFound,
            "TICKET_EXPIRED" => RaidError::TicketExpired,
            "TICKET_CONSUMED" => RaidError::TicketConsumed,
            "BOSS_NOT_FOUND" => RaidError::BossNotFound {
                boss_id: message.to_string(),
            },
            "BOSS_ENDED" => RaidError::BossEnded {
                boss_id: message.to_string(),
            },
            "BOSS_ATTEMPTS_EXHAUSTED" => {
                // message carries "used/limit"
                let (used, limit) = message
                    .split_once('/')
                    .and_then(|(u, l)| Some((u.parse().ok()?, l.parse().ok()?)))
                    .unwrap_or((0, 0));
                RaidError::BossAttemptsExhausted { used, limit }
            }
            other => RaidError::Internal {
                message: format!("unrecognized abort code {other}: {message}"),
            },
        }
    }
}

/// Map a store error, letting transaction aborts surface as domain errors.
impl RaidError {
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::TxnAborted { code, message } => RaidError::from_abort(&code, &message),
            other => RaidError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(RaidError::TicketConsumed.code(), "TICKET_CONSUMED");
        assert_eq!(
            RaidError::DailyLimitReached { used: 11, limit: 10 }.code(),
            "DAILY_LIMIT_EXCEEDED"
        );
        assert_eq!(
            RaidError::Internal {
                message: "boom".into()
            }
            .code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_abort_round_trip() {
        let err = RaidError::from_abort("BOSS_ATTEMPTS_EXHAUSTED", "3/3");
        assert!(matches!(
            err,
            RaidError::BossAttemptsExhausted { used: 3, limit: 3 }
        ));
        let err = RaidError::from_abort("TICKET_CONSUMED", "");
        assert_eq!(err.code(), "TICKET_CONSUMED");
    }
}
