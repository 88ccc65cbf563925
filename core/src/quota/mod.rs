//! Quota guard
//!
//! Three independently configurable layers per action key — rate limit,
//! cooldown, daily quota — plus a purely observational abuse monitor.
//! Static defaults live in a phf table; the dynamic settings blob overrides
//! a layer only when the override is a valid positive number, and a zero or
//! absent window/limit disables that layer entirely.
//!
//! Daily enforcement is two-phase: `assert_daily_limit` is a cheap read-only
//! pre-check; `reserve_daily_quota` performs the real atomic increment and
//! re-reads the record to catch a lost race instead of trusting the
//! pre-check's stale read.

pub mod monitor;

pub use monitor::AbuseMonitor;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use warband_types::RuntimeSettings;

use crate::clock::{utc_date_key, Clock};
use crate::error::RaidError;
use crate::store::{DocId, DocumentStore, Patch, StoreError, TxnAbort, TxnAction};

/// Action keys known to the pipeline.
pub const ACTION_BOSS_CHALLENGE: &str = "boss_challenge";
pub const ACTION_BOSS_STATUS: &str = "boss_status";
pub const ACTION_BOSS_RANK: &str = "boss_rank";
pub const ACTION_ISSUE_TICKET: &str = "issue_ticket";
pub const ACTION_LEADERBOARD: &str = "leaderboard";

/// How long an idle quota record stays eligible for reads before the sweeper
/// may remove it.
const QUOTA_RECORD_TTL_HOURS: i64 = 48;

/// Bounded retries for reservation races (concurrent create/delete).
const MAX_RESERVE_RETRIES: u32 = 3;

/// Resolved limits for one action. Zero disables a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionLimits {
    pub rate_ms: i64,
    pub cooldown_ms: i64,
    pub daily_limit: u32,
}

impl ActionLimits {
    pub const DISABLED: ActionLimits = ActionLimits {
        rate_ms: 0,
        cooldown_ms: 0,
        daily_limit: 0,
    };
}

/// Static default table; overridden per-action by the settings blob.
static DEFAULT_LIMITS: phf::Map<&'static str, ActionLimits> = phf::phf_map! {
    "boss_challenge" => ActionLimits { rate_ms: 1_500, cooldown_ms: 5_000, daily_limit: 10 },
    "boss_status" => ActionLimits { rate_ms: 1_000, cooldown_ms: 0, daily_limit: 0 },
    "boss_rank" => ActionLimits { rate_ms: 1_000, cooldown_ms: 0, daily_limit: 0 },
    "issue_ticket" => ActionLimits { rate_ms: 500, cooldown_ms: 0, daily_limit: 0 },
    "leaderboard" => ActionLimits { rate_ms: 1_000, cooldown_ms: 0, daily_limit: 0 },
};

/// Resolve effective limits for an action: static defaults, then dynamic
/// overrides where positive. `risk_control.enabled = false` disables all
/// layers.
pub fn resolve_limits(action: &str, settings: &RuntimeSettings) -> ActionLimits {
    if !settings.risk_control.enabled {
        return ActionLimits::DISABLED;
    }

    let mut limits = DEFAULT_LIMITS
        .get(action)
        .copied()
        .unwrap_or(ActionLimits::DISABLED);

    if let Some(over) = settings.risk_control.actions.get(action) {
        if let Some(cooldown) = over.cooldown_ms
            && cooldown > 0
        {
            limits.cooldown_ms = cooldown;
        }
        if let Some(daily) = over.daily_limit
            && daily > 0
        {
            limits.daily_limit = daily;
        }
    }
    limits
}

/// Persisted window record for rate/cooldown layers.
#[derive(Debug, Serialize, Deserialize)]
struct WindowRecord {
    kind: String,
    last_triggered_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Enforces the three quota layers against the document store.
pub struct QuotaGuard<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> QuotaGuard<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // ─── Rate / Cooldown ─────────────────────────────────────────────────────

    /// Minimum spacing between two invocations by the same member.
    pub async fn check_rate(
        &self,
        member_id: &str,
        action: &str,
        rate_ms: i64,
    ) -> Result<(), RaidError> {
        if rate_ms <= 0 {
            return Ok(());
        }
        let id = DocId::new("quota", format!("rate:{member_id}:{action}"));
        self.check_window(&id, "rate", rate_ms)
            .await
            .map_err(|remaining| RaidError::RateLimited {
                retry_after_ms: remaining,
            })?
            .map_err(RaidError::from_store)
    }

    /// Per-action cooldown, scoped to a guild when one applies.
    pub async fn check_cooldown(
        &self,
        member_id: &str,
        guild_id: Option<&str>,
        action: &str,
        cooldown_ms: i64,
    ) -> Result<(), RaidError> {
        if cooldown_ms <= 0 {
            return Ok(());
        }
        let scope = guild_id.unwrap_or("global");
        let id = DocId::new("quota", format!("cooldown:{member_id}:{scope}:{action}"));
        self.check_window(&id, "cooldown", cooldown_ms)
            .await
            .map_err(|remaining| RaidError::ActionCooldown {
                remaining_ms: remaining,
            })?
            .map_err(RaidError::from_store)
    }

    /// Shared window logic. Outer `Err(remaining_ms)` is a quota violation;
    /// inner result carries store failures. With transaction support the
    /// check and the touch commit as one atomic step; the read-then-touch
    /// fallback can admit two racing requests in the same window.
    async fn check_window(
        &self,
        id: &DocId,
        kind: &str,
        window_ms: i64,
    ) -> Result<Result<(), StoreError>, i64> {
        let now = self.clock.now();

        if self.store.supports_transactions() {
            return self.check_window_txn(id, kind, window_ms, now).await;
        }

        let existing = match self.store.get(id).await {
            Ok(doc) => doc,
            Err(e) => return Ok(Err(e)),
        };

        if let Some(doc) = existing
            && let Ok(record) = serde_json::from_value::<WindowRecord>(doc)
        {
            let elapsed_ms = (now - record.last_triggered_at).num_milliseconds();
            if elapsed_ms < window_ms {
                return Err(window_ms - elapsed_ms);
            }
        }

        Ok(self.touch_window(id, kind, now).await)
    }

    async fn check_window_txn(
        &self,
        id: &DocId,
        kind: &str,
        window_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Result<(), StoreError>, i64> {
        let kind = kind.to_string();
        let expires_at = now + Duration::hours(QUOTA_RECORD_TTL_HOURS);

        let outcome = self
            .store
            .transact(
                id,
                Box::new(move |doc| {
                    if let Some(doc) = doc
                        && let Ok(record) = serde_json::from_value::<WindowRecord>(doc.clone())
                    {
                        let elapsed_ms = (now - record.last_triggered_at).num_milliseconds();
                        if elapsed_ms < window_ms {
                            return Err(TxnAbort::new(
                                "WINDOW_ACTIVE",
                                (window_ms - elapsed_ms).to_string(),
                            ));
                        }
                    }

                    let last = serde_json::to_value(now).unwrap_or_default();
                    let expires = serde_json::to_value(expires_at).unwrap_or_default();
                    match doc {
                        Some(_) => Ok(TxnAction::Patch(
                            Patch::new()
                                .set("kind", kind)
                                .set("last_triggered_at", last)
                                .set("expires_at", expires),
                        )),
                        None => Ok(TxnAction::Create(serde_json::json!({
                            "kind": kind,
                            "last_triggered_at": last,
                            "expires_at": expires,
                        }))),
                    }
                }),
            )
            .await;

        match outcome {
            Ok(_) => Ok(Ok(())),
            Err(StoreError::TxnAborted { code, message }) if code == "WINDOW_ACTIVE" => {
                Err(message.parse().unwrap_or(window_ms))
            }
            Err(e) => Ok(Err(e)),
        }
    }

    async fn touch_window(
        &self,
        id: &DocId,
        kind: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let expires_at = now + Duration::hours(QUOTA_RECORD_TTL_HOURS);
        let patch = Patch::new()
            .set("kind", kind)
            .set("last_triggered_at", serde_json::to_value(now).unwrap_or_default())
            .set(
                "expires_at",
                serde_json::to_value(expires_at).unwrap_or_default(),
            );

        match self.store.update(id, patch.clone()).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound { .. }) => {
                let record = WindowRecord {
                    kind: kind.to_string(),
                    last_triggered_at: now,
                    expires_at,
                };
                let doc = serde_json::to_value(&record).map_err(|e| StoreError::Backend {
                    reason: format!("serialize window record: {e}"),
                })?;
                match self.store.create(id, doc).await {
                    Ok(()) | Err(StoreError::AlreadyExists { .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    // ─── Daily Quota ─────────────────────────────────────────────────────────

    /// Fast read-only pre-check. Rejects obviously exhausted quota before any
    /// side effect; the authoritative check is `reserve_daily_quota`.
    pub async fn assert_daily_limit(
        &self,
        member_id: &str,
        guild_id: Option<&str>,
        action: &str,
        limit: u32,
    ) -> Result<(), RaidError> {
        if limit == 0 {
            return Ok(());
        }
        let id = self.daily_id(member_id, guild_id, action);
        let used = match self.store.get(&id).await.map_err(RaidError::from_store)? {
            Some(doc) => doc.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            None => 0,
        };
        if used >= limit {
            return Err(RaidError::DailyLimitReached { used, limit });
        }
        Ok(())
    }

    /// Atomically reserve one unit of today's quota and return the count used
    /// after the reservation.
    ///
    /// create-if-absent, then increment + re-read: if the re-read shows the
    /// limit overshot, the reservation hands its unit back and fails. A
    /// concurrent create or sweep race retries the whole reservation.
    pub async fn reserve_daily_quota(
        &self,
        member_id: &str,
        guild_id: Option<&str>,
        action: &str,
        limit: u32,
    ) -> Result<u32, RaidError> {
        if limit == 0 {
            return Ok(0);
        }

        let now = self.clock.now();
        let date_key = utc_date_key(now);
        let id = self.daily_id(member_id, guild_id, action);

        for _ in 0..MAX_RESERVE_RETRIES {
            let fresh = serde_json::json!({
                "kind": "daily",
                "date_key": date_key,
                "count": 1,
                "expires_at": now + Duration::hours(QUOTA_RECORD_TTL_HOURS),
            });
            match self.store.create(&id, fresh).await {
                Ok(()) => return Ok(1),
                Err(StoreError::AlreadyExists { .. }) => {}
                Err(e) => return Err(RaidError::from_store(e)),
            }

            // Record exists: pre-read, then atomic increment + re-read.
            let Some(doc) = self.store.get(&id).await.map_err(RaidError::from_store)? else {
                continue; // deleted between create and get, retry
            };
            let used = doc.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            if used >= limit {
                return Err(RaidError::DailyLimitReached { used, limit });
            }

            match self.store.update(&id, Patch::new().increment("count", 1)).await {
                Ok(()) => {}
                Err(StoreError::NotFound { .. }) => continue,
                Err(e) => return Err(RaidError::from_store(e)),
            }

            let Some(doc) = self.store.get(&id).await.map_err(RaidError::from_store)? else {
                continue;
            };
            let count = doc.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            if count > limit {
                // Lost the race: give the unit back.
                if let Err(e) = self
                    .store
                    .update(&id, Patch::new().increment("count", -1))
                    .await
                {
                    tracing::warn!(%id, error = %e, "failed to release overshot daily quota");
                }
                return Err(RaidError::DailyLimitReached { used: limit, limit });
            }
            return Ok(count);
        }

        Err(RaidError::Internal {
            message: format!("daily quota reservation kept racing for {id}"),
        })
    }

    fn daily_id(&self, member_id: &str, guild_id: Option<&str>, action: &str) -> DocId {
        let scope = guild_id.unwrap_or("global");
        let date_key = utc_date_key(self.clock.now());
        DocId::new(
            "quota",
            format!("daily:{member_id}:{scope}:{action}:{date_key}"),
        )
    }

    // ─── Maintenance ─────────────────────────────────────────────────────────

    /// Remove quota records past their `expires_at`. Best-effort.
    pub async fn sweep_expired(&self) -> Result<usize, RaidError> {
        let now = self.clock.now();
        let all = self
            .store
            .query(crate::store::Query::collection("quota"))
            .await
            .map_err(RaidError::from_store)?;

        let mut removed = 0;
        for (id, doc) in all {
            let expired = doc
                .get("expires_at")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                .is_some_and(|at| at < now);
            if expired {
                self.store.delete(&id).await.map_err(RaidError::from_store)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
