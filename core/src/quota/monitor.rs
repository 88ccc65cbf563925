//! Abuse monitor
//!
//! Sliding-window counter per (member, guild, action type). Purely
//! observational: it never blocks the triggering request and swallows its own
//! storage failures. Crossing the threshold inside one window emits exactly
//! one alert — a `flagged` marker on the window record suppresses duplicates
//! until the window rolls over.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use warband_types::AbuseDetectionSettings;

use crate::clock::Clock;
use crate::store::{DocId, DocumentStore, Patch, StoreError};

const DEFAULT_WINDOW_MS: i64 = 60_000;
const DEFAULT_THRESHOLD: u32 = 30;
const RECORD_TTL_HOURS: i64 = 24;

pub struct AbuseMonitor<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> AbuseMonitor<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record one occurrence of an action. Never fails the caller.
    pub async fn record(
        &self,
        member_id: &str,
        guild_id: Option<&str>,
        action: &str,
        cfg: &AbuseDetectionSettings,
    ) {
        if !cfg.enabled {
            return;
        }
        let window_ms = cfg.window_ms.filter(|w| *w > 0).unwrap_or(DEFAULT_WINDOW_MS);
        let threshold = cfg.threshold.filter(|t| *t > 0).unwrap_or(DEFAULT_THRESHOLD);

        if let Err(e) = self
            .record_inner(member_id, guild_id, action, window_ms, threshold)
            .await
        {
            tracing::debug!(member_id, action, error = %e, "abuse monitor write failed");
        }
    }

    async fn record_inner(
        &self,
        member_id: &str,
        guild_id: Option<&str>,
        action: &str,
        window_ms: i64,
        threshold: u32,
    ) -> Result<(), StoreError> {
        let scope = guild_id.unwrap_or("global");
        let id = DocId::new("quota", format!("abuse:{member_id}:{scope}:{action}"));
        let now = self.clock.now();

        let Some(doc) = self.store.get(&id).await? else {
            let fresh = serde_json::json!({
                "kind": "abuse",
                "window_started_at": now,
                "count": 1,
                "flagged": false,
                "expires_at": now + Duration::hours(RECORD_TTL_HOURS),
            });
            return match self.store.create(&id, fresh).await {
                // Lost the creation race: that occurrence is counted by the winner
                Ok(()) | Err(StoreError::AlreadyExists { .. }) => Ok(()),
                Err(e) => Err(e),
            };
        };

        let window_started_at = doc
            .get("window_started_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .unwrap_or(now);

        if (now - window_started_at).num_milliseconds() > window_ms {
            // Window rolled over: restart counting, clear the flag
            let patch = Patch::new()
                .set("window_started_at", serde_json::to_value(now).unwrap_or_default())
                .set("count", 1)
                .set("flagged", false)
                .set(
                    "expires_at",
                    serde_json::to_value(now + Duration::hours(RECORD_TTL_HOURS))
                        .unwrap_or_default(),
                );
            return self.store.update(&id, patch).await;
        }

        self.store
            .update(&id, Patch::new().increment("count", 1))
            .await?;

        let Some(doc) = self.store.get(&id).await? else {
            return Ok(());
        };
        let count = doc.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let flagged = doc
            .get("flagged")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if count >= threshold && !flagged {
            self.store
                .update(&id, Patch::new().set("flagged", true))
                .await?;
            self.emit_alert(member_id, scope, action, count, window_started_at, now)
                .await?;
        }
        Ok(())
    }

    async fn emit_alert(
        &self,
        member_id: &str,
        scope: &str,
        action: &str,
        count: u32,
        window_started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tracing::warn!(
            member_id,
            scope,
            action,
            count,
            "abuse threshold crossed within window"
        );

        let alert_id = DocId::new(
            "alerts",
            format!("abuse:{member_id}:{action}:{}", now.timestamp_millis()),
        );
        let alert = serde_json::json!({
            "kind": "abuse",
            "member_id": member_id,
            "scope": scope,
            "action": action,
            "count": count,
            "window_started_at": window_started_at,
            "detected_at": now,
        });
        match self.store.create(&alert_id, alert).await {
            Ok(()) | Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, Query};
    use chrono::TimeZone;

    fn setup() -> (Arc<MemoryStore>, ManualClock, AbuseMonitor<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 31, 7, 0, 0).unwrap());
        let monitor = AbuseMonitor::new(store.clone(), Arc::new(clock.clone()));
        (store, clock, monitor)
    }

    fn cfg(window_ms: i64, threshold: u32) -> AbuseDetectionSettings {
        AbuseDetectionSettings {
            enabled: true,
            window_ms: Some(window_ms),
            threshold: Some(threshold),
        }
    }

    async fn alert_count(store: &MemoryStore) -> usize {
        store
            .query(Query::collection("alerts"))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_alert_fires_once_per_window() {
        let (store, _, monitor) = setup();
        let cfg = cfg(60_000, 3);

        for _ in 0..6 {
            monitor.record("m1", Some("g1"), "boss_challenge", &cfg).await;
        }
        assert_eq!(alert_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_window_rollover_resets_flag() {
        let (store, clock, monitor) = setup();
        let cfg = cfg(60_000, 3);

        for _ in 0..4 {
            monitor.record("m1", None, "boss_challenge", &cfg).await;
        }
        assert_eq!(alert_count(&store).await, 1);

        clock.advance(Duration::milliseconds(61_000));
        for _ in 0..4 {
            monitor.record("m1", None, "boss_challenge", &cfg).await;
        }
        assert_eq!(alert_count(&store).await, 2);
    }

    #[tokio::test]
    async fn test_below_threshold_never_alerts() {
        let (store, _, monitor) = setup();
        let cfg = cfg(60_000, 10);
        for _ in 0..9 {
            monitor.record("m1", None, "boss_status", &cfg).await;
        }
        assert_eq!(alert_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_monitor_records_nothing() {
        let (store, _, monitor) = setup();
        let cfg = AbuseDetectionSettings {
            enabled: false,
            window_ms: Some(1),
            threshold: Some(1),
        };
        monitor.record("m1", None, "boss_challenge", &cfg).await;
        assert!(store.is_empty().await);
    }
}
