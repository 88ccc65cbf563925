//! Dynamic settings provider
//!
//! Runtime tuning lives in one document (`settings/runtime`) owned by
//! operators. This provider caches the parsed blob with a TTL and exposes an
//! explicit `refresh(force)` instead of module-level mutable state. A missing
//! or corrupt blob degrades to defaults.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use warband_types::RuntimeSettings;

use crate::clock::Clock;
use crate::store::{DocId, DocumentStore};

/// Default cache lifetime for the settings blob.
pub const SETTINGS_TTL_SECS: i64 = 60;

struct CachedSettings {
    loaded_at: DateTime<Utc>,
    value: RuntimeSettings,
}

pub struct SettingsProvider<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cached: Mutex<Option<CachedSettings>>,
}

impl<S: DocumentStore> SettingsProvider<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(SETTINGS_TTL_SECS),
            cached: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn doc_id() -> DocId {
        DocId::new("settings", "runtime")
    }

    /// Current settings, refreshing from the store when the cache is stale.
    pub async fn current(&self) -> RuntimeSettings {
        self.refresh(false).await
    }

    /// Reload the settings blob, honoring the TTL unless forced.
    pub async fn refresh(&self, force: bool) -> RuntimeSettings {
        let now = self.clock.now();
        let mut cached = self.cached.lock().await;

        if !force
            && let Some(entry) = cached.as_ref()
            && now - entry.loaded_at < self.ttl
        {
            return entry.value.clone();
        }

        let value = match self.store.get(&Self::doc_id()).await {
            Ok(Some(doc)) => match serde_json::from_value::<RuntimeSettings>(doc) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(error = %e, "settings blob is corrupt, using defaults");
                    RuntimeSettings::default()
                }
            },
            Ok(None) => RuntimeSettings::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load settings, using defaults");
                RuntimeSettings::default()
            }
        };

        *cached = Some(CachedSettings {
            loaded_at: now,
            value: value.clone(),
        });
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, ManualClock, SettingsProvider<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 31, 9, 0, 0).unwrap());
        let provider = SettingsProvider::new(store.clone(), Arc::new(clock.clone()));
        (store, clock, provider)
    }

    #[tokio::test]
    async fn test_absent_blob_yields_defaults() {
        let (_, _, provider) = setup();
        let settings = provider.current().await;
        assert!(settings.boss.enabled);
        assert!(settings.boss.rotation.is_empty());
    }

    #[tokio::test]
    async fn test_cache_honors_ttl() {
        let (store, clock, provider) = setup();
        let _ = provider.current().await;

        store
            .create(
                &DocId::new("settings", "runtime"),
                json!({"boss": {"daily_attempts": 2}}),
            )
            .await
            .unwrap();

        // Within TTL: still cached defaults
        let settings = provider.current().await;
        assert_eq!(settings.boss.daily_attempts, None);

        clock.advance(Duration::seconds(SETTINGS_TTL_SECS + 1));
        let settings = provider.current().await;
        assert_eq!(settings.boss.daily_attempts, Some(2));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_ttl() {
        let (store, _, provider) = setup();
        let _ = provider.current().await;
        store
            .create(
                &DocId::new("settings", "runtime"),
                json!({"boss": {"max_rounds": 8}}),
            )
            .await
            .unwrap();

        let settings = provider.refresh(true).await;
        assert_eq!(settings.boss.max_rounds, Some(8));
    }

    #[tokio::test]
    async fn test_corrupt_blob_degrades_to_defaults() {
        let (store, _, provider) = setup();
        store
            .create(
                &DocId::new("settings", "runtime"),
                json!({"boss": {"enabled": "definitely"}}),
            )
            .await
            .unwrap();

        let settings = provider.refresh(true).await;
        assert!(settings.boss.enabled);
    }
}
