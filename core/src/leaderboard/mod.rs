//! Guild leaderboards
//!
//! Rankings are expensive to recompute, so each (kind, guild) pair is cached
//! as one document under `leaderboards/`. A cached board is served until it
//! goes stale: older than the TTL, written by another schema version, or
//! structurally incomplete. Stale boards are rebuilt wholesale; there is no
//! incremental maintenance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::RaidError;
use crate::store::{DocId, DocumentStore, Document, Query, SortDir, StoreError};

/// Entries kept per cached board; also the hard cap on requested sizes.
pub const CACHE_CAP: usize = 200;

pub const LEADERBOARD_TTL_SECS: i64 = 300;

/// Bump when the cached document shape changes; readers treat any other
/// version as stale.
pub const LEADERBOARD_SCHEMA_VERSION: u32 = 2;

// ═══════════════════════════════════════════════════════════════════════════
// Kinds and Entries
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardKind {
    Power,
    Contribution,
    Activity,
    Boss,
}

impl LeaderboardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardKind::Power => "power",
            LeaderboardKind::Contribution => "contribution",
            LeaderboardKind::Activity => "activity",
            LeaderboardKind::Boss => "boss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "power" => Some(LeaderboardKind::Power),
            "contribution" => Some(LeaderboardKind::Contribution),
            "activity" => Some(LeaderboardKind::Activity),
            "boss" => Some(LeaderboardKind::Boss),
            _ => None,
        }
    }

    /// Member-document field ranked by the query-backed kinds.
    fn score_field(&self) -> Option<&'static str> {
        match self {
            LeaderboardKind::Power => Some("power"),
            LeaderboardKind::Contribution => Some("contribution"),
            LeaderboardKind::Activity => Some("activity"),
            LeaderboardKind::Boss => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub member_id: String,
    pub display_name: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedBoard {
    schema_version: u32,
    kind: LeaderboardKind,
    guild_id: String,
    built_at: DateTime<Utc>,
    entries: Vec<LeaderboardEntry>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════

pub struct LeaderboardService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<S: DocumentStore> LeaderboardService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(LEADERBOARD_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn cache_id(kind: LeaderboardKind, guild_id: &str) -> DocId {
        DocId::new("leaderboards", format!("{}:{guild_id}", kind.as_str()))
    }

    /// Top entries for a board, serving the cache when fresh. `limit` is
    /// clamped to [1, CACHE_CAP].
    pub async fn get(
        &self,
        kind: LeaderboardKind,
        guild_id: &str,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, RaidError> {
        let limit = limit.clamp(1, CACHE_CAP);

        if let Some(board) = self.load_fresh(kind, guild_id).await? {
            let mut entries = board.entries;
            entries.truncate(limit);
            return Ok(entries);
        }

        let mut entries = self.rebuild(kind, guild_id).await?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Drop the cached board and rebuild it now. Used after events that
    /// visibly change a ranking, like a boss defeat.
    pub async fn force_refresh(
        &self,
        kind: LeaderboardKind,
        guild_id: &str,
    ) -> Result<(), RaidError> {
        self.rebuild(kind, guild_id).await.map(|_| ())
    }

    async fn load_fresh(
        &self,
        kind: LeaderboardKind,
        guild_id: &str,
    ) -> Result<Option<CachedBoard>, RaidError> {
        let id = Self::cache_id(kind, guild_id);
        let Some(doc) = self.store.get(&id).await.map_err(RaidError::from_store)? else {
            return Ok(None);
        };

        // Any parse failure means an old or mangled shape: rebuild
        let Ok(board) = serde_json::from_value::<CachedBoard>(doc) else {
            tracing::debug!(%id, "cached leaderboard unreadable, rebuilding");
            return Ok(None);
        };
        if board.schema_version != LEADERBOARD_SCHEMA_VERSION {
            return Ok(None);
        }
        if self.clock.now() - board.built_at > self.ttl {
            return Ok(None);
        }
        Ok(Some(board))
    }

    async fn rebuild(
        &self,
        kind: LeaderboardKind,
        guild_id: &str,
    ) -> Result<Vec<LeaderboardEntry>, RaidError> {
        let entries = match kind.score_field() {
            Some(field) => self.build_from_members(guild_id, field).await?,
            None => self.build_from_encounters(guild_id).await?,
        };

        let board = CachedBoard {
            schema_version: LEADERBOARD_SCHEMA_VERSION,
            kind,
            guild_id: guild_id.to_string(),
            built_at: self.clock.now(),
            entries: entries.clone(),
        };
        let doc = serde_json::to_value(&board).map_err(|e| RaidError::Internal {
            message: format!("failed to serialize leaderboard: {e}"),
        })?;

        let id = Self::cache_id(kind, guild_id);
        match self.store.create(&id, doc.clone()).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                let patch = wholesale_patch(&doc);
                self.store
                    .update(&id, patch)
                    .await
                    .map_err(RaidError::from_store)?;
            }
            Err(e) => return Err(RaidError::from_store(e)),
        }

        tracing::debug!(
            kind = kind.as_str(),
            guild_id,
            entries = entries.len(),
            "leaderboard rebuilt"
        );
        Ok(entries)
    }

    /// Ranked directly off a numeric member-document field.
    async fn build_from_members(
        &self,
        guild_id: &str,
        field: &str,
    ) -> Result<Vec<LeaderboardEntry>, RaidError> {
        let query = Query::collection("members")
            .filter("guild_id", guild_id)
            .order_by(field, SortDir::Desc)
            .limit(CACHE_CAP);
        let docs = self
            .store
            .query(query)
            .await
            .map_err(RaidError::from_store)?;

        let mut entries = Vec::with_capacity(docs.len());
        for (rank, (id, doc)) in docs.into_iter().enumerate() {
            let member_id = doc
                .get("member_id")
                .and_then(|v| v.as_str())
                .unwrap_or_else(|| id.id())
                .to_string();
            let score = doc.get(field).and_then(|v| v.as_i64()).unwrap_or(0);
            entries.push(LeaderboardEntry {
                rank: rank as u32 + 1,
                member_id: member_id.clone(),
                display_name: resolve_display_name(&doc, &member_id),
                score,
            });
        }
        Ok(entries)
    }

    /// Boss board: total damage per member summed across every encounter the
    /// guild has fought.
    async fn build_from_encounters(
        &self,
        guild_id: &str,
    ) -> Result<Vec<LeaderboardEntry>, RaidError> {
        let query = Query::collection("bosses").filter("guild_id", guild_id);
        let docs = self
            .store
            .query(query)
            .await
            .map_err(RaidError::from_store)?;

        let mut totals: BTreeMap<String, i64> = BTreeMap::new();
        for (_, doc) in &docs {
            let Some(map) = doc.get("damage_by_member").and_then(|v| v.as_object()) else {
                continue;
            };
            for (member, damage) in map {
                *totals.entry(member.clone()).or_insert(0) +=
                    damage.as_i64().unwrap_or(0);
            }
        }

        let mut ranked: Vec<(String, i64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(CACHE_CAP);

        let mut entries = Vec::with_capacity(ranked.len());
        for (rank, (member_id, score)) in ranked.into_iter().enumerate() {
            let display_name = self.member_display_name(guild_id, &member_id).await;
            entries.push(LeaderboardEntry {
                rank: rank as u32 + 1,
                member_id,
                display_name,
                score,
            });
        }
        Ok(entries)
    }

    pub(crate) async fn member_display_name(&self, guild_id: &str, member_id: &str) -> String {
        let id = DocId::new("members", format!("{guild_id}:{member_id}"));
        match self.store.get(&id).await {
            Ok(Some(doc)) => resolve_display_name(&doc, member_id),
            _ => member_id.to_string(),
        }
    }
}

/// Identity cascade: display_name, then nickname, then the raw member id.
fn resolve_display_name(doc: &Document, member_id: &str) -> String {
    doc.get("display_name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            doc.get("nickname")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(member_id)
        .to_string()
}

fn wholesale_patch(doc: &Document) -> crate::store::Patch {
    let mut patch = crate::store::Patch::new();
    if let Some(obj) = doc.as_object() {
        for (key, value) in obj {
            patch = patch.set(key.clone(), value.clone());
        }
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, ManualClock, LeaderboardService<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 31, 15, 0, 0).unwrap());
        let service = LeaderboardService::new(store.clone(), Arc::new(clock.clone()));
        (store, clock, service)
    }

    async fn seed_member(store: &MemoryStore, guild: &str, member: &str, power: i64) {
        store
            .create(
                &DocId::new("members", format!("{guild}:{member}")),
                json!({
                    "member_id": member,
                    "guild_id": guild,
                    "power": power,
                    "nickname": format!("nick-{member}"),
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_power_board_ranks_descending() {
        let (store, _, service) = setup();
        seed_member(&store, "g1", "weak", 10).await;
        seed_member(&store, "g1", "strong", 500).await;
        seed_member(&store, "g1", "mid", 100).await;
        seed_member(&store, "g2", "other", 9_999).await;

        let entries = service
            .get(LeaderboardKind::Power, "g1", 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].member_id, "strong");
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[0].display_name, "nick-strong");
        assert_eq!(entries[2].member_id, "weak");
    }

    #[tokio::test]
    async fn test_limit_is_clamped_to_cap() {
        let (store, _, service) = setup();
        for i in 0..250 {
            seed_member(&store, "g1", &format!("m{i:03}"), i).await;
        }

        let entries = service
            .get(LeaderboardKind::Power, "g1", 999)
            .await
            .unwrap();
        assert_eq!(entries.len(), CACHE_CAP);

        let entries = service.get(LeaderboardKind::Power, "g1", 0).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_served_until_ttl_then_rebuilt() {
        let (store, clock, service) = setup();
        seed_member(&store, "g1", "m1", 100).await;

        let first = service.get(LeaderboardKind::Power, "g1", 10).await.unwrap();
        assert_eq!(first.len(), 1);

        // New member within the TTL is invisible
        seed_member(&store, "g1", "m2", 200).await;
        let cached = service.get(LeaderboardKind::Power, "g1", 10).await.unwrap();
        assert_eq!(cached.len(), 1);

        clock.advance(Duration::seconds(LEADERBOARD_TTL_SECS + 1));
        let rebuilt = service.get(LeaderboardKind::Power, "g1", 10).await.unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt[0].member_id, "m2");
    }

    #[tokio::test]
    async fn test_schema_mismatch_forces_rebuild() {
        let (store, _, service) = setup();
        seed_member(&store, "g1", "m1", 100).await;

        store
            .create(
                &DocId::new("leaderboards", "power:g1"),
                json!({
                    "schema_version": LEADERBOARD_SCHEMA_VERSION - 1,
                    "kind": "power",
                    "guild_id": "g1",
                    "built_at": "2026-08-31T15:00:00Z",
                    "entries": [],
                }),
            )
            .await
            .unwrap();

        let entries = service.get(LeaderboardKind::Power, "g1", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_boss_board_sums_across_encounters() {
        let (store, _, service) = setup();
        seed_member(&store, "g1", "m1", 1).await;
        store
            .create(
                &DocId::new("bosses", "g1:boss_a"),
                json!({"guild_id": "g1", "damage_by_member": {"m1": 1000, "m2": 4000}}),
            )
            .await
            .unwrap();
        store
            .create(
                &DocId::new("bosses", "g1:boss_b"),
                json!({"guild_id": "g1", "damage_by_member": {"m1": 5000}}),
            )
            .await
            .unwrap();

        let entries = service.get(LeaderboardKind::Boss, "g1", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].member_id, "m1");
        assert_eq!(entries[0].score, 6000);
        assert_eq!(entries[0].display_name, "nick-m1");
        // m2 has no member document, falls back to the raw id
        assert_eq!(entries[1].display_name, "m2");
    }

    #[tokio::test]
    async fn test_identity_cascade_prefers_display_name() {
        let (store, _, service) = setup();
        store
            .create(
                &DocId::new("members", "g1:m1"),
                json!({
                    "member_id": "m1",
                    "guild_id": "g1",
                    "power": 50,
                    "display_name": "Shieldmaiden",
                    "nickname": "shorty",
                }),
            )
            .await
            .unwrap();

        let entries = service.get(LeaderboardKind::Power, "g1", 1).await.unwrap();
        assert_eq!(entries[0].display_name, "Shieldmaiden");
    }
}
