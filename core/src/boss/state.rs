//! Persisted boss encounter state
//!
//! One document per (guild, boss) pair under the `bosses` collection. Maps use
//! `BTreeMap` so serialized documents have a stable field order. The `ended`
//! status is one-way: once an encounter ends no later write reopens it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::{DocId, Document, StoreError};

use super::definition::BossDefinition;

/// Bump when the persisted encounter shape changes.
pub const STATE_SCHEMA_VERSION: u32 = 1;

// ═══════════════════════════════════════════════════════════════════════════
// Status
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterStatus {
    Open,
    Ended,
}

// ═══════════════════════════════════════════════════════════════════════════
// Per-member Attempt Tracking
// ═══════════════════════════════════════════════════════════════════════════

/// Attempt counter embedded in the encounter document. The `date_key` resets
/// the count on the first challenge of each UTC day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberAttempts {
    pub date_key: String,
    pub count: u32,
    pub last_challenge_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Encounter State
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossEncounterState {
    pub guild_id: String,
    pub boss_id: String,
    pub name: String,

    #[serde(default)]
    pub level: u32,

    pub hp_max: i64,
    pub hp_left: i64,

    pub status: EncounterStatus,

    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Sum of all reported damage, including overkill past zero HP
    pub total_damage: i64,

    pub damage_by_member: BTreeMap<String, i64>,

    pub member_attempts: BTreeMap<String, MemberAttempts>,

    /// Number of phase thresholds already fired (thresholds fire in order)
    #[serde(default)]
    pub phases_fired: u32,

    #[serde(default)]
    pub enraged: bool,

    #[serde(default)]
    pub schema_version: u32,
}

impl BossEncounterState {
    pub fn new(guild_id: &str, boss: &BossDefinition, now: DateTime<Utc>) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            boss_id: boss.id.clone(),
            name: boss.name.clone(),
            level: boss.level,
            hp_max: boss.hp_max,
            hp_left: boss.hp_max,
            status: EncounterStatus::Open,
            started_at: now,
            ended_at: None,
            total_damage: 0,
            damage_by_member: BTreeMap::new(),
            member_attempts: BTreeMap::new(),
            phases_fired: 0,
            enraged: false,
            schema_version: STATE_SCHEMA_VERSION,
        }
    }

    pub fn doc_id(guild_id: &str, boss_id: &str) -> DocId {
        DocId::new("bosses", format!("{guild_id}:{boss_id}"))
    }

    pub fn is_ended(&self) -> bool {
        self.status == EncounterStatus::Ended
    }

    /// Attempts used today by a member, honoring the per-day reset.
    pub fn attempts_today(&self, member_id: &str, date_key: &str) -> u32 {
        self.member_attempts
            .get(member_id)
            .filter(|a| a.date_key == date_key)
            .map_or(0, |a| a.count)
    }

    pub fn to_document(&self) -> Result<Document, StoreError> {
        serde_json::to_value(self).map_err(|e| StoreError::Backend {
            reason: format!("failed to serialize encounter: {e}"),
        })
    }

    pub fn from_document(id: &DocId, doc: Document) -> Result<Self, StoreError> {
        serde_json::from_value(doc).map_err(|e| StoreError::Corrupt {
            id: id.path(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boss::definition::builtin_rotation;
    use chrono::TimeZone;

    fn sample() -> BossEncounterState {
        let boss = &builtin_rotation()[0];
        let now = Utc.with_ymd_and_hms(2026, 8, 31, 10, 0, 0).unwrap();
        BossEncounterState::new("g1", boss, now)
    }

    #[test]
    fn test_round_trips_through_document() {
        let mut state = sample();
        state.damage_by_member.insert("m1".into(), 1500);
        state.member_attempts.insert(
            "m1".into(),
            MemberAttempts {
                date_key: "2026-08-31".into(),
                count: 2,
                last_challenge_at: state.started_at,
            },
        );

        let id = BossEncounterState::doc_id("g1", &state.boss_id);
        let doc = state.to_document().unwrap();
        let back = BossEncounterState::from_document(&id, doc).unwrap();

        assert_eq!(back.damage_by_member.get("m1"), Some(&1500));
        assert_eq!(back.attempts_today("m1", "2026-08-31"), 2);
        assert_eq!(back.status, EncounterStatus::Open);
    }

    #[test]
    fn test_attempts_reset_on_new_day() {
        let mut state = sample();
        state.member_attempts.insert(
            "m1".into(),
            MemberAttempts {
                date_key: "2026-08-30".into(),
                count: 10,
                last_challenge_at: state.started_at,
            },
        );
        assert_eq!(state.attempts_today("m1", "2026-08-31"), 0);
        assert_eq!(state.attempts_today("m1", "2026-08-30"), 10);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let doc = sample().to_document().unwrap();
        assert_eq!(doc.get("status").and_then(|v| v.as_str()), Some("open"));
    }
}
