//! Signed battle payload
//!
//! The full battle transcript is serialized with stable field order
//! (struct order plus `BTreeMap` keys) and content-hashed with blake3. Two
//! runs from the same seed therefore produce byte-identical payloads and the
//! same signature, which is what the replay checks in tests rely on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEvent {
    Attack {
        actor: String,
        target: String,
        damage: i64,
        crit: bool,
        #[serde(default, skip_serializing_if = "is_zero")]
        shield_absorbed: i64,
    },
    PhaseTriggered {
        hp_ratio: f64,
        shield_gain: i64,
        attack_buff: i64,
    },
    Enraged {
        attack_mult: f64,
    },
    Defeated {
        actor: String,
    },
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BattleTurn {
    pub round: u32,
    pub events: Vec<BattleEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePayload {
    pub battle_id: String,
    pub guild_id: String,
    pub boss_id: String,
    pub seed: String,
    pub victory: bool,
    pub rounds: u32,
    /// Damage dealt to the boss, shield absorption included
    pub total_damage: i64,
    pub damage_by_member: BTreeMap<String, i64>,
    pub timeline: Vec<BattleTurn>,
    /// Content hash over the payload with this field empty
    pub signature: String,
}

impl BattlePayload {
    /// Stable battle identifier derived from the replay inputs.
    pub fn battle_id(guild_id: &str, boss_id: &str, seed: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(guild_id.as_bytes());
        hasher.update(b"|");
        hasher.update(boss_id.as_bytes());
        hasher.update(b"|");
        hasher.update(seed.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Fill in the content signature. Idempotent.
    pub fn seal(mut self) -> Self {
        self.signature = self.content_hash();
        self
    }

    /// Verify the signature matches the payload content.
    pub fn verify(&self) -> bool {
        !self.signature.is_empty() && self.signature == self.content_hash()
    }

    fn content_hash(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        let bytes = serde_json::to_vec(&unsigned).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}
