//! Battle participants
//!
//! Party members come from member documents; the boss side is built from its
//! definition plus the persisted `hp_left` so a partially worn boss enters
//! the fight with the HP it actually has.

use serde::{Deserialize, Serialize};

use crate::boss::BossDefinition;

/// Member snapshot as stored under `members/`. Stats default to a usable
/// baseline so a bare profile document still produces a fighter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyMember {
    pub member_id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_power")]
    pub power: i64,

    #[serde(default = "default_hp")]
    pub hp: i64,

    #[serde(default = "default_attack")]
    pub attack: i64,

    #[serde(default)]
    pub defense: i64,

    #[serde(default = "default_speed")]
    pub speed: i64,
}

fn default_power() -> i64 {
    100
}

fn default_hp() -> i64 {
    3_000
}

fn default_attack() -> i64 {
    300
}

fn default_speed() -> i64 {
    100
}

impl PartyMember {
    pub fn baseline(member_id: &str) -> Self {
        Self {
            member_id: member_id.to_string(),
            name: None,
            power: default_power(),
            hp: default_hp(),
            attack: default_attack(),
            defense: 0,
            speed: default_speed(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.member_id)
    }
}

/// Mutable member-side combat state.
#[derive(Debug, Clone)]
pub struct MemberActor {
    pub member: PartyMember,
    pub hp_left: i64,
}

impl MemberActor {
    pub fn new(member: PartyMember) -> Self {
        let hp_left = member.hp.max(1);
        Self { member, hp_left }
    }

    pub fn is_alive(&self) -> bool {
        self.hp_left > 0
    }
}

/// Mutable boss-side combat state.
#[derive(Debug, Clone)]
pub struct BossActor {
    pub definition: BossDefinition,
    pub hp_left: i64,
    pub shield: i64,
    pub attack_buff: i64,
    pub enraged: bool,
}

impl BossActor {
    pub fn new(definition: BossDefinition, hp_left: i64) -> Self {
        let hp_left = hp_left.clamp(0, definition.hp_max);
        Self {
            definition,
            hp_left,
            shield: 0,
            attack_buff: 0,
            enraged: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp_left > 0
    }

    pub fn hp_ratio(&self) -> f64 {
        self.hp_left as f64 / self.definition.hp_max as f64
    }

    pub fn effective_attack(&self) -> i64 {
        let base = self.definition.attack + self.attack_buff;
        if self.enraged {
            let mult = self
                .definition
                .enrage
                .as_ref()
                .map_or(1.0, |e| e.attack_mult);
            (base as f64 * mult).round() as i64
        } else {
            base
        }
    }

    /// Route incoming damage through the shield first. Returns
    /// (absorbed, applied_to_hp).
    pub fn take_damage(&mut self, damage: i64) -> (i64, i64) {
        let absorbed = damage.min(self.shield);
        self.shield -= absorbed;
        let to_hp = (damage - absorbed).min(self.hp_left);
        self.hp_left -= to_hp;
        (absorbed, to_hp)
    }
}
