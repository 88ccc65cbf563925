//! Boss definition types
//!
//! Definitions are immutable value objects constructed once from built-in
//! defaults or TOML config files. Simulation code receives defensive clones
//! at its input boundary and never mutates shared templates.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Phase / Enrage Thresholds
// ═══════════════════════════════════════════════════════════════════════════

/// One-shot phase effect, fired the first time the boss HP ratio drops to or
/// below `hp_ratio`. A threshold never re-fires; if one hit crosses several
/// un-fired thresholds they all fire within that turn, in threshold order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseThreshold {
    /// HP ratio in (0, 1) that arms this phase
    pub hp_ratio: f64,

    /// Shield points granted when the phase fires
    #[serde(default)]
    pub shield_gain: i64,

    /// Flat attack added when the phase fires
    #[serde(default)]
    pub attack_buff: i64,
}

/// Separate enrage threshold; fires at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrageThreshold {
    pub hp_ratio: f64,

    /// Multiplier applied to the boss's effective attack once enraged
    #[serde(default = "default_enrage_mult")]
    pub attack_mult: f64,
}

fn default_enrage_mult() -> f64 {
    1.5
}

// ═══════════════════════════════════════════════════════════════════════════
// Boss Definition
// ═══════════════════════════════════════════════════════════════════════════

/// Definition of one boss encounter template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossDefinition {
    /// Unique identifier (e.g. "ember_colossus")
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default = "default_level")]
    pub level: u32,

    pub hp_max: i64,

    pub attack: i64,

    #[serde(default)]
    pub defense: i64,

    #[serde(default = "default_speed")]
    pub speed: i64,

    /// Phase thresholds; kept sorted descending by `hp_ratio`
    #[serde(default, alias = "phase")]
    pub phases: Vec<PhaseThreshold>,

    /// Optional enrage
    #[serde(default)]
    pub enrage: Option<EnrageThreshold>,
}

fn default_level() -> u32 {
    1
}

fn default_speed() -> i64 {
    100
}

impl BossDefinition {
    /// Sort phases descending by ratio so crossing checks run in fire order.
    pub fn normalized(mut self) -> Self {
        self.phases
            .sort_by(|a, b| b.hp_ratio.total_cmp(&a.hp_ratio));
        self
    }
}

/// Root structure for boss config files (TOML): one or more `[[boss]]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BossConfig {
    #[serde(default, rename = "boss")]
    pub bosses: Vec<BossDefinition>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Built-in Rotation
// ═══════════════════════════════════════════════════════════════════════════

/// Built-in boss templates used when no TOML directory is configured and the
/// settings blob names no rotation.
pub fn builtin_rotation() -> Vec<BossDefinition> {
    vec![
        BossDefinition {
            id: "ember_colossus".to_string(),
            name: "Ember Colossus".to_string(),
            level: 12,
            hp_max: 52_000,
            attack: 900,
            defense: 120,
            speed: 80,
            phases: vec![
                PhaseThreshold {
                    hp_ratio: 0.6,
                    shield_gain: 4_000,
                    attack_buff: 150,
                },
                PhaseThreshold {
                    hp_ratio: 0.3,
                    shield_gain: 0,
                    attack_buff: 400,
                },
            ],
            enrage: Some(EnrageThreshold {
                hp_ratio: 0.1,
                attack_mult: 1.8,
            }),
        }
        .normalized(),
        BossDefinition {
            id: "tide_warden".to_string(),
            name: "Tide Warden".to_string(),
            level: 15,
            hp_max: 80_000,
            attack: 750,
            defense: 200,
            speed: 110,
            phases: vec![PhaseThreshold {
                hp_ratio: 0.5,
                shield_gain: 10_000,
                attack_buff: 0,
            }],
            enrage: Some(EnrageThreshold {
                hp_ratio: 0.15,
                attack_mult: 1.5,
            }),
        }
        .normalized(),
        BossDefinition {
            id: "hollow_monarch".to_string(),
            name: "Hollow Monarch".to_string(),
            level: 20,
            hp_max: 120_000,
            attack: 1_100,
            defense: 260,
            speed: 95,
            phases: vec![
                PhaseThreshold {
                    hp_ratio: 0.75,
                    shield_gain: 6_000,
                    attack_buff: 100,
                },
                PhaseThreshold {
                    hp_ratio: 0.5,
                    shield_gain: 6_000,
                    attack_buff: 200,
                },
                PhaseThreshold {
                    hp_ratio: 0.25,
                    shield_gain: 0,
                    attack_buff: 500,
                },
            ],
            enrage: None,
        }
        .normalized(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boss_config() {
        let toml = r#"
[[boss]]
id = "ash_tyrant"
name = "Ash Tyrant"
level = 10
hp_max = 40000
attack = 800
defense = 100
speed = 90

[[boss.phase]]
hp_ratio = 0.5
shield_gain = 2000

[[boss.phase]]
hp_ratio = 0.2
attack_buff = 300

[boss.enrage]
hp_ratio = 0.1
attack_mult = 2.0
"#;
        let config: BossConfig = toml::from_str(toml).expect("failed to parse TOML");
        assert_eq!(config.bosses.len(), 1);

        let boss = &config.bosses[0];
        assert_eq!(boss.id, "ash_tyrant");
        assert_eq!(boss.phases.len(), 2);
        assert_eq!(boss.phases[0].shield_gain, 2_000);
        let enrage = boss.enrage.as_ref().unwrap();
        assert!((enrage.attack_mult - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalized_sorts_phases_descending() {
        let boss = BossDefinition {
            id: "x".into(),
            name: "X".into(),
            level: 1,
            hp_max: 100,
            attack: 10,
            defense: 0,
            speed: 100,
            phases: vec![
                PhaseThreshold {
                    hp_ratio: 0.2,
                    shield_gain: 0,
                    attack_buff: 0,
                },
                PhaseThreshold {
                    hp_ratio: 0.8,
                    shield_gain: 0,
                    attack_buff: 0,
                },
            ],
            enrage: None,
        }
        .normalized();

        assert!(boss.phases[0].hp_ratio > boss.phases[1].hp_ratio);
    }

    #[test]
    fn test_builtin_rotation_is_normalized() {
        for boss in builtin_rotation() {
            for pair in boss.phases.windows(2) {
                assert!(pair[0].hp_ratio >= pair[1].hp_ratio);
            }
            assert!(boss.hp_max > 0);
        }
    }
}
