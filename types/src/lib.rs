//! Shared configuration types for the warband raid service
//!
//! This crate contains serializable configuration types that are shared between
//! the service library (warband-core) and the command line tooling (warband-cli):
//! the dynamic runtime settings blob stored in the document store, and the
//! local tooling config persisted via confy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────────────────────────────────────
// Serde Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default for enabled fields
pub fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Settings (dynamic blob, stored at `settings/runtime`)
// ─────────────────────────────────────────────────────────────────────────────

/// Dynamic service settings, loaded from the document store through a TTL
/// provider. Every field has a serde default so a partial or absent blob
/// degrades to built-in behavior instead of failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Rate/cooldown/daily-quota and abuse-detection tuning
    #[serde(default)]
    pub risk_control: RiskControlSettings,

    /// Boss encounter feature tuning
    #[serde(default)]
    pub boss: BossSettings,
}

/// Per-action quota overrides and abuse detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskControlSettings {
    /// Master switch: when false, no quota layer is enforced
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-action overrides keyed by action key (e.g. "boss_challenge").
    /// An override only applies when it is a valid positive number.
    #[serde(default)]
    pub actions: HashMap<String, ActionOverride>,

    /// Abuse monitor tuning (purely observational, never blocks)
    #[serde(default)]
    pub abuse_detection: AbuseDetectionSettings,
}

impl Default for RiskControlSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            actions: HashMap::new(),
            abuse_detection: AbuseDetectionSettings::default(),
        }
    }
}

/// Override for one action's quota layers.
///
/// `None` or non-positive values leave the static default in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOverride {
    /// Minimum spacing between two invocations by the same member (ms)
    #[serde(default)]
    pub cooldown_ms: Option<i64>,

    /// Per-UTC-day invocation cap
    #[serde(default)]
    pub daily_limit: Option<u32>,
}

/// Sliding-window abuse detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseDetectionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sliding window length (ms); non-positive falls back to the default
    #[serde(default)]
    pub window_ms: Option<i64>,

    /// Alert once count crosses this within one window
    #[serde(default)]
    pub threshold: Option<u32>,
}

impl Default for AbuseDetectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: None,
            threshold: None,
        }
    }
}

/// Boss encounter feature settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossSettings {
    /// Feature switch for the whole boss pipeline
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-member daily challenge attempts against one boss document
    #[serde(default)]
    pub daily_attempts: Option<u32>,

    /// Challenge cooldown override (ms)
    #[serde(default)]
    pub cooldown_ms: Option<i64>,

    /// Simulation round cap override
    #[serde(default)]
    pub max_rounds: Option<u32>,

    /// Ordered boss definition ids; the active boss rotates through this
    /// list by UTC date. Empty falls back to the built-in rotation.
    #[serde(default)]
    pub rotation: Vec<String>,
}

impl Default for BossSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_attempts: None,
            cooldown_ms: None,
            max_rounds: None,
            rotation: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local CLI Config (persisted via confy)
// ─────────────────────────────────────────────────────────────────────────────

/// Local configuration for the warband CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory of boss definition TOML files (None = built-in rotation only)
    pub boss_dir: Option<String>,

    /// Guild id used by demo commands
    pub default_guild: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            boss_dir: None,
            default_guild: "demo-guild".to_string(),
        }
    }
}
