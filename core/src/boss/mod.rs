//! Guild boss encounters: definitions, persisted state and the write adapter.

mod adapter;
mod definition;
mod loader;
mod state;

pub use adapter::{BossStore, DamageReceipt, WriteStrategy};
pub use definition::{builtin_rotation, BossConfig, BossDefinition, EnrageThreshold, PhaseThreshold};
pub use loader::{load_bosses_from_dir, load_bosses_from_file, LoadError};
pub use state::{BossEncounterState, EncounterStatus, MemberAttempts};
