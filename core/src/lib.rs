//! warband-core: guild raid service library
//!
//! Everything behind the raid entry points lives here: single-use action
//! tickets, the layered quota guard, concurrency-safe boss encounter state,
//! the deterministic battle simulator and cached leaderboards, all composed
//! by [`raid::RaidService`]. Persistence goes through the narrow
//! [`store::DocumentStore`] contract so the same pipeline runs against an
//! external document database or the in-process memory store.

pub mod battle;
pub mod boss;
pub mod clock;
pub mod error;
pub mod leaderboard;
pub mod quota;
pub mod raid;
pub mod settings;
pub mod store;
pub mod sync;
pub mod ticket;

// Re-exports for convenience
pub use battle::{simulate, BattlePayload, PartyMember, SimulationInput};
pub use boss::{
    load_bosses_from_dir, load_bosses_from_file, BossDefinition, BossEncounterState, BossStore,
    DamageReceipt, WriteStrategy,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::RaidError;
pub use leaderboard::{LeaderboardEntry, LeaderboardKind, LeaderboardService};
pub use quota::{AbuseMonitor, QuotaGuard};
pub use raid::{
    BossRegistry, ChallengeOutcome, ChallengeRequest, Envelope, RaidService,
};
pub use settings::SettingsProvider;
pub use store::{DocId, DocumentStore, MemoryStore, StoreError};
pub use ticket::{IssuedTicket, ServerSecret, TicketAuthority};
