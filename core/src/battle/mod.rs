//! Deterministic battle simulation: seeded PRNG, hit resolution, the turn
//! loop and the signed replayable payload.

mod actor;
mod payload;
mod prng;
mod simulate;
mod skill;

pub use actor::{BossActor, MemberActor, PartyMember};
pub use payload::{BattleEvent, BattlePayload, BattleTurn};
pub use prng::{seed_from_str, BattleRng};
pub use simulate::{simulate, SimulationInput, DEFAULT_MAX_ROUNDS, MIN_MAX_ROUNDS};
pub use skill::{BasicSkillResolver, HitOutcome, SkillResolver};
