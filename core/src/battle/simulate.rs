//! Battle turn loop
//!
//! Pure function of its input: no clocks, no store, no ambient randomness.
//! The entire transcript replays from (guild, boss, seed), which keeps
//! challenge results auditable after the fact.

use std::collections::BTreeMap;

use crate::boss::BossDefinition;

use super::actor::{BossActor, MemberActor, PartyMember};
use super::payload::{BattleEvent, BattlePayload, BattleTurn};
use super::prng::BattleRng;
use super::skill::SkillResolver;

pub const DEFAULT_MAX_ROUNDS: u32 = 12;
pub const MIN_MAX_ROUNDS: u32 = 5;

#[derive(Debug, Clone)]
pub struct SimulationInput {
    pub guild_id: String,
    pub boss: BossDefinition,
    /// Remaining HP the boss enters the fight with
    pub boss_hp_left: i64,
    pub party: Vec<PartyMember>,
    pub seed: String,
    pub max_rounds: Option<u32>,
}

/// Who acts in a round, in initiative order.
enum TurnSlot {
    Member(usize),
    Boss,
}

pub fn simulate(input: &SimulationInput, resolver: &dyn SkillResolver) -> BattlePayload {
    let mut rng = BattleRng::new(&format!(
        "{}|{}|{}",
        input.guild_id, input.boss.id, input.seed
    ));
    let max_rounds = input
        .max_rounds
        .unwrap_or(DEFAULT_MAX_ROUNDS)
        .max(MIN_MAX_ROUNDS);

    let mut boss = BossActor::new(input.boss.clone(), input.boss_hp_left);
    let mut members: Vec<MemberActor> = input
        .party
        .iter()
        .cloned()
        .map(MemberActor::new)
        .collect();

    catch_up_thresholds(&mut boss);

    let mut timeline = Vec::new();
    let mut damage_by_member: BTreeMap<String, i64> = BTreeMap::new();
    let mut rounds_played = 0;

    'battle: for round in 1..=max_rounds {
        rounds_played = round;
        let mut events = Vec::new();

        for slot in initiative(&members, &boss, &mut rng) {
            match slot {
                TurnSlot::Member(idx) => {
                    if !members[idx].is_alive() || !boss.is_alive() {
                        continue;
                    }
                    member_turn(
                        &members[idx],
                        &mut boss,
                        resolver,
                        &mut rng,
                        &mut events,
                        &mut damage_by_member,
                    );
                }
                TurnSlot::Boss => {
                    if !boss.is_alive() {
                        continue;
                    }
                    boss_turn(&mut members, &boss, resolver, &mut rng, &mut events);
                }
            }
        }

        timeline.push(BattleTurn { round, events });

        if !boss.is_alive() || members.iter().all(|m| !m.is_alive()) {
            break 'battle;
        }
    }

    let total_damage = damage_by_member.values().sum();
    BattlePayload {
        battle_id: BattlePayload::battle_id(&input.guild_id, &input.boss.id, &input.seed),
        guild_id: input.guild_id.clone(),
        boss_id: input.boss.id.clone(),
        seed: input.seed.clone(),
        victory: !boss.is_alive(),
        rounds: rounds_played,
        total_damage,
        damage_by_member,
        timeline,
        signature: String::new(),
    }
    .seal()
}

/// A boss entering below full HP already crossed some thresholds in earlier
/// challenges. Re-apply their lasting attack buffs and the enrage flag
/// silently; shields from old phases are gone.
fn catch_up_thresholds(boss: &mut BossActor) {
    let ratio = boss.hp_ratio();
    let mut fired = 0;
    for phase in boss.definition.phases.clone() {
        if ratio <= phase.hp_ratio {
            boss.attack_buff += phase.attack_buff;
            fired += 1;
        }
    }
    // phases are sorted descending, so the first `fired` entries are spent
    boss.definition.phases.drain(..fired);

    if let Some(enrage) = &boss.definition.enrage
        && ratio <= enrage.hp_ratio
    {
        boss.enraged = true;
    }
}

/// Initiative for one round: living actors sorted by speed descending, ties
/// broken by a per-round PRNG draw taken in a fixed order.
fn initiative(members: &[MemberActor], boss: &BossActor, rng: &mut BattleRng) -> Vec<TurnSlot> {
    let mut entries: Vec<(i64, u32, TurnSlot)> = Vec::with_capacity(members.len() + 1);
    for (idx, m) in members.iter().enumerate() {
        let draw = rng.next_u32();
        if m.is_alive() {
            entries.push((m.member.speed, draw, TurnSlot::Member(idx)));
        }
    }
    let draw = rng.next_u32();
    if boss.is_alive() {
        entries.push((boss.definition.speed, draw, TurnSlot::Boss));
    }

    entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    entries.into_iter().map(|(_, _, slot)| slot).collect()
}

fn member_turn(
    member: &MemberActor,
    boss: &mut BossActor,
    resolver: &dyn SkillResolver,
    rng: &mut BattleRng,
    events: &mut Vec<BattleEvent>,
    damage_by_member: &mut BTreeMap<String, i64>,
) {
    let hit = resolver.resolve(member.member.attack, boss.definition.defense, rng);
    let (absorbed, _) = boss.take_damage(hit.damage);

    events.push(BattleEvent::Attack {
        actor: member.member.member_id.clone(),
        target: boss.definition.id.clone(),
        damage: hit.damage,
        crit: hit.crit,
        shield_absorbed: absorbed,
    });
    *damage_by_member
        .entry(member.member.member_id.clone())
        .or_insert(0) += hit.damage;

    fire_thresholds(boss, events);

    if !boss.is_alive() {
        events.push(BattleEvent::Defeated {
            actor: boss.definition.id.clone(),
        });
    }
}

/// Fire every un-fired threshold the boss HP has dropped to or below. One
/// large hit can cross several at once; each fires exactly once, in order.
fn fire_thresholds(boss: &mut BossActor, events: &mut Vec<BattleEvent>) {
    if !boss.is_alive() {
        return;
    }
    let ratio = boss.hp_ratio();

    let mut fired = 0;
    for phase in boss.definition.phases.clone() {
        if ratio > phase.hp_ratio {
            break;
        }
        boss.shield += phase.shield_gain;
        boss.attack_buff += phase.attack_buff;
        events.push(BattleEvent::PhaseTriggered {
            hp_ratio: phase.hp_ratio,
            shield_gain: phase.shield_gain,
            attack_buff: phase.attack_buff,
        });
        fired += 1;
    }
    boss.definition.phases.drain(..fired);

    if !boss.enraged
        && let Some(enrage) = boss.definition.enrage.clone()
        && ratio <= enrage.hp_ratio
    {
        boss.enraged = true;
        events.push(BattleEvent::Enraged {
            attack_mult: enrage.attack_mult,
        });
    }
}

fn boss_turn(
    members: &mut [MemberActor],
    boss: &BossActor,
    resolver: &dyn SkillResolver,
    rng: &mut BattleRng,
    events: &mut Vec<BattleEvent>,
) {
    let living: Vec<usize> = members
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_alive())
        .map(|(i, _)| i)
        .collect();
    if living.is_empty() {
        return;
    }

    let target_idx = living[rng.pick(living.len())];
    let target = &mut members[target_idx];
    let hit = resolver.resolve(boss.effective_attack(), target.member.defense, rng);
    target.hp_left = (target.hp_left - hit.damage).max(0);

    events.push(BattleEvent::Attack {
        actor: boss.definition.id.clone(),
        target: target.member.member_id.clone(),
        damage: hit.damage,
        crit: hit.crit,
        shield_absorbed: 0,
    });
    if !target.is_alive() {
        events.push(BattleEvent::Defeated {
            actor: target.member.member_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::skill::{BasicSkillResolver, HitOutcome};
    use crate::boss::{builtin_rotation, EnrageThreshold, PhaseThreshold};

    fn ember() -> BossDefinition {
        builtin_rotation()
            .into_iter()
            .find(|b| b.id == "ember_colossus")
            .unwrap()
    }

    fn party(n: usize) -> Vec<PartyMember> {
        (0..n).map(|i| PartyMember::baseline(&format!("m{i}"))).collect()
    }

    fn input(seed: &str) -> SimulationInput {
        let boss = ember();
        let hp = boss.hp_max;
        SimulationInput {
            guild_id: "g1".into(),
            boss,
            boss_hp_left: hp,
            party: party(4),
            seed: seed.into(),
            max_rounds: None,
        }
    }

    /// Fixed-damage resolver for threshold arithmetic tests.
    struct FlatResolver(i64);
    impl SkillResolver for FlatResolver {
        fn resolve(&self, _attack: i64, _defense: i64, _rng: &mut BattleRng) -> HitOutcome {
            HitOutcome {
                damage: self.0,
                crit: false,
            }
        }
    }

    #[test]
    fn test_same_seed_replays_identically() {
        let resolver = BasicSkillResolver;
        let a = simulate(&input("raid-42"), &resolver);
        let b = simulate(&input("raid-42"), &resolver);

        assert_eq!(a.signature, b.signature);
        assert_eq!(a.timeline, b.timeline);
        assert_eq!(a.damage_by_member, b.damage_by_member);
        assert!(a.verify());
    }

    #[test]
    fn test_different_seeds_differ() {
        let resolver = BasicSkillResolver;
        let a = simulate(&input("raid-1"), &resolver);
        let b = simulate(&input("raid-2"), &resolver);
        assert_ne!(a.signature, b.signature);
        assert_ne!(a.battle_id, b.battle_id);
    }

    #[test]
    fn test_round_cap_is_honored() {
        let resolver = FlatResolver(1);
        let mut inp = input("cap");
        inp.max_rounds = Some(7);
        let payload = simulate(&inp, &resolver);
        assert_eq!(payload.rounds, 7);
        assert!(!payload.victory);
    }

    #[test]
    fn test_max_rounds_floor_applies() {
        let resolver = FlatResolver(1);
        let mut inp = input("floor");
        inp.max_rounds = Some(1);
        let payload = simulate(&inp, &resolver);
        assert_eq!(payload.rounds, MIN_MAX_ROUNDS);
    }

    #[test]
    fn test_one_hit_fires_stacked_thresholds_once() {
        // Two thresholds at 0.5 and 0.4; one hit drops HP straight to 30%
        let boss = BossDefinition {
            id: "stacked".into(),
            name: "Stacked".into(),
            level: 1,
            hp_max: 10_000,
            attack: 1,
            defense: 0,
            speed: 1,
            phases: vec![
                PhaseThreshold {
                    hp_ratio: 0.5,
                    shield_gain: 100,
                    attack_buff: 10,
                },
                PhaseThreshold {
                    hp_ratio: 0.4,
                    shield_gain: 200,
                    attack_buff: 20,
                },
            ],
            enrage: None,
        }
        .normalized();

        let inp = SimulationInput {
            guild_id: "g1".into(),
            boss,
            boss_hp_left: 10_000,
            party: vec![PartyMember::baseline("m0")],
            seed: "stack".into(),
            max_rounds: Some(12),
        };
        let payload = simulate(&inp, &FlatResolver(7_000));

        let phase_events: Vec<_> = payload
            .timeline
            .iter()
            .flat_map(|t| &t.events)
            .filter(|e| matches!(e, BattleEvent::PhaseTriggered { .. }))
            .collect();
        assert_eq!(phase_events.len(), 2);
        assert!(matches!(
            phase_events[0],
            BattleEvent::PhaseTriggered { shield_gain: 100, .. }
        ));
        assert!(matches!(
            phase_events[1],
            BattleEvent::PhaseTriggered { shield_gain: 200, .. }
        ));
    }

    #[test]
    fn test_enrage_fires_at_most_once() {
        let boss = BossDefinition {
            id: "angry".into(),
            name: "Angry".into(),
            level: 1,
            hp_max: 100_000,
            attack: 1,
            defense: 0,
            speed: 1,
            phases: vec![],
            enrage: Some(EnrageThreshold {
                hp_ratio: 0.9,
                attack_mult: 2.0,
            }),
        };
        let inp = SimulationInput {
            guild_id: "g1".into(),
            boss,
            boss_hp_left: 100_000,
            party: party(3),
            seed: "rage".into(),
            max_rounds: Some(12),
        };
        let payload = simulate(&inp, &FlatResolver(5_000));

        let enrages = payload
            .timeline
            .iter()
            .flat_map(|t| &t.events)
            .filter(|e| matches!(e, BattleEvent::Enraged { .. }))
            .count();
        assert_eq!(enrages, 1);
    }

    #[test]
    fn test_victory_when_boss_falls() {
        let inp = SimulationInput {
            guild_id: "g1".into(),
            boss: ember(),
            boss_hp_left: 500,
            party: party(4),
            seed: "finish".into(),
            max_rounds: None,
        };
        let payload = simulate(&inp, &FlatResolver(600));
        assert!(payload.victory);
        let defeated = payload
            .timeline
            .iter()
            .flat_map(|t| &t.events)
            .any(|e| matches!(e, BattleEvent::Defeated { actor } if actor == "ember_colossus"));
        assert!(defeated);
    }

    #[test]
    fn test_worn_boss_enters_enraged() {
        // 5% HP left; the 10% enrage and both phase buffs pre-apply silently
        let inp = SimulationInput {
            guild_id: "g1".into(),
            boss: ember(),
            boss_hp_left: 2_600,
            party: party(1),
            seed: "worn".into(),
            max_rounds: None,
        };
        let payload = simulate(&inp, &FlatResolver(1));

        let fired: usize = payload
            .timeline
            .iter()
            .flat_map(|t| &t.events)
            .filter(|e| {
                matches!(
                    e,
                    BattleEvent::PhaseTriggered { .. } | BattleEvent::Enraged { .. }
                )
            })
            .count();
        assert_eq!(fired, 0);
    }
}
