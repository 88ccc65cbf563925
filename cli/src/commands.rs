use std::path::Path;
use std::sync::Arc;

use warband_core::battle::{simulate, BasicSkillResolver, BattlePayload, PartyMember, SimulationInput};
use warband_core::boss::{builtin_rotation, load_bosses_from_dir, BossDefinition};
use warband_core::clock::SystemClock;
use warband_core::raid::{BossRegistry, ChallengeRequest, RaidService};
use warband_core::store::MemoryStore;
use warband_core::ticket::ServerSecret;

/// Boss definitions from the configured directory, or the built-in rotation.
pub fn load_registry(boss_dir: Option<&str>) -> Result<Vec<BossDefinition>, String> {
    match boss_dir {
        Some(dir) => {
            let bosses = load_bosses_from_dir(Path::new(dir)).map_err(|e| e.to_string())?;
            tracing::info!(dir, count = bosses.len(), "loaded boss definitions");
            Ok(bosses)
        }
        None => Ok(builtin_rotation()),
    }
}

pub fn list_bosses(boss_dir: Option<&str>) -> Result<(), String> {
    let bosses = load_registry(boss_dir)?;
    println!("{:<20} {:<24} {:>5} {:>10}", "id", "name", "level", "hp");
    for boss in &bosses {
        println!(
            "{:<20} {:<24} {:>5} {:>10}",
            boss.id, boss.name, boss.level, boss.hp_max
        );
    }
    Ok(())
}

/// Run one battle directly against a full-HP boss and print the transcript
/// summary. Same seed, same output, every time.
pub fn run_simulation(
    boss_dir: Option<&str>,
    boss_id: Option<&str>,
    seed: &str,
    members: usize,
    max_rounds: Option<u32>,
) -> Result<(), String> {
    let bosses = load_registry(boss_dir)?;
    let boss = match boss_id {
        Some(id) => bosses
            .iter()
            .find(|b| b.id == id)
            .ok_or(format!("unknown boss '{id}'"))?
            .clone(),
        None => bosses.first().ok_or("no boss definitions loaded")?.clone(),
    };

    let party: Vec<PartyMember> = (1..=members.max(1))
        .map(|i| PartyMember::baseline(&format!("m{i}")))
        .collect();
    let input = SimulationInput {
        guild_id: "local".to_string(),
        boss_hp_left: boss.hp_max,
        boss,
        party,
        seed: seed.to_string(),
        max_rounds,
    };
    let payload = simulate(&input, &BasicSkillResolver);

    println!(
        "battle {} vs {}: {} in {} rounds",
        payload.battle_id,
        payload.boss_id,
        if payload.victory { "victory" } else { "defeat" },
        payload.rounds
    );
    println!("total damage: {}", payload.total_damage);
    for (member, damage) in &payload.damage_by_member {
        println!("  {member:<12} {damage:>10}");
    }
    println!("signature: {}", payload.signature);
    Ok(())
}

/// End-to-end pipeline demo against the in-memory store: issue a ticket,
/// spend it on a challenge, print both envelopes. With `challengers > 1`
/// the whole ticket+challenge round trip runs concurrently for that many
/// members instead.
pub async fn run_demo(
    guild_id: &str,
    member_id: &str,
    party: &[String],
    challengers: usize,
    boss_dir: Option<&str>,
    boss_id: Option<&str>,
    seed: Option<&str>,
) -> Result<(), String> {
    let registry = BossRegistry::new(load_registry(boss_dir)?);
    let service = RaidService::new(
        Arc::new(MemoryStore::new()),
        ServerSecret::generate(),
        Arc::new(SystemClock),
        registry,
    );

    if challengers > 1 {
        return run_concurrent_demo(service, guild_id, member_id, challengers, boss_id, seed)
            .await;
    }

    let ticket_env = service.issue_action_ticket(member_id).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&ticket_env).map_err(|e| e.to_string())?
    );
    let code = ticket_env.code();
    let Some(ticket) = ticket_env.data else {
        return Err(format!("ticket issuance failed: {code}"));
    };

    let challenge_env = service
        .boss_challenge(ChallengeRequest {
            member_id: member_id.to_string(),
            guild_id: guild_id.to_string(),
            token: ticket.token,
            signature: ticket.signature,
            party: party.to_vec(),
            boss_id: boss_id.map(str::to_string),
            seed: seed.map(str::to_string),
        })
        .await;
    println!(
        "{}",
        serde_json::to_string_pretty(&challenge_env).map_err(|e| e.to_string())?
    );
    Ok(())
}

async fn run_concurrent_demo(
    service: RaidService<MemoryStore>,
    guild_id: &str,
    member_prefix: &str,
    challengers: usize,
    boss_id: Option<&str>,
    seed: Option<&str>,
) -> Result<(), String> {
    let service = Arc::new(service);
    let mut handles = Vec::with_capacity(challengers);

    for i in 1..=challengers {
        let service = service.clone();
        let guild = guild_id.to_string();
        let member = format!("{member_prefix}-{i}");
        let boss = boss_id.map(str::to_string);
        let seed = seed.map(|s| format!("{s}-{i}"));
        handles.push(tokio::spawn(async move {
            let ticket_env = service.issue_action_ticket(&member).await;
            let ticket_code = ticket_env.code();
            let Some(ticket) = ticket_env.data else {
                return (member, Err(ticket_code));
            };
            let env = service
                .boss_challenge(ChallengeRequest {
                    member_id: member.clone(),
                    guild_id: guild,
                    token: ticket.token,
                    signature: ticket.signature,
                    party: Vec::new(),
                    boss_id: boss,
                    seed,
                })
                .await;
            let code = env.code();
            match env.data {
                Some(outcome) => (member, Ok(outcome.receipt)),
                None => (member, Err(code)),
            }
        }));
    }

    let mut total = 0_i64;
    for handle in handles {
        let (member, result) = handle.await.map_err(|e| e.to_string())?;
        match result {
            Ok(receipt) => {
                total += receipt.reported_damage;
                println!(
                    "{member:<16} dealt {:>8}, boss hp {:>8}{}",
                    receipt.reported_damage,
                    receipt.hp_left,
                    if receipt.boss_defeated { "  DEFEATED" } else { "" }
                );
            }
            Err(code) => println!("{member:<16} rejected: {code}"),
        }
    }
    println!("total damage committed: {total}");
    Ok(())
}

/// Check a stored battle transcript against its content signature.
pub fn verify_battle(path: &str) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
    let payload: BattlePayload =
        serde_json::from_str(&content).map_err(|e| format!("{path}: {e}"))?;

    if payload.verify() {
        println!("{}: signature ok", payload.battle_id);
        Ok(())
    } else {
        Err(format!("{}: signature mismatch", payload.battle_id))
    }
}

/// Run the same seeded battle twice and require identical transcripts.
pub fn verify_replay(
    boss_dir: Option<&str>,
    boss_id: Option<&str>,
    seed: &str,
    members: usize,
) -> Result<(), String> {
    let bosses = load_registry(boss_dir)?;
    let boss = match boss_id {
        Some(id) => bosses
            .iter()
            .find(|b| b.id == id)
            .ok_or(format!("unknown boss '{id}'"))?
            .clone(),
        None => bosses.first().ok_or("no boss definitions loaded")?.clone(),
    };

    let run = || {
        let party: Vec<PartyMember> = (1..=members.max(1))
            .map(|i| PartyMember::baseline(&format!("m{i}")))
            .collect();
        let input = SimulationInput {
            guild_id: "local".to_string(),
            boss_hp_left: boss.hp_max,
            boss: boss.clone(),
            party,
            seed: seed.to_string(),
            max_rounds: None,
        };
        simulate(&input, &BasicSkillResolver)
    };

    let first = run();
    let second = run();
    if first.signature != second.signature || first.timeline != second.timeline {
        return Err(format!(
            "replay diverged for seed '{seed}': {} vs {}",
            first.signature, second.signature
        ));
    }
    println!(
        "{}: replay stable, signature {}",
        first.battle_id, first.signature
    );
    Ok(())
}
