//! Raid pipeline orchestration
//!
//! `RaidService` composes every collaborator behind the public entry points:
//! tickets, quota layers, the abuse monitor, boss state, the simulator and
//! the leaderboard cache. Entry points never return `Err`; every outcome is
//! wrapped in an [`Envelope`] with a stable code, and infrastructure failures
//! are logged here and collapsed to `INTERNAL_ERROR`.

mod envelope;

pub use envelope::{Envelope, EnvelopeSummary, ENVELOPE_SCHEMA_VERSION};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::sync::Arc;

use warband_types::RuntimeSettings;

use crate::battle::{
    simulate, BasicSkillResolver, BattlePayload, PartyMember, SimulationInput, SkillResolver,
};
use crate::boss::{builtin_rotation, BossDefinition, BossEncounterState, BossStore, DamageReceipt};
use crate::clock::Clock;
use crate::error::RaidError;
use crate::leaderboard::{LeaderboardEntry, LeaderboardKind, LeaderboardService};
use crate::quota::{
    resolve_limits, AbuseMonitor, QuotaGuard, ACTION_BOSS_CHALLENGE, ACTION_BOSS_RANK,
    ACTION_BOSS_STATUS, ACTION_ISSUE_TICKET, ACTION_LEADERBOARD,
};
use crate::settings::SettingsProvider;
use crate::store::{DocId, DocumentStore, StoreError};
use crate::ticket::{IssuedTicket, ServerSecret, TicketAuthority};

/// Per-member daily challenge attempts against one boss when the settings
/// blob does not say otherwise.
pub const DEFAULT_DAILY_ATTEMPTS: u32 = 3;

// ═══════════════════════════════════════════════════════════════════════════
// Boss Registry
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory set of boss definitions plus the date-based rotation.
pub struct BossRegistry {
    bosses: Vec<BossDefinition>,
}

impl BossRegistry {
    /// Registry over the given definitions; empty falls back to the
    /// built-in rotation.
    pub fn new(bosses: Vec<BossDefinition>) -> Self {
        let bosses = if bosses.is_empty() {
            builtin_rotation()
        } else {
            bosses
        };
        Self { bosses }
    }

    pub fn get(&self, boss_id: &str) -> Option<&BossDefinition> {
        self.bosses.iter().find(|b| b.id == boss_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.bosses.iter().map(|b| b.id.as_str())
    }

    /// Today's boss: the settings rotation filtered to known ids (all known
    /// bosses when that leaves nothing), indexed by UTC day number.
    pub fn active_for(&self, now: DateTime<Utc>, rotation: &[String]) -> &BossDefinition {
        let candidates: Vec<&BossDefinition> = rotation
            .iter()
            .filter_map(|id| self.get(id))
            .collect();

        let day = now.date_naive().num_days_from_ce() as usize;
        if candidates.is_empty() {
            &self.bosses[day % self.bosses.len()]
        } else {
            candidates[day % candidates.len()]
        }
    }
}

impl Default for BossRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Request / Response Payloads
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ChallengeRequest {
    pub member_id: String,
    pub guild_id: String,
    pub token: String,
    pub signature: String,
    /// Fellow members fighting alongside the challenger. The challenger is
    /// always in the party whether listed or not; only they spend an attempt.
    pub party: Vec<String>,
    /// Specific boss; `None` challenges today's rotation boss
    pub boss_id: Option<String>,
    /// Replay seed; `None` derives one from the member and current time
    pub seed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeOutcome {
    pub victory: bool,
    pub battle: BattlePayload,
    pub receipt: DamageReceipt,
}

#[derive(Debug, Clone, Serialize)]
pub struct BossStatusView {
    pub boss_id: String,
    pub name: String,
    pub level: u32,
    pub hp_max: i64,
    pub hp_left: i64,
    pub ended: bool,
    pub total_damage: i64,
    pub participants: usize,
    pub attempts_used: u32,
    pub attempts_limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankView {
    pub boss_id: String,
    pub entries: Vec<LeaderboardEntry>,
    pub my_rank: Option<u32>,
    pub my_score: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardView {
    pub kind: LeaderboardKind,
    pub entries: Vec<LeaderboardEntry>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════

pub struct RaidService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    tickets: TicketAuthority<S>,
    quota: QuotaGuard<S>,
    monitor: AbuseMonitor<S>,
    bosses: BossStore<S>,
    registry: BossRegistry,
    settings: SettingsProvider<S>,
    leaderboards: LeaderboardService<S>,
    resolver: Box<dyn SkillResolver>,
}

impl<S: DocumentStore> RaidService<S> {
    pub fn new(
        store: Arc<S>,
        secret: ServerSecret,
        clock: Arc<dyn Clock>,
        registry: BossRegistry,
    ) -> Self {
        Self {
            tickets: TicketAuthority::new(store.clone(), secret, clock.clone()),
            quota: QuotaGuard::new(store.clone(), clock.clone()),
            monitor: AbuseMonitor::new(store.clone(), clock.clone()),
            bosses: BossStore::new(store.clone(), clock.clone()),
            settings: SettingsProvider::new(store.clone(), clock.clone()),
            leaderboards: LeaderboardService::new(store.clone(), clock.clone()),
            resolver: Box::new(BasicSkillResolver),
            registry,
            store,
            clock,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn SkillResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    // ─── Entry Points ────────────────────────────────────────────────────────

    /// Issue a single-use action ticket for a member.
    pub async fn issue_action_ticket(&self, member_id: &str) -> Envelope<IssuedTicket> {
        let result = self.issue_inner(member_id).await;
        self.respond(ACTION_ISSUE_TICKET, result)
    }

    async fn issue_inner(&self, member_id: &str) -> Result<IssuedTicket, RaidError> {
        let settings = self.settings.current().await;
        let limits = resolve_limits(ACTION_ISSUE_TICKET, &settings);
        self.quota
            .check_rate(member_id, ACTION_ISSUE_TICKET, limits.rate_ms)
            .await?;
        self.monitor
            .record(
                member_id,
                None,
                ACTION_ISSUE_TICKET,
                &settings.risk_control.abuse_detection,
            )
            .await;
        self.tickets.issue(member_id).await
    }

    /// Current encounter status for a boss (today's rotation boss by
    /// default). Spends the presented ticket.
    pub async fn boss_status(
        &self,
        member_id: &str,
        guild_id: &str,
        token: &str,
        signature: &str,
        boss_id: Option<&str>,
    ) -> Envelope<BossStatusView> {
        let result = self
            .status_inner(member_id, guild_id, token, signature, boss_id)
            .await;
        self.respond(ACTION_BOSS_STATUS, result)
    }

    async fn status_inner(
        &self,
        member_id: &str,
        guild_id: &str,
        token: &str,
        signature: &str,
        boss_id: Option<&str>,
    ) -> Result<BossStatusView, RaidError> {
        let settings = self.settings.current().await;
        if !settings.boss.enabled {
            return Err(RaidError::FeatureDisabled { feature: "boss" });
        }

        self.tickets.verify(member_id, token, signature).await?;
        self.monitor
            .record(
                member_id,
                Some(guild_id),
                ACTION_BOSS_STATUS,
                &settings.risk_control.abuse_detection,
            )
            .await;
        let limits = resolve_limits(ACTION_BOSS_STATUS, &settings);
        self.quota
            .check_rate(member_id, ACTION_BOSS_STATUS, limits.rate_ms)
            .await?;

        let boss = self.resolve_boss(boss_id, &settings)?;
        let state = self.bosses.load_or_create(guild_id, boss).await?;
        let attempts_limit = daily_attempts_limit(&settings);
        let date_key = crate::clock::utc_date_key(self.clock.now());

        Ok(BossStatusView {
            boss_id: state.boss_id.clone(),
            name: state.name.clone(),
            level: boss.level,
            hp_max: state.hp_max,
            hp_left: state.hp_left,
            ended: state.is_ended(),
            total_damage: state.total_damage,
            participants: state.damage_by_member.len(),
            attempts_used: state.attempts_today(member_id, &date_key),
            attempts_limit,
        })
    }

    /// Spend a ticket and fight the boss. The full gauntlet runs in order:
    /// feature gate, ticket, rate, cooldown, daily quota, encounter state.
    pub async fn boss_challenge(&self, req: ChallengeRequest) -> Envelope<ChallengeOutcome> {
        let result = self.challenge_inner(&req).await;
        self.respond(ACTION_BOSS_CHALLENGE, result)
    }

    async fn challenge_inner(&self, req: &ChallengeRequest) -> Result<ChallengeOutcome, RaidError> {
        let settings = self.settings.current().await;
        if !settings.boss.enabled {
            return Err(RaidError::FeatureDisabled { feature: "boss" });
        }

        self.tickets
            .verify(&req.member_id, &req.token, &req.signature)
            .await?;
        self.monitor
            .record(
                &req.member_id,
                Some(&req.guild_id),
                ACTION_BOSS_CHALLENGE,
                &settings.risk_control.abuse_detection,
            )
            .await;

        let mut limits = resolve_limits(ACTION_BOSS_CHALLENGE, &settings);
        if let Some(cooldown) = settings.boss.cooldown_ms
            && cooldown > 0
        {
            limits.cooldown_ms = cooldown;
        }
        self.quota
            .check_rate(&req.member_id, ACTION_BOSS_CHALLENGE, limits.rate_ms)
            .await?;
        self.quota
            .check_cooldown(
                &req.member_id,
                Some(&req.guild_id),
                ACTION_BOSS_CHALLENGE,
                limits.cooldown_ms,
            )
            .await?;
        self.quota
            .assert_daily_limit(
                &req.member_id,
                Some(&req.guild_id),
                ACTION_BOSS_CHALLENGE,
                limits.daily_limit,
            )
            .await?;

        let boss = self.resolve_boss(req.boss_id.as_deref(), &settings)?.clone();
        let state = self.bosses.load_or_create(&req.guild_id, &boss).await?;
        let attempts_limit = daily_attempts_limit(&settings);
        self.precheck_encounter(&state, &req.member_id, attempts_limit)?;

        self.quota
            .reserve_daily_quota(
                &req.member_id,
                Some(&req.guild_id),
                ACTION_BOSS_CHALLENGE,
                limits.daily_limit,
            )
            .await?;

        let now = self.clock.now();
        let seed = req
            .seed
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}:{}", req.member_id, now.timestamp_millis()));

        let mut roster = vec![req.member_id.clone()];
        for id in &req.party {
            if !roster.contains(id) {
                roster.push(id.clone());
            }
        }
        let mut party = Vec::with_capacity(roster.len());
        for id in &roster {
            party.push(self.load_party_member(&req.guild_id, id).await);
        }

        let input = SimulationInput {
            guild_id: req.guild_id.clone(),
            boss: boss.clone(),
            boss_hp_left: state.hp_left,
            party,
            seed,
            max_rounds: settings.boss.max_rounds,
        };
        let battle = simulate(&input, self.resolver.as_ref());

        let receipt = self
            .bosses
            .apply_damage(
                &req.guild_id,
                &boss.id,
                &req.member_id,
                &battle.damage_by_member,
                attempts_limit,
            )
            .await?;

        self.archive_battle(&battle).await;
        if receipt.boss_defeated {
            tracing::info!(
                guild_id = req.guild_id,
                boss_id = boss.id,
                member_id = req.member_id,
                "boss defeated"
            );
            if let Err(e) = self
                .leaderboards
                .force_refresh(LeaderboardKind::Boss, &req.guild_id)
                .await
            {
                tracing::warn!(error = %e, "leaderboard refresh after defeat failed");
            }
        }

        Ok(ChallengeOutcome {
            victory: battle.victory,
            battle,
            receipt,
        })
    }

    /// Damage ranking within one boss encounter, with the caller's own
    /// position. Ranks the stored encounter document directly, so a freshly
    /// landed hit shows up immediately. Spends the presented ticket.
    pub async fn boss_rank(
        &self,
        member_id: &str,
        guild_id: &str,
        token: &str,
        signature: &str,
        boss_id: Option<&str>,
        limit: usize,
    ) -> Envelope<RankView> {
        let result = self
            .rank_inner(member_id, guild_id, token, signature, boss_id, limit)
            .await;
        self.respond(ACTION_BOSS_RANK, result)
    }

    async fn rank_inner(
        &self,
        member_id: &str,
        guild_id: &str,
        token: &str,
        signature: &str,
        boss_id: Option<&str>,
        limit: usize,
    ) -> Result<RankView, RaidError> {
        let settings = self.settings.current().await;
        if !settings.boss.enabled {
            return Err(RaidError::FeatureDisabled { feature: "boss" });
        }

        self.tickets.verify(member_id, token, signature).await?;
        self.monitor
            .record(
                member_id,
                Some(guild_id),
                ACTION_BOSS_RANK,
                &settings.risk_control.abuse_detection,
            )
            .await;
        let limits = resolve_limits(ACTION_BOSS_RANK, &settings);
        self.quota
            .check_rate(member_id, ACTION_BOSS_RANK, limits.rate_ms)
            .await?;

        let boss = self.resolve_boss(boss_id, &settings)?;
        let mut ranked: Vec<(String, i64)> = match self.bosses.load(guild_id, &boss.id).await? {
            Some(state) => state.damage_by_member.into_iter().collect(),
            None => Vec::new(),
        };
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mine = ranked.iter().position(|(id, _)| id == member_id);
        let my_rank = mine.map(|i| i as u32 + 1);
        let my_score = mine.map_or(0, |i| ranked[i].1);

        ranked.truncate(limit.clamp(1, crate::leaderboard::CACHE_CAP));
        let mut entries = Vec::with_capacity(ranked.len());
        for (rank, (id, score)) in ranked.into_iter().enumerate() {
            let display_name = self.leaderboards.member_display_name(guild_id, &id).await;
            entries.push(LeaderboardEntry {
                rank: rank as u32 + 1,
                member_id: id,
                display_name,
                score,
            });
        }

        Ok(RankView {
            boss_id: boss.id.clone(),
            entries,
            my_rank,
            my_score,
        })
    }

    /// Any leaderboard kind for a guild. `force` drops the cached snapshot
    /// before serving.
    pub async fn get_leaderboard(
        &self,
        member_id: &str,
        guild_id: &str,
        kind: LeaderboardKind,
        limit: usize,
        force: bool,
    ) -> Envelope<LeaderboardView> {
        let result = self
            .leaderboard_inner(member_id, guild_id, kind, limit, force)
            .await;
        self.respond(ACTION_LEADERBOARD, result)
    }

    async fn leaderboard_inner(
        &self,
        member_id: &str,
        guild_id: &str,
        kind: LeaderboardKind,
        limit: usize,
        force: bool,
    ) -> Result<LeaderboardView, RaidError> {
        let settings = self.settings.current().await;
        let limits = resolve_limits(ACTION_LEADERBOARD, &settings);
        self.quota
            .check_rate(member_id, ACTION_LEADERBOARD, limits.rate_ms)
            .await?;

        if force {
            self.leaderboards.force_refresh(kind, guild_id).await?;
        }
        let entries = self.leaderboards.get(kind, guild_id, limit).await?;
        Ok(LeaderboardView { kind, entries })
    }

    /// Remove expired tickets and quota records. Intended for a periodic
    /// maintenance task or the CLI.
    pub async fn run_maintenance(&self) -> Result<(usize, usize), RaidError> {
        let tickets = self.tickets.sweep_expired().await?;
        let quota = self.quota.sweep_expired().await?;
        tracing::info!(tickets, quota, "maintenance sweep complete");
        Ok((tickets, quota))
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn resolve_boss<'a>(
        &'a self,
        boss_id: Option<&str>,
        settings: &RuntimeSettings,
    ) -> Result<&'a BossDefinition, RaidError> {
        match boss_id {
            Some(id) => self.registry.get(id).ok_or_else(|| RaidError::BossNotFound {
                boss_id: id.to_string(),
            }),
            None => Ok(self
                .registry
                .active_for(self.clock.now(), &settings.boss.rotation)),
        }
    }

    /// Cheap rejects against the already loaded state. The authoritative
    /// re-check happens inside `apply_damage` against a fresh read.
    fn precheck_encounter(
        &self,
        state: &BossEncounterState,
        member_id: &str,
        attempts_limit: u32,
    ) -> Result<(), RaidError> {
        if state.is_ended() {
            return Err(RaidError::BossEnded {
                boss_id: state.boss_id.clone(),
            });
        }
        let date_key = crate::clock::utc_date_key(self.clock.now());
        let used = state.attempts_today(member_id, &date_key);
        if attempts_limit > 0 && used >= attempts_limit {
            return Err(RaidError::BossAttemptsExhausted {
                used,
                limit: attempts_limit,
            });
        }
        Ok(())
    }

    async fn load_party_member(&self, guild_id: &str, member_id: &str) -> PartyMember {
        let id = DocId::new("members", format!("{guild_id}:{member_id}"));
        match self.store.get(&id).await {
            Ok(Some(doc)) => serde_json::from_value(doc)
                .unwrap_or_else(|_| PartyMember::baseline(member_id)),
            Ok(None) => PartyMember::baseline(member_id),
            Err(e) => {
                tracing::warn!(member_id, error = %e, "member profile unreadable, using baseline");
                PartyMember::baseline(member_id)
            }
        }
    }

    /// Archive the battle transcript. Best-effort; a failure here never fails
    /// the challenge that produced it.
    async fn archive_battle(&self, battle: &BattlePayload) {
        let id = DocId::new("battles", battle.battle_id.clone());
        let Ok(doc) = serde_json::to_value(battle) else {
            return;
        };
        match self.store.create(&id, doc).await {
            Ok(()) | Err(StoreError::AlreadyExists { .. }) => {}
            Err(e) => tracing::warn!(battle_id = battle.battle_id, error = %e, "battle archive failed"),
        }
    }

    fn respond<T: Serialize>(
        &self,
        action: &'static str,
        result: Result<T, RaidError>,
    ) -> Envelope<T> {
        let now = self.clock.now();
        match result {
            Ok(data) => Envelope::ok(action, data, now),
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(action, error = %err, "request failed internally");
                } else {
                    tracing::debug!(action, code = err.code(), "request rejected");
                }
                Envelope::fail(action, &err, now)
            }
        }
    }
}

/// Per-boss daily attempts from settings, falling back to the default. A
/// zero override disables the cap.
fn daily_attempts_limit(settings: &RuntimeSettings) -> u32 {
    settings.boss.daily_attempts.unwrap_or(DEFAULT_DAILY_ATTEMPTS)
}
