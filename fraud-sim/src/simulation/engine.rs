//! Simulation execution engine.
//!
//! Each period the market posts jobs, and every job walks the lifecycle
//! strictly in order:
//!
//! 1. match a provider
//! 2. lock the stake
//! 3. execute (honestly or not)
//! 4. client audit
//! 5. client dispute
//! 6. optional watchers
//! 7. settle payment and stake
//! 8. book any undetected loss
//! 9. update reputation
//!
//! The engine owns the only random number generator. Given a seed, a run is
//! fully reproducible.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::analysis::{compute_theoretical_equilibrium, WelfareMetrics};
use crate::config::{ConfigError, ReputationParameters, SimulationConfig};
use crate::protocol::ProtocolParameters;

use super::agent::{Agent, AgentId};
use super::agents::{
    should_dispute, AuditContext, ChallengerKind, Challenger, Client, ClientKind, DisputeContext,
    ExecutionContext, Provider, ProviderKind, WatchAction,
};
use super::job::Job;
use super::market::{Candidate, ClientSlot, Market};
use super::metrics::{AttackMetrics, PeriodHistory, PeriodStats, RunTotals, SimulationResult};
use super::queue::JobQueue;
use super::reputation::{reputation_prior, ReputationSystem, SelfBuyingDetector};

/// Runs one configured simulation to completion.
#[derive(Debug)]
pub struct SimulationEngine {
    config: SimulationConfig,
    rng: ChaCha8Rng,

    providers: Vec<Provider>,
    clients: Vec<Client>,
    challengers: Vec<Challenger>,

    market: Market,
    reputation: ReputationSystem,
    self_buy: SelfBuyingDetector,
    queue: JobQueue,

    period: u64,
    totals: RunTotals,
    history: PeriodHistory,
    sybil_creation_costs: f64,
    attacker_frauds: u64,
    attacker_frauds_undetected: u64,
}

impl SimulationEngine {
    /// Validate the configuration and build the population.
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let market = Market::new(&config.protocol, &config.job_values, config.matching.clone())?;
        let mut reputation = ReputationSystem::new(config.reputation.clone());
        let self_buy = SelfBuyingDetector::from_params(&config.reputation);
        let queue = JobQueue::new(config.protocol.challenge_window);

        let population = Population::build(&config);
        for provider in &population.providers {
            reputation.register(provider.id());
        }

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            providers: population.providers,
            clients: population.clients,
            challengers: population.challengers,
            market,
            reputation,
            self_buy,
            queue,
            period: 0,
            totals: RunTotals::default(),
            history: PeriodHistory::default(),
            sybil_creation_costs: population.sybil_creation_costs,
            attacker_frauds: 0,
            attacker_frauds_undetected: 0,
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn challengers(&self) -> &[Challenger] {
        &self.challengers
    }

    pub fn reputation_system(&self) -> &ReputationSystem {
        &self.reputation
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// Run all configured periods.
    pub fn run(self) -> SimulationResult {
        self.run_with_observer(|_| {})
    }

    /// Run all configured periods, handing each period's stats to `observer`.
    pub fn run_with_observer<F: FnMut(&PeriodStats)>(mut self, mut observer: F) -> SimulationResult {
        info!(
            "Starting simulation: {} providers, {} clients, {} challengers, {} periods, seed {}",
            self.providers.len(),
            self.clients.len(),
            self.challengers.len(),
            self.config.n_periods,
            self.config.seed
        );

        while self.period < self.config.n_periods {
            let stats = self.step();
            observer(&stats);
        }

        let result = self.finish();
        info!(
            "Simulation finished: {} jobs executed, fraud rate {:.4}, detection rate {:.4}",
            result.totals.jobs_executed, result.fraud_rate, result.detection_rate
        );
        result
    }

    /// Advance one period.
    pub fn step(&mut self) -> PeriodStats {
        let period = self.period;
        let mut stats = PeriodStats::new(period);

        let slots: Vec<ClientSlot> = self
            .clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_active())
            .map(|(index, c)| ClientSlot {
                index,
                id: c.id().clone(),
            })
            .collect();
        let jobs = self.market.generate_jobs(
            period,
            self.config.jobs_per_period,
            &slots,
            &mut self.rng,
        );
        stats.jobs_generated = jobs.len() as u64;

        for job in jobs {
            self.process_job(job, &mut stats);
        }

        let finalized = self.queue.finalize_expired(period);
        self.totals.jobs_finalized += finalized.len() as u64;

        self.reputation.apply_time_decay();
        self.sync_reputations();
        for provider in &mut self.providers {
            provider.record_period();
        }
        for client in &mut self.clients {
            client.record_period();
        }
        for challenger in &mut self.challengers {
            challenger.record_period();
        }

        stats.mean_reputation = if self.providers.is_empty() {
            0.0
        } else {
            self.providers.iter().map(|p| p.reputation()).sum::<f64>() / self.providers.len() as f64
        };
        stats.welfare = self.welfare().total_welfare;
        self.market.record_period(stats.jobs_generated as usize);

        debug!(
            "Period {}: {} executed, {} frauds, {} detected, {} disputes, {} awaiting finality (next at {:?})",
            period,
            stats.jobs_executed,
            stats.frauds,
            stats.frauds_detected,
            stats.disputes,
            self.queue.pending_len(),
            self.queue.next_deadline()
        );

        self.totals.absorb(&stats);
        self.history.push(&stats);
        self.period += 1;
        stats
    }

    fn process_job(&mut self, mut job: Job, stats: &mut PeriodStats) {
        let protocol = &self.config.protocol;

        // Matching
        let candidates: Vec<Candidate> = self
            .providers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_eligible(protocol.min_stake))
            .map(|(index, p)| Candidate {
                index,
                reputation: self.reputation.reputation(p.id()),
                stake_capacity: p.balance(),
            })
            .collect();
        let Some(position) = self.market.match_provider(&candidates, &mut self.rng) else {
            trace!("Job {} unmatched: no eligible provider", job.id.0);
            stats.jobs_unmatched += 1;
            return;
        };
        let pi = candidates[position].index;
        stats.jobs_matched += 1;
        let provider_id = self.providers[pi].id().clone();
        job.assign(pi, provider_id.clone());
        self.clients[job.client_index].stats.jobs_requested += 1;

        // Staking
        let provider = &mut self.providers[pi];
        let stake = provider
            .decide_stake(protocol, job.value)
            .min(provider.balance());
        if stake < protocol.min_stake || !provider.state_mut().lock_stake(stake) {
            trace!("Job {} abandoned: {} could not post stake {:.2}", job.id.0, provider_id, stake);
            stats.jobs_unexecuted += 1;
            return;
        }
        job.stake = stake;
        provider.stats.jobs_accepted += 1;
        provider.stats.stake_volume += stake;
        provider.stats.capital_costs += protocol.capital_cost(stake);

        // Execution
        let reputation = self.reputation.reputation(&provider_id);
        let estimated_detection = estimate_detection(
            &self.clients,
            protocol,
            &self.config.reputation,
            &job,
            &provider_id,
            reputation,
            stake,
        );
        let honest = provider.decide_execution(
            &ExecutionContext {
                protocol,
                job: &job,
                stake,
                reputation,
                estimated_detection,
            },
            &mut self.rng,
        );
        job.executed_honestly = Some(honest);
        if honest {
            provider.stats.honest_executions += 1;
            provider.stats.execution_costs += protocol.honest_cost;
        } else {
            provider.stats.cheats += 1;
            provider.stats.execution_costs += protocol.cheat_cost;
            stats.frauds += 1;
        }
        stats.jobs_executed += 1;
        stats.stake_volume += stake;
        stats.value_volume += job.value;
        stats.loss_volume += job.loss_if_incorrect;
        self.queue.enqueue(job.id, self.period, stake);

        let mut slashed = 0.0;

        // Audit and dispute by the client
        let client = &mut self.clients[job.client_index];
        let wants_audit = client.decide_audit(
            &AuditContext {
                protocol,
                job: &job,
                provider_id: &provider_id,
                provider_reputation: reputation,
                stake,
            },
            &mut self.rng,
        );
        if wants_audit {
            if client.state_mut().debit(protocol.verification_cost) {
                job.audited = true;
                client.stats.audits += 1;
                client.stats.audit_costs += protocol.verification_cost;
                stats.audits += 1;
                if !honest {
                    job.fraud_detected = true;
                    client.stats.fraud_detected += 1;
                }
                client.observe_audit(&provider_id, !honest);
            } else {
                trace!("Job {}: {} cannot afford verification", job.id.0, client.id());
            }
        }

        if job.fraud_detected {
            let outlay = protocol.escalation_outlay();
            let ctx = DisputeContext {
                protocol,
                job: &job,
                stake,
            };
            if should_dispute(&ctx, client.balance(), outlay) && client.state_mut().debit(outlay) {
                job.dispute_initiated = true;
                client.state_mut().disputes_initiated += 1;
                client.stats.dispute_costs += protocol.proof_cost + protocol.tx_cost;
                stats.disputes += 1;

                if self.rng.gen::<f64>() < protocol.enforcement_reliability {
                    let (taken, reward) = uphold(&mut self.providers[pi], protocol, stake, job.value);
                    slashed += taken;
                    client.state_mut().credit(reward + protocol.challenge_bond);
                    client.state_mut().disputes_won += 1;
                    client.stats.dispute_rewards += reward;
                    job.dispute_successful = true;
                    stats.disputes_successful += 1;
                    stats.stake_slashed += taken;
                    trace!("Job {}: dispute upheld, slashed {:.2}", job.id.0, taken);
                } else {
                    self.providers[pi].state_mut().disputes_won += 1;
                    client.state_mut().disputes_lost += 1;
                    client.stats.bonds_forfeited += protocol.challenge_bond;
                    stats.disputes_lost += 1;
                    trace!("Job {}: dispute failed enforcement", job.id.0);
                }
            }
        }

        // Watchers
        if self.config.watchers_enabled && !job.dispute_successful {
            slashed += self.run_watchers(&mut job, pi, stats);
        }

        // Settlement
        let provider = &mut self.providers[pi];
        if job.dispute_successful {
            provider.state_mut().jobs_failed += 1;
        } else {
            provider.state_mut().credit(job.value);
            provider.stats.payments_received += job.value;
            provider.state_mut().jobs_completed += 1;
        }
        provider.state_mut().unlock_stake(stake - slashed);

        // Fraud nobody caught lands on the client.
        if !honest && !job.fraud_detected {
            let client = &mut self.clients[job.client_index];
            client.stats.losses_from_fraud += job.loss_if_incorrect;
            stats.client_losses += job.loss_if_incorrect;
            if let Err(e) = client.state_mut().try_debit(job.loss_if_incorrect) {
                warn!("Client {} cannot absorb fraud loss: {}", client.id(), e);
            }
        }

        // Reputation reacts to proven fraud only.
        let proven = job.is_proven_fraud();
        let (_, after) = self
            .reputation
            .record_job_outcome(&provider_id, !proven, stake, job.value);
        let provider = &mut self.providers[pi];
        let delta = after - provider.reputation();
        provider.state_mut().update_reputation(delta);
        self.self_buy.record_job(&provider_id, &job.client_id);

        if !honest {
            if job.fraud_detected {
                stats.frauds_detected += 1;
            }
            if provider.kind().is_attacker() {
                self.attacker_frauds += 1;
                if !job.fraud_detected {
                    self.attacker_frauds_undetected += 1;
                }
            }
        }
    }

    /// Let each challenger look at the job in turn. Returns stake slashed.
    fn run_watchers(&mut self, job: &mut Job, pi: usize, stats: &mut PeriodStats) -> f64 {
        let protocol = &self.config.protocol;
        let fraudulent = job.is_fraudulent();
        let stake = job.stake;

        for challenger in &mut self.challengers {
            let ctx = DisputeContext {
                protocol,
                job: &*job,
                stake,
            };
            let upheld = match challenger.decide_watch(&ctx, &mut self.rng) {
                WatchAction::Ignore => continue,
                WatchAction::Monitor => {
                    if !challenger.monitor() || !fraudulent {
                        continue;
                    }
                    if !challenger.decide_dispute(&ctx) {
                        job.fraud_detected = true;
                        continue;
                    }
                    job.fraud_detected = true;
                    match challenger.file_dispute(protocol, true, &mut self.rng) {
                        Some(upheld) => upheld,
                        None => continue,
                    }
                }
                WatchAction::Grief => {
                    let outcome = challenger.attempt_grief(protocol, fraudulent, &mut self.rng);
                    if !outcome.filed {
                        continue;
                    }
                    if outcome.accidental_catch.is_some() {
                        job.fraud_detected = true;
                    }
                    outcome.accidental_catch == Some(true)
                }
            };

            job.dispute_initiated = true;
            stats.disputes += 1;
            if upheld {
                let (taken, reward) = uphold(&mut self.providers[pi], protocol, stake, job.value);
                challenger.collect_reward(reward);
                job.dispute_successful = true;
                stats.disputes_successful += 1;
                stats.stake_slashed += taken;
                trace!("Job {}: watcher {} upheld a dispute", job.id.0, challenger.id());
                return taken;
            }
            self.providers[pi].state_mut().disputes_won += 1;
            stats.disputes_lost += 1;
        }
        0.0
    }

    /// Copy the reputation system's scores onto the agents.
    fn sync_reputations(&mut self) {
        for provider in &mut self.providers {
            let score = self.reputation.reputation(provider.id());
            let delta = score - provider.reputation();
            provider.state_mut().update_reputation(delta);
        }
    }

    fn provider_profits(&self) -> BTreeMap<AgentId, f64> {
        self.providers
            .iter()
            .map(|p| (p.id().clone(), p.net_profit()))
            .collect()
    }

    fn client_losses(&self) -> BTreeMap<AgentId, f64> {
        self.clients
            .iter()
            .map(|c| (c.id().clone(), c.stats.net_loss()))
            .collect()
    }

    fn challenger_profits(&self) -> BTreeMap<AgentId, f64> {
        self.challengers
            .iter()
            .map(|c| (c.id().clone(), c.state().total_profit()))
            .collect()
    }

    fn welfare(&self) -> WelfareMetrics {
        WelfareMetrics::compute(
            &self.provider_profits(),
            &self.client_losses(),
            &self.challenger_profits(),
            self.totals.frauds,
            self.totals.jobs_executed,
        )
    }

    fn attack_metrics(&self) -> AttackMetrics {
        let mut metrics = AttackMetrics {
            sybil_creation_costs: self.sybil_creation_costs,
            attacker_frauds: self.attacker_frauds,
            attacker_frauds_undetected: self.attacker_frauds_undetected,
            ..Default::default()
        };

        for provider in &self.providers {
            if self.reputation.detect_reputation_farming(provider.id()) {
                metrics.farming_suspects.push(provider.id().clone());
            }
        }
        for id in self.self_buy.providers() {
            if let Some(report) = self.self_buy.detect(id) {
                if report.is_suspicious {
                    metrics.self_buy_suspects.insert(id.clone(), report);
                }
            }
        }

        let (attackers, honest): (Vec<&Provider>, Vec<&Provider>) =
            self.providers.iter().partition(|p| p.kind().is_attacker());
        metrics.attacker_total_profit = attackers.iter().map(|p| p.net_profit()).sum();
        if !attackers.is_empty() {
            metrics.attacker_mean_profit = metrics.attacker_total_profit / attackers.len() as f64;
        }
        let honest: Vec<&Provider> = honest
            .into_iter()
            .filter(|p| p.kind() == ProviderKind::Honest)
            .collect();
        if !honest.is_empty() {
            metrics.honest_mean_profit =
                honest.iter().map(|p| p.net_profit()).sum::<f64>() / honest.len() as f64;
        }
        if metrics.honest_mean_profit > 0.0 {
            metrics.attack_success_ratio = metrics.attacker_mean_profit / metrics.honest_mean_profit;
        }

        for challenger in &self.challengers {
            if challenger.kind() == ChallengerKind::Griefing {
                metrics.frivolous_disputes += challenger.stats.frivolous_disputes;
                metrics.accidental_catches += challenger.stats.accidental_catches;
                metrics.griefing_costs +=
                    challenger.stats.dispute_costs + challenger.stats.bonds_forfeited;
            }
        }
        metrics
    }

    fn finish(self) -> SimulationResult {
        let totals = self.totals.clone();
        let mean_job_value = totals.mean_job_value();
        let mean_stake = totals.mean_stake();
        let mean_loss = totals.mean_loss();

        SimulationResult {
            seed: self.config.seed,
            n_periods: self.period,
            fraud_rate: totals.fraud_rate(),
            detection_rate: totals.detection_rate(),
            dispute_success_rate: totals.dispute_success_rate(),
            history: self.history.clone(),
            provider_profits: self.provider_profits(),
            provider_kinds: self
                .providers
                .iter()
                .map(|p| (p.id().clone(), p.kind()))
                .collect(),
            client_losses: self.client_losses(),
            challenger_profits: self.challenger_profits(),
            final_reputations: self
                .providers
                .iter()
                .map(|p| (p.id().clone(), self.reputation.reputation(p.id())))
                .collect(),
            reputation: self.reputation.statistics(),
            welfare: self.welfare(),
            attack: self.attack_metrics(),
            mean_job_value,
            mean_stake,
            mean_loss,
            theoretical: compute_theoretical_equilibrium(
                &self.config.protocol,
                mean_job_value,
                mean_stake,
                mean_loss,
            ),
            totals,
        }
    }
}

/// Detection probability a provider expects for this job.
///
/// Clients whose audit rate ignores the provider (always, never, fixed rate)
/// count at that rate. Everyone else counts at `v*` discounted by the
/// provider's reputation, `min(v*·e^{-s(ρ-50)}, 1)`, so a well-reputed
/// provider expects fewer audits than the equilibrium rate.
fn estimate_detection(
    clients: &[Client],
    protocol: &ProtocolParameters,
    reputation_params: &ReputationParameters,
    job: &Job,
    provider_id: &AgentId,
    reputation: f64,
    stake: f64,
) -> f64 {
    if clients.is_empty() {
        return 0.0;
    }
    let v_star = protocol.equilibrium_audit_probability(job.value, stake);
    let discounted =
        reputation_prior(reputation, v_star, reputation_params.prior_sensitivity).min(1.0);
    let ctx = AuditContext {
        protocol,
        job,
        provider_id,
        provider_reputation: reputation,
        stake,
    };
    let mut fixed = 0.0;
    let mut flexible = 0usize;
    for client in clients {
        match client.kind() {
            ClientKind::AlwaysAudit | ClientKind::NeverAudit | ClientKind::Naive => {
                fixed += client.audit_probability(&ctx);
            }
            _ => flexible += 1,
        }
    }
    let n = clients.len() as f64;
    // Shares keep a population of one kind exactly at its rate.
    (fixed / n + (flexible as f64 / n) * discounted).clamp(0.0, 1.0)
}

/// Slash the provider's stake for an upheld dispute.
///
/// Returns the amount slashed and the challenger's reward
/// `β·slashed + λ·P`.
fn uphold(provider: &mut Provider, protocol: &ProtocolParameters, stake: f64, payment: f64) -> (f64, f64) {
    let slashed = provider.state_mut().slash_stake(stake);
    provider.state_mut().disputes_lost += 1;
    provider.stats.times_slashed += 1;
    provider.stats.total_slashed += slashed;
    let reward = protocol.slash_share * slashed + protocol.payment_share * payment;
    (slashed, reward)
}

/// The agents of a run, in mix order.
struct Population {
    providers: Vec<Provider>,
    clients: Vec<Client>,
    challengers: Vec<Challenger>,
    sybil_creation_costs: f64,
}

impl Population {
    fn build(config: &SimulationConfig) -> Self {
        let provider_counts = config.provider_mix.counts(config.n_providers);
        let client_counts = config.client_mix.counts(config.n_clients);
        let colluding_providers = count_of(&provider_counts, ProviderKind::Colluding);
        let colluding_clients = count_of(&client_counts, ClientKind::Colluding);
        let ring_size = config.attack.sybil_identities_per_attacker.max(1);

        let mut providers = Vec::with_capacity(config.n_providers);
        let mut sybil_creation_costs = 0.0;
        for (kind, count) in provider_counts {
            for i in 0..count {
                let ring = i / ring_size;
                let (id, partner) = match kind {
                    ProviderKind::Sybil => (AgentId::new(format!("S{:02}_{}", ring, i % ring_size)), None),
                    ProviderKind::Colluding => (
                        collusion_id(i, "P"),
                        (i < colluding_clients).then(|| collusion_id(i, "C")),
                    ),
                    _ => (AgentId::new(format!("P_{}_{}", kind.id_tag(), i)), None),
                };
                let mut provider =
                    Provider::with_kind(id, kind, &config.agents, &config.attack, partner);
                if kind == ProviderKind::Sybil {
                    let cost = config.attack.sybil_creation_cost;
                    match provider.state_mut().try_debit(cost) {
                        Ok(()) => sybil_creation_costs += cost,
                        Err(e) => warn!("Sybil {} cannot pay creation cost: {}", provider.id(), e),
                    }
                }
                providers.push(provider);
            }
        }

        let mut clients = Vec::with_capacity(config.n_clients);
        for (kind, count) in client_counts {
            for i in 0..count {
                let (id, partner) = match kind {
                    ClientKind::Colluding => (
                        collusion_id(i, "C"),
                        (i < colluding_providers).then(|| collusion_id(i, "P")),
                    ),
                    _ => (AgentId::new(format!("C_{}_{}", kind.id_tag(), i)), None),
                };
                clients.push(Client::with_kind(id, kind, &config.agents, partner));
            }
        }

        let mut challengers = Vec::with_capacity(config.n_challengers);
        for (kind, count) in config.challenger_mix.counts(config.n_challengers) {
            for i in 0..count {
                let id = AgentId::new(format!("{}_{}", kind.id_tag(), i));
                challengers.push(Challenger::with_kind(id, kind, &config.agents, &config.attack));
            }
        }

        Self {
            providers,
            clients,
            challengers,
            sybil_creation_costs,
        }
    }
}

fn count_of<K: PartialEq + Copy>(counts: &[(K, usize)], kind: K) -> usize {
    counts
        .iter()
        .find(|(k, _)| *k == kind)
        .map_or(0, |(_, n)| *n)
}

/// Colluding pairs share the first four characters of their ids.
fn collusion_id(pair: usize, side: &str) -> AgentId {
    AgentId::new(format!("X{:02}_{}", pair, side))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientMix, MatchingPolicy, ProviderMix};

    fn small_config() -> SimulationConfig {
        SimulationConfig::baseline()
            .with_population(10, 20, 2)
            .with_periods(30)
            .with_jobs_per_period(10)
    }

    fn clients_of(kinds: &[ClientKind]) -> Vec<Client> {
        let agents = crate::config::AgentParameters::default();
        kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| Client::with_kind(AgentId::new(format!("C_{}", i)), *kind, &agents, None))
            .collect()
    }

    fn estimate_at(clients: &[Client], reputation: f64) -> f64 {
        let protocol = ProtocolParameters::default();
        let job = Job::new(crate::simulation::JobId(0), 0, 0, AgentId::new("C_0"), 50.0, 50.0);
        estimate_detection(
            clients,
            &protocol,
            &ReputationParameters::default(),
            &job,
            &AgentId::new("P_0"),
            reputation,
            100.0,
        )
    }

    #[test]
    fn test_estimate_falls_as_reputation_rises() {
        let clients = clients_of(&[ClientKind::MixedEquilibrium; 100]);
        let v_star = ProtocolParameters::default().equilibrium_audit_probability(50.0, 100.0);

        assert_eq!(estimate_at(&clients, 50.0), v_star);
        let low = estimate_at(&clients, 20.0);
        let high = estimate_at(&clients, 80.0);
        assert!(low > v_star && v_star > high);
        assert!((high - v_star * (-0.6f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_blends_fixed_auditors() {
        let clients = clients_of(&[
            ClientKind::AlwaysAudit,
            ClientKind::NeverAudit,
            ClientKind::MixedEquilibrium,
            ClientKind::ReputationWeighted,
        ]);
        let v_star = ProtocolParameters::default().equilibrium_audit_probability(50.0, 100.0);
        let discounted = v_star * (-0.6f64).exp();
        let expected = 0.25 + 0.5 * discounted;
        assert!((estimate_at(&clients, 80.0) - expected).abs() < 1e-12);
        assert_eq!(estimate_at(&[], 80.0), 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = small_config();
        config.provider_mix.honest = 0.9;
        assert!(matches!(
            SimulationEngine::new(config),
            Err(ConfigError::MixSum { .. })
        ));
    }

    #[test]
    fn test_population_matches_mix() {
        let engine = SimulationEngine::new(small_config()).unwrap();
        assert_eq!(engine.providers().len(), 10);
        assert_eq!(engine.clients().len(), 20);
        assert_eq!(engine.challengers().len(), 2);

        let honest = engine
            .providers()
            .iter()
            .filter(|p| p.kind() == ProviderKind::Honest)
            .count();
        assert_eq!(honest, 6);
        assert!(engine.providers()[0].id().as_str().starts_with("P_H_"));
    }

    #[test]
    fn test_colluders_are_paired() {
        let config = small_config()
            .with_provider_mix(ProviderMix::only(ProviderKind::Colluding))
            .with_client_mix(ClientMix::only(ClientKind::Colluding))
            .with_population(3, 3, 0);
        let engine = SimulationEngine::new(config).unwrap();
        assert_eq!(engine.providers()[1].id().as_str(), "X01_P");
        assert_eq!(engine.clients()[1].id().as_str(), "X01_C");
        assert!(engine.providers()[1]
            .id()
            .shares_prefix(engine.clients()[1].id(), 4));
    }

    #[test]
    fn test_sybils_pay_creation_cost() {
        let mut config = small_config()
            .with_provider_mix(ProviderMix::only(ProviderKind::Sybil))
            .with_population(4, 5, 0);
        config.attack.sybil_identities_per_attacker = 2;
        let engine = SimulationEngine::new(config.clone()).unwrap();

        let ids: Vec<&str> = engine.providers().iter().map(|p| p.id().as_str()).collect();
        assert_eq!(ids, vec!["S00_0", "S00_1", "S01_0", "S01_1"]);
        let expected = config.agents.sybil_balance / 2.0 - config.attack.sybil_creation_cost;
        for provider in engine.providers() {
            assert!((provider.balance() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_run_records_every_period() {
        let result = SimulationEngine::new(small_config()).unwrap().run();
        assert_eq!(result.n_periods, 30);
        assert_eq!(result.history.len(), 30);
        assert_eq!(result.totals.jobs_generated, 300);
        assert_eq!(
            result.totals.jobs_generated,
            result.totals.jobs_unmatched + result.totals.jobs_unexecuted + result.totals.jobs_executed
        );
    }

    #[test]
    fn test_observer_sees_each_period() {
        let mut seen = Vec::new();
        let result = SimulationEngine::new(small_config())
            .unwrap()
            .run_with_observer(|stats| seen.push(stats.period));
        assert_eq!(seen, (0..30).collect::<Vec<u64>>());
        assert_eq!(result.history.len(), seen.len());
    }

    #[test]
    fn test_all_honest_never_slashed() {
        let config = small_config()
            .with_provider_mix(ProviderMix::only(ProviderKind::Honest))
            .with_client_mix(ClientMix::only(ClientKind::AlwaysAudit));
        let result = SimulationEngine::new(config).unwrap().run();
        assert_eq!(result.totals.frauds, 0);
        assert_eq!(result.totals.stake_slashed, 0.0);
        assert_eq!(result.detection_rate, 1.0);
        assert!(result.totals.audits > 0);
    }

    #[test]
    fn test_always_audit_catches_every_fraud() {
        let mut config = small_config()
            .with_provider_mix(ProviderMix::only(ProviderKind::Adversarial))
            .with_client_mix(ClientMix::only(ClientKind::AlwaysAudit))
            .with_matching(MatchingPolicy::Random);
        // Honest work costs more than being caught, so adversaries cheat
        // once their farming phase is over.
        config.protocol.honest_cost = 10_000.0;
        let result = SimulationEngine::new(config).unwrap().run();
        assert!(result.totals.frauds > 0);
        assert_eq!(result.totals.frauds, result.totals.frauds_detected);
        assert_eq!(result.totals.client_losses, 0.0);
    }

    #[test]
    fn test_unaffordable_floor_leaves_jobs_unmatched() {
        let mut config = small_config();
        config.protocol = config.protocol.with_min_stake(5_000.0);
        config.protocol.max_stake = 10_000.0;
        let result = SimulationEngine::new(config).unwrap().run();
        assert_eq!(result.totals.jobs_executed, 0);
        assert_eq!(result.totals.jobs_unmatched, result.totals.jobs_generated);
        assert_eq!(result.fraud_rate, 0.0);
        assert_eq!(result.detection_rate, 1.0);
    }

    #[test]
    fn test_queue_finalizes_after_window() {
        let mut config = small_config();
        config.protocol.challenge_window = 5;
        let mut engine = SimulationEngine::new(config).unwrap();
        for _ in 0..10 {
            engine.step();
        }
        // Jobs from periods 0..=4 are final by period 9; 5..=9 are pending.
        assert!(engine.queue().pending_len() > 0);
        assert!(engine.queue().finalized() > 0);
    }
}
