//! Provider agents and their execution strategies.
//!
//! A provider decides how much stake to lock for a job and whether to run
//! the computation honestly. The engine supplies the estimated detection
//! probability; strategies never look at other agents directly.

use std::fmt;

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::Serialize;

use crate::config::{AgentParameters, AttackParameters};
use crate::protocol::ProtocolParameters;
use crate::simulation::agent::{Agent, AgentId, AgentState, Role};
use crate::simulation::job::Job;

/// Strategy tag carried by every provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Honest,
    Rational,
    Adversarial,
    ReputationFarmer,
    Sybil,
    Colluding,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Honest,
        ProviderKind::Rational,
        ProviderKind::Adversarial,
        ProviderKind::ReputationFarmer,
        ProviderKind::Sybil,
        ProviderKind::Colluding,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Honest => "honest",
            ProviderKind::Rational => "rational",
            ProviderKind::Adversarial => "adversarial",
            ProviderKind::ReputationFarmer => "reputation_farmer",
            ProviderKind::Sybil => "sybil",
            ProviderKind::Colluding => "colluding",
        }
    }

    /// Short tag used in agent ids.
    pub fn id_tag(self) -> &'static str {
        match self {
            ProviderKind::Honest => "H",
            ProviderKind::Rational => "R",
            ProviderKind::Adversarial => "A",
            ProviderKind::ReputationFarmer => "RF",
            ProviderKind::Sybil => "S",
            ProviderKind::Colluding => "X",
        }
    }

    /// Strategies that deliberately attack the protocol.
    pub fn is_attacker(self) -> bool {
        matches!(
            self,
            ProviderKind::Adversarial
                | ProviderKind::ReputationFarmer
                | ProviderKind::Sybil
                | ProviderKind::Colluding
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to a stake decision.
#[derive(Clone, Copy, Debug)]
pub struct StakeContext<'a> {
    pub protocol: &'a ProtocolParameters,
    pub job_value: f64,
    pub reputation: f64,
}

/// Inputs to an execution decision.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionContext<'a> {
    pub protocol: &'a ProtocolParameters,
    pub job: &'a Job,
    /// Stake actually locked for the job.
    pub stake: f64,
    /// The provider's reputation before the job.
    pub reputation: f64,
    /// Estimated probability that cheating on this job is detected.
    pub estimated_detection: f64,
}

impl ExecutionContext<'_> {
    pub fn honest_utility(&self) -> f64 {
        honest_utility(self.protocol, self.job.value)
    }

    pub fn cheat_utility(&self) -> f64 {
        cheat_utility(self.protocol, self.job.value, self.stake, self.estimated_detection)
    }
}

/// `U(H) = P - c_H`.
pub fn honest_utility(protocol: &ProtocolParameters, payment: f64) -> f64 {
    payment - protocol.honest_cost
}

/// `E[U(C)] = P - c_F - p_d·(P + S)`.
pub fn cheat_utility(protocol: &ProtocolParameters, payment: f64, stake: f64, p_detect: f64) -> f64 {
    payment - protocol.cheat_cost - p_detect * (payment + stake)
}

/// Stake most strategies offer: at least the protocol floor and the stake
/// that makes disputes viable, at least the configured default, at most the
/// protocol ceiling.
pub fn standard_stake(protocol: &ProtocolParameters, job_value: f64, default_stake: f64) -> f64 {
    let viable = protocol.minimum_viable_stake(job_value).finite().unwrap_or(0.0);
    protocol
        .min_stake
        .max(viable)
        .max(default_stake)
        .min(protocol.max_stake)
}

/// Decision logic of a provider.
pub trait ProviderStrategy: fmt::Debug + Send {
    fn kind(&self) -> ProviderKind;

    fn decide_stake(&self, ctx: &StakeContext<'_>) -> f64;

    /// Returns `true` for honest execution.
    fn decide_execution(&mut self, ctx: &ExecutionContext<'_>, rng: &mut dyn RngCore) -> bool;
}

/// Always executes honestly.
#[derive(Clone, Debug)]
pub struct HonestStrategy {
    pub default_stake: f64,
}

impl ProviderStrategy for HonestStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Honest
    }

    fn decide_stake(&self, ctx: &StakeContext<'_>) -> f64 {
        ctx.protocol
            .min_stake
            .max(self.default_stake)
            .min(ctx.protocol.max_stake)
    }

    fn decide_execution(&mut self, _ctx: &ExecutionContext<'_>, _rng: &mut dyn RngCore) -> bool {
        true
    }
}

/// Expected-utility maximiser.
///
/// Honest when the estimated detection probability meets the incentive
/// threshold. Below it the provider compares utilities with a little
/// Gaussian noise.
#[derive(Clone, Debug)]
pub struct RationalStrategy {
    pub default_stake: f64,
    pub noise: f64,
}

impl RationalStrategy {
    fn is_honest(&self, ctx: &ExecutionContext<'_>, rng: &mut dyn RngCore) -> bool {
        let threshold = ctx.protocol.incentive_threshold(ctx.job.value, ctx.stake);
        if ctx.estimated_detection >= threshold {
            return true;
        }

        let z: f64 = rng.sample(StandardNormal);
        ctx.honest_utility() + self.noise * z >= ctx.cheat_utility()
    }
}

impl ProviderStrategy for RationalStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Rational
    }

    fn decide_stake(&self, ctx: &StakeContext<'_>) -> f64 {
        standard_stake(ctx.protocol, ctx.job_value, self.default_stake)
    }

    fn decide_execution(&mut self, ctx: &ExecutionContext<'_>, rng: &mut dyn RngCore) -> bool {
        self.is_honest(ctx, rng)
    }
}

/// Builds a clean record first, then cheats whenever detection looks unlikely
/// or cheating pays in expectation.
#[derive(Clone, Debug)]
pub struct AdversarialStrategy {
    pub default_stake: f64,
    pub exploit_threshold: f64,
    pub farming_target: u64,
    farming_jobs_completed: u64,
}

impl AdversarialStrategy {
    pub fn new(default_stake: f64, exploit_threshold: f64, farming_target: u64) -> Self {
        Self {
            default_stake,
            exploit_threshold,
            farming_target,
            farming_jobs_completed: 0,
        }
    }

    pub fn in_farming_phase(&self) -> bool {
        self.farming_jobs_completed < self.farming_target
    }
}

impl ProviderStrategy for AdversarialStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Adversarial
    }

    /// Stakes exactly the floor when there is one.
    fn decide_stake(&self, ctx: &StakeContext<'_>) -> f64 {
        if ctx.protocol.min_stake > 0.0 {
            ctx.protocol.min_stake
        } else {
            self.default_stake
        }
    }

    fn decide_execution(&mut self, ctx: &ExecutionContext<'_>, _rng: &mut dyn RngCore) -> bool {
        if self.in_farming_phase() {
            self.farming_jobs_completed += 1;
            return true;
        }
        if ctx.estimated_detection < self.exploit_threshold {
            return false;
        }
        ctx.cheat_utility() < ctx.honest_utility()
    }
}

/// Stays honest until its reputation reaches a target, then spends a bounded
/// number of exploit jobs.
#[derive(Clone, Debug)]
pub struct ReputationFarmerStrategy {
    pub default_stake: f64,
    /// Stake offered while still building reputation.
    pub farming_stake: f64,
    pub reputation_target: f64,
    pub detection_ceiling: f64,
    exploit_jobs_remaining: u64,
    exploited_value: f64,
}

impl ReputationFarmerStrategy {
    pub fn new(
        default_stake: f64,
        farming_stake: f64,
        reputation_target: f64,
        exploit_jobs: u64,
        detection_ceiling: f64,
    ) -> Self {
        Self {
            default_stake,
            farming_stake,
            reputation_target,
            detection_ceiling,
            exploit_jobs_remaining: exploit_jobs,
            exploited_value: 0.0,
        }
    }

    pub fn exploit_jobs_remaining(&self) -> u64 {
        self.exploit_jobs_remaining
    }

    pub fn exploited_value(&self) -> f64 {
        self.exploited_value
    }
}

impl ProviderStrategy for ReputationFarmerStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ReputationFarmer
    }

    fn decide_stake(&self, ctx: &StakeContext<'_>) -> f64 {
        if ctx.reputation < self.reputation_target {
            ctx.protocol
                .min_stake
                .max(self.farming_stake)
                .min(ctx.protocol.max_stake)
        } else {
            standard_stake(ctx.protocol, ctx.job_value, self.default_stake)
        }
    }

    fn decide_execution(&mut self, ctx: &ExecutionContext<'_>, _rng: &mut dyn RngCore) -> bool {
        if ctx.reputation < self.reputation_target || self.exploit_jobs_remaining == 0 {
            return true;
        }
        let expected_gain = ctx.cheat_utility();
        if expected_gain > ctx.protocol.honest_cost
            && ctx.estimated_detection < self.detection_ceiling
        {
            self.exploit_jobs_remaining -= 1;
            self.exploited_value += ctx.job.value;
            return false;
        }
        true
    }
}

/// One identity of a sybil ring.
///
/// Identities below the preserve threshold are burners and cheat whenever
/// cheating pays in expectation; identities that have climbed above it stay
/// clean to keep their standing.
#[derive(Clone, Debug)]
pub struct SybilStrategy {
    pub stake: f64,
    pub preserve_reputation: f64,
}

impl ProviderStrategy for SybilStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sybil
    }

    fn decide_stake(&self, ctx: &StakeContext<'_>) -> f64 {
        ctx.protocol
            .min_stake
            .max(self.stake)
            .min(ctx.protocol.max_stake)
    }

    fn decide_execution(&mut self, ctx: &ExecutionContext<'_>, _rng: &mut dyn RngCore) -> bool {
        if ctx.reputation >= self.preserve_reputation {
            return true;
        }
        ctx.cheat_utility() <= ctx.honest_utility()
    }
}

/// Always cheats on its partner client, rational with everyone else.
#[derive(Clone, Debug)]
pub struct ColludingStrategy {
    pub partner: AgentId,
    rational: RationalStrategy,
}

impl ColludingStrategy {
    pub fn new(partner: AgentId, default_stake: f64, noise: f64) -> Self {
        Self {
            partner,
            rational: RationalStrategy {
                default_stake,
                noise,
            },
        }
    }
}

impl ProviderStrategy for ColludingStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Colluding
    }

    fn decide_stake(&self, ctx: &StakeContext<'_>) -> f64 {
        self.rational.decide_stake(ctx)
    }

    fn decide_execution(&mut self, ctx: &ExecutionContext<'_>, rng: &mut dyn RngCore) -> bool {
        if ctx.job.client_id == self.partner {
            return false;
        }
        self.rational.is_honest(ctx, rng)
    }
}

/// Per-provider job accounting.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProviderStats {
    pub jobs_accepted: u64,
    pub honest_executions: u64,
    pub cheats: u64,
    pub times_slashed: u64,
    pub total_slashed: f64,
    pub payments_received: f64,
    /// Cumulative stake locked, for average-stake reporting.
    pub stake_volume: f64,
    pub execution_costs: f64,
    pub capital_costs: f64,
}

/// A provider agent.
#[derive(Debug)]
pub struct Provider {
    id: AgentId,
    state: AgentState,
    strategy: Box<dyn ProviderStrategy>,
    pub stats: ProviderStats,
}

impl Provider {
    pub fn new(id: AgentId, balance: f64, strategy: Box<dyn ProviderStrategy>) -> Self {
        Self {
            id,
            state: AgentState::new(balance),
            strategy,
            stats: ProviderStats::default(),
        }
    }

    /// Build the strategy for `kind` from the configured constants.
    pub fn with_kind(
        id: AgentId,
        kind: ProviderKind,
        agents: &AgentParameters,
        attack: &AttackParameters,
        partner: Option<AgentId>,
    ) -> Self {
        let (balance, strategy): (f64, Box<dyn ProviderStrategy>) = match kind {
            ProviderKind::Honest => (
                agents.provider_balance,
                Box::new(HonestStrategy {
                    default_stake: agents.default_stake,
                }),
            ),
            ProviderKind::Rational => (
                agents.provider_balance,
                Box::new(RationalStrategy {
                    default_stake: agents.default_stake,
                    noise: agents.rational_noise,
                }),
            ),
            ProviderKind::Adversarial => (
                agents.adversarial_balance,
                Box::new(AdversarialStrategy::new(
                    agents.adversarial_stake,
                    agents.adversarial_exploit_threshold,
                    agents.adversarial_farming_jobs,
                )),
            ),
            ProviderKind::ReputationFarmer => (
                agents.farmer_balance,
                Box::new(ReputationFarmerStrategy::new(
                    agents.default_stake,
                    attack.farming_stake,
                    agents.farmer_reputation_target,
                    agents.farmer_exploit_jobs,
                    agents.farmer_detection_ceiling,
                )),
            ),
            ProviderKind::Sybil => (
                agents.sybil_balance / attack.sybil_identities_per_attacker.max(1) as f64,
                Box::new(SybilStrategy {
                    stake: agents.adversarial_stake,
                    preserve_reputation: attack.sybil_preserve_reputation,
                }),
            ),
            ProviderKind::Colluding => (
                agents.colluding_balance,
                Box::new(ColludingStrategy::new(
                    partner.unwrap_or_else(|| AgentId::new("")),
                    agents.default_stake,
                    agents.rational_noise,
                )),
            ),
        };
        Self::new(id, balance, strategy)
    }

    pub fn kind(&self) -> ProviderKind {
        self.strategy.kind()
    }

    pub fn decide_stake(&self, protocol: &ProtocolParameters, job_value: f64) -> f64 {
        self.strategy.decide_stake(&StakeContext {
            protocol,
            job_value,
            reputation: self.state.reputation(),
        })
    }

    pub fn decide_execution(&mut self, ctx: &ExecutionContext<'_>, rng: &mut dyn RngCore) -> bool {
        self.strategy.decide_execution(ctx, rng)
    }

    /// Eligible for matching: active and holding more than the stake floor.
    pub fn is_eligible(&self, min_stake: f64) -> bool {
        self.state.active && self.state.balance() > min_stake
    }

    /// Profit net of execution and capital costs.
    pub fn net_profit(&self) -> f64 {
        self.state.total_profit() - self.stats.execution_costs - self.stats.capital_costs
    }

    pub fn mean_stake(&self) -> f64 {
        if self.stats.jobs_accepted == 0 {
            0.0
        } else {
            self.stats.stake_volume / self.stats.jobs_accepted as f64
        }
    }
}

impl Agent for Provider {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn role(&self) -> Role {
        Role::Provider
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn agent_type(&self) -> &'static str {
        self.kind().name()
    }
}
