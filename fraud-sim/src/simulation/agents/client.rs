//! Client agents and their audit strategies.

use std::collections::BTreeMap;
use std::fmt;

use rand::{Rng, RngCore};
use serde::Serialize;

use crate::config::AgentParameters;
use crate::protocol::ProtocolParameters;
use crate::simulation::agent::{Agent, AgentId, AgentState, Role};
use crate::simulation::job::Job;
use crate::simulation::reputation::reputation_prior;

/// Strategy tag carried by every client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    AlwaysAudit,
    NeverAudit,
    MixedEquilibrium,
    ReputationWeighted,
    BeliefThreshold,
    Naive,
    Colluding,
}

impl ClientKind {
    pub const ALL: [ClientKind; 7] = [
        ClientKind::AlwaysAudit,
        ClientKind::NeverAudit,
        ClientKind::MixedEquilibrium,
        ClientKind::ReputationWeighted,
        ClientKind::BeliefThreshold,
        ClientKind::Naive,
        ClientKind::Colluding,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClientKind::AlwaysAudit => "always_audit",
            ClientKind::NeverAudit => "never_audit",
            ClientKind::MixedEquilibrium => "mixed_equilibrium",
            ClientKind::ReputationWeighted => "reputation_weighted",
            ClientKind::BeliefThreshold => "belief_threshold",
            ClientKind::Naive => "naive",
            ClientKind::Colluding => "colluding",
        }
    }

    pub fn id_tag(self) -> &'static str {
        match self {
            ClientKind::AlwaysAudit => "AA",
            ClientKind::NeverAudit => "NA",
            ClientKind::MixedEquilibrium => "MS",
            ClientKind::ReputationWeighted => "RW",
            ClientKind::BeliefThreshold => "BT",
            ClientKind::Naive => "NV",
            ClientKind::Colluding => "X",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a client knows when a result comes back.
#[derive(Clone, Copy, Debug)]
pub struct AuditContext<'a> {
    pub protocol: &'a ProtocolParameters,
    pub job: &'a Job,
    pub provider_id: &'a AgentId,
    pub provider_reputation: f64,
    pub stake: f64,
}

impl AuditContext<'_> {
    /// Equilibrium audit probability `v*` for this job.
    pub fn equilibrium_audit_probability(&self) -> f64 {
        self.protocol
            .equilibrium_audit_probability(self.job.value, self.stake)
    }

    /// Belief threshold `μ*` for this job.
    pub fn belief_threshold(&self) -> f64 {
        self.protocol
            .belief_threshold_for_auditing(self.stake, self.job.value, self.job.loss_if_incorrect)
    }
}

/// Audit policy of a client.
pub trait ClientStrategy: fmt::Debug + Send {
    fn kind(&self) -> ClientKind;

    /// Probability that this client audits the job.
    ///
    /// Fixed-rate clients feed this value straight into a provider's
    /// detection estimate.
    fn audit_probability(&self, ctx: &AuditContext<'_>) -> f64;

    /// Sample the audit decision. Certain outcomes consume no randomness.
    fn decide_audit(&mut self, ctx: &AuditContext<'_>, rng: &mut dyn RngCore) -> bool {
        let p = self.audit_probability(ctx);
        if p >= 1.0 {
            true
        } else if p > 0.0 {
            rng.gen::<f64>() < p
        } else {
            false
        }
    }

    /// Learn from the outcome of an audit.
    fn observe_audit(&mut self, _provider: &AgentId, _fraud_detected: bool) {}
}

#[derive(Clone, Debug)]
pub struct AlwaysAudit;

impl ClientStrategy for AlwaysAudit {
    fn kind(&self) -> ClientKind {
        ClientKind::AlwaysAudit
    }

    fn audit_probability(&self, _ctx: &AuditContext<'_>) -> f64 {
        1.0
    }
}

#[derive(Clone, Debug)]
pub struct NeverAudit;

impl ClientStrategy for NeverAudit {
    fn kind(&self) -> ClientKind {
        ClientKind::NeverAudit
    }

    fn audit_probability(&self, _ctx: &AuditContext<'_>) -> f64 {
        0.0
    }
}

/// Audits with the equilibrium probability `v*`.
#[derive(Clone, Debug)]
pub struct MixedEquilibrium;

impl ClientStrategy for MixedEquilibrium {
    fn kind(&self) -> ClientKind {
        ClientKind::MixedEquilibrium
    }

    fn audit_probability(&self, ctx: &AuditContext<'_>) -> f64 {
        ctx.equilibrium_audit_probability()
    }
}

/// Trusts reputable providers: `min(base·e^{-s(ρ-50)}, v*)`.
///
/// Capping at `v*` means a well-reputed provider is audited below the
/// equilibrium rate, which is exactly what reputation farming exploits.
#[derive(Clone, Debug)]
pub struct ReputationWeighted {
    pub base_probability: f64,
    pub sensitivity: f64,
}

impl ClientStrategy for ReputationWeighted {
    fn kind(&self) -> ClientKind {
        ClientKind::ReputationWeighted
    }

    fn audit_probability(&self, ctx: &AuditContext<'_>) -> f64 {
        let weighted = reputation_prior(
            ctx.provider_reputation,
            self.base_probability,
            self.sensitivity,
        );
        weighted.min(ctx.equilibrium_audit_probability()).clamp(0.0, 1.0)
    }
}

/// Audits when its belief that the provider cheats exceeds `μ*`.
///
/// Before any observation the belief is a reputation-based prior; afterwards
/// it follows the outcomes this client has seen.
#[derive(Clone, Debug)]
pub struct BeliefThreshold {
    pub base_prior: f64,
    pub sensitivity: f64,
    beliefs: BTreeMap<AgentId, f64>,
}

impl BeliefThreshold {
    pub fn new(base_prior: f64, sensitivity: f64) -> Self {
        Self {
            base_prior,
            sensitivity,
            beliefs: BTreeMap::new(),
        }
    }

    pub fn belief(&self, provider: &AgentId, reputation: f64) -> f64 {
        match self.beliefs.get(provider) {
            Some(&belief) => belief,
            None => (self.base_prior * (-self.sensitivity * (reputation - 50.0) / 50.0).exp())
                .min(0.99),
        }
    }
}

impl ClientStrategy for BeliefThreshold {
    fn kind(&self) -> ClientKind {
        ClientKind::BeliefThreshold
    }

    fn audit_probability(&self, ctx: &AuditContext<'_>) -> f64 {
        if self.belief(ctx.provider_id, ctx.provider_reputation) > ctx.belief_threshold() {
            1.0
        } else {
            0.0
        }
    }

    fn observe_audit(&mut self, provider: &AgentId, fraud_detected: bool) {
        let belief = self.beliefs.entry(provider.clone()).or_insert(self.base_prior);
        *belief = if fraud_detected {
            (*belief + 0.3).min(0.99)
        } else {
            (*belief * 0.9).max(0.01)
        };
    }
}

/// Fixed audit probability, ignoring the game.
#[derive(Clone, Debug)]
pub struct Naive {
    pub probability: f64,
}

impl ClientStrategy for Naive {
    fn kind(&self) -> ClientKind {
        ClientKind::Naive
    }

    fn audit_probability(&self, _ctx: &AuditContext<'_>) -> f64 {
        self.probability.clamp(0.0, 1.0)
    }
}

/// Never audits its partner provider, plays `v*` with everyone else.
#[derive(Clone, Debug)]
pub struct Colluding {
    pub partner: AgentId,
}

impl ClientStrategy for Colluding {
    fn kind(&self) -> ClientKind {
        ClientKind::Colluding
    }

    fn audit_probability(&self, ctx: &AuditContext<'_>) -> f64 {
        if *ctx.provider_id == self.partner {
            0.0
        } else {
            ctx.equilibrium_audit_probability()
        }
    }
}

/// Per-client accounting.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ClientStats {
    pub jobs_requested: u64,
    pub audits: u64,
    pub fraud_detected: u64,
    pub losses_from_fraud: f64,
    pub audit_costs: f64,
    pub dispute_costs: f64,
    pub bonds_forfeited: f64,
    pub dispute_rewards: f64,
}

impl ClientStats {
    /// Fraud losses and verification spending net of dispute rewards.
    pub fn net_loss(&self) -> f64 {
        self.losses_from_fraud + self.audit_costs + self.dispute_costs + self.bonds_forfeited
            - self.dispute_rewards
    }
}

/// A client agent.
#[derive(Debug)]
pub struct Client {
    id: AgentId,
    state: AgentState,
    strategy: Box<dyn ClientStrategy>,
    pub stats: ClientStats,
}

impl Client {
    pub fn new(id: AgentId, balance: f64, strategy: Box<dyn ClientStrategy>) -> Self {
        Self {
            id,
            state: AgentState::new(balance),
            strategy,
            stats: ClientStats::default(),
        }
    }

    pub fn with_kind(
        id: AgentId,
        kind: ClientKind,
        agents: &AgentParameters,
        partner: Option<AgentId>,
    ) -> Self {
        let strategy: Box<dyn ClientStrategy> = match kind {
            ClientKind::AlwaysAudit => Box::new(AlwaysAudit),
            ClientKind::NeverAudit => Box::new(NeverAudit),
            ClientKind::MixedEquilibrium => Box::new(MixedEquilibrium),
            ClientKind::ReputationWeighted => Box::new(ReputationWeighted {
                base_probability: agents.reputation_audit_base,
                sensitivity: agents.reputation_audit_sensitivity,
            }),
            ClientKind::BeliefThreshold => Box::new(BeliefThreshold::new(
                agents.belief_base_prior,
                agents.belief_sensitivity,
            )),
            ClientKind::Naive => Box::new(Naive {
                probability: agents.naive_audit_probability,
            }),
            ClientKind::Colluding => Box::new(Colluding {
                partner: partner.unwrap_or_else(|| AgentId::new("")),
            }),
        };
        Self::new(id, agents.client_balance, strategy)
    }

    pub fn kind(&self) -> ClientKind {
        self.strategy.kind()
    }

    pub fn audit_probability(&self, ctx: &AuditContext<'_>) -> f64 {
        self.strategy.audit_probability(ctx)
    }

    pub fn decide_audit(&mut self, ctx: &AuditContext<'_>, rng: &mut dyn RngCore) -> bool {
        self.strategy.decide_audit(ctx, rng)
    }

    pub fn observe_audit(&mut self, provider: &AgentId, fraud_detected: bool) {
        self.strategy.observe_audit(provider, fraud_detected);
    }
}

impl Agent for Client {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn role(&self) -> Role {
        Role::Client
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::job::JobId;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn audit_ctx<'a>(
        protocol: &'a ProtocolParameters,
        job: &'a Job,
        provider: &'a AgentId,
        reputation: f64,
    ) -> AuditContext<'a> {
        AuditContext {
            protocol,
            job,
            provider_id: provider,
            provider_reputation: reputation,
            stake: 100.0,
        }
    }

    #[test]
    fn test_certain_strategies() {
        let protocol = ProtocolParameters::default();
        let job = Job::new(JobId(1), 0, 0, AgentId::new("C_AA_0"), 50.0, 50.0);
        let provider = AgentId::new("P_H_0");
        let ctx = audit_ctx(&protocol, &job, &provider, 50.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        assert!(AlwaysAudit.decide_audit(&ctx, &mut rng));
        assert!(!NeverAudit.decide_audit(&ctx, &mut rng));
    }

    #[test]
    fn test_mixed_audits_at_v_star() {
        let protocol = ProtocolParameters::default();
        let job = Job::new(JobId(1), 0, 0, AgentId::new("C_MS_0"), 50.0, 50.0);
        let provider = AgentId::new("P_R_0");
        let ctx = audit_ctx(&protocol, &job, &provider, 50.0);
        assert!((MixedEquilibrium.audit_probability(&ctx) - 0.03).abs() < 1e-12);

        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let trials = 50_000;
        let audits = (0..trials)
            .filter(|_| MixedEquilibrium.decide_audit(&ctx, &mut rng))
            .count();
        let rate = audits as f64 / trials as f64;
        assert!((rate - 0.03).abs() < 0.005, "audit rate {}", rate);
    }

    #[test]
    fn test_reputation_weighted_never_exceeds_v_star() {
        let protocol = ProtocolParameters::default();
        let job = Job::new(JobId(1), 0, 0, AgentId::new("C_RW_0"), 50.0, 50.0);
        let provider = AgentId::new("P_H_0");
        let strategy = ReputationWeighted {
            base_probability: 0.3,
            sensitivity: 0.02,
        };

        let low = strategy.audit_probability(&audit_ctx(&protocol, &job, &provider, 0.0));
        assert!((low - 0.03).abs() < 1e-12, "capped at v*: {}", low);

        // 0.3 * e^{-1} ≈ 0.110 is still above v*.
        let high = strategy.audit_probability(&audit_ctx(&protocol, &job, &provider, 100.0));
        assert!(high <= 0.03 + 1e-12);

        let tiny_stake = AuditContext {
            stake: 10_000.0,
            ..audit_ctx(&protocol, &job, &provider, 100.0)
        };
        let expected = 0.3 * (-0.02f64 * 50.0).exp();
        let v_star = protocol.equilibrium_audit_probability(50.0, 10_000.0);
        assert!((strategy.audit_probability(&tiny_stake) - expected.min(v_star)).abs() < 1e-12);
    }

    #[test]
    fn test_belief_threshold_updates() {
        let protocol = ProtocolParameters::default();
        let job = Job::new(JobId(1), 0, 0, AgentId::new("C_BT_0"), 50.0, 50.0);
        let provider = AgentId::new("P_A_0");
        let mut strategy = BeliefThreshold::new(0.1, 0.5);

        // Prior 0.1 at reputation 50 exceeds μ* ≈ 0.056.
        let ctx = audit_ctx(&protocol, &job, &provider, 50.0);
        assert_eq!(strategy.audit_probability(&ctx), 1.0);

        // A reputable provider gets the benefit of the doubt.
        let trusted = audit_ctx(&protocol, &job, &provider, 100.0);
        assert!(strategy.belief(&provider, 100.0) < 0.1);

        strategy.observe_audit(&provider, false);
        assert!((strategy.belief(&provider, 100.0) - 0.09).abs() < 1e-12);
        for _ in 0..10 {
            strategy.observe_audit(&provider, false);
        }
        assert_eq!(strategy.audit_probability(&trusted), 0.0);

        strategy.observe_audit(&provider, true);
        assert_eq!(strategy.audit_probability(&trusted), 1.0);
        for _ in 0..10 {
            strategy.observe_audit(&provider, true);
        }
        assert_eq!(strategy.belief(&provider, 50.0), 0.99);
    }

    #[test]
    fn test_colluding_client_spares_partner() {
        let protocol = ProtocolParameters::default();
        let job = Job::new(JobId(1), 0, 0, AgentId::new("X00_C"), 50.0, 50.0);
        let partner = AgentId::new("X00_P");
        let stranger = AgentId::new("P_R_1");
        let strategy = Colluding {
            partner: partner.clone(),
        };
        assert_eq!(strategy.audit_probability(&audit_ctx(&protocol, &job, &partner, 50.0)), 0.0);
        assert!((strategy.audit_probability(&audit_ctx(&protocol, &job, &stranger, 50.0)) - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_net_loss() {
        let stats = ClientStats {
            losses_from_fraud: 40.0,
            audit_costs: 16.0,
            dispute_costs: 3.0,
            bonds_forfeited: 5.0,
            dispute_rewards: 20.0,
            ..ClientStats::default()
        };
        assert_eq!(stats.net_loss(), 44.0);
    }
}
