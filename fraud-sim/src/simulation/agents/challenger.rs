//! Challengers: parties that file disputes against fraudulent results.
//!
//! In the baseline game the client is its own challenger and only the
//! dispute rule below applies. With watchers enabled, challenger agents
//! also inspect jobs on their own account.

use std::fmt;

use rand::{Rng, RngCore};
use serde::Serialize;

use crate::config::{AgentParameters, AttackParameters};
use crate::protocol::ProtocolParameters;
use crate::simulation::agent::{Agent, AgentId, AgentState, Role};
use crate::simulation::job::Job;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengerKind {
    Permissionless,
    Griefing,
}

impl ChallengerKind {
    pub const ALL: [ChallengerKind; 2] = [ChallengerKind::Permissionless, ChallengerKind::Griefing];

    pub fn name(self) -> &'static str {
        match self {
            ChallengerKind::Permissionless => "permissionless",
            ChallengerKind::Griefing => "griefing",
        }
    }

    pub fn id_tag(self) -> &'static str {
        match self {
            ChallengerKind::Permissionless => "CH",
            ChallengerKind::Griefing => "GR",
        }
    }
}

impl fmt::Display for ChallengerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A job as seen by a would-be disputant.
#[derive(Clone, Copy, Debug)]
pub struct DisputeContext<'a> {
    pub protocol: &'a ProtocolParameters,
    pub job: &'a Job,
    pub stake: f64,
}

impl DisputeContext<'_> {
    pub fn expected_value(&self) -> f64 {
        self.protocol.dispute_expected_value(self.stake, self.job.value)
    }
}

/// Dispute iff the expected value is positive and `balance` covers `outlay`.
pub fn should_dispute(ctx: &DisputeContext<'_>, balance: f64, outlay: f64) -> bool {
    ctx.expected_value() > 0.0 && balance >= outlay
}

/// What a watcher does with a job it sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchAction {
    Ignore,
    /// Pay the monitoring cost and dispute if fraud turns up.
    Monitor,
    /// File a dispute without looking.
    Grief,
}

pub trait ChallengerStrategy: fmt::Debug + Send {
    fn kind(&self) -> ChallengerKind;

    /// Whether to dispute a result known to be fraudulent.
    fn decide_dispute(&self, ctx: &DisputeContext<'_>, balance: f64) -> bool {
        should_dispute(ctx, balance, ctx.protocol.dispute_outlay())
    }

    fn decide_watch(
        &mut self,
        ctx: &DisputeContext<'_>,
        balance: f64,
        rng: &mut dyn RngCore,
    ) -> WatchAction;

    fn monitoring_cost(&self) -> f64 {
        0.0
    }
}

/// Watcher that samples a share of jobs and monitors those where the
/// equilibrium fraud rate times the dispute value beats its cost.
#[derive(Clone, Debug)]
pub struct Permissionless {
    pub monitoring_cost: f64,
    pub selectivity: f64,
}

impl ChallengerStrategy for Permissionless {
    fn kind(&self) -> ChallengerKind {
        ChallengerKind::Permissionless
    }

    fn decide_watch(
        &mut self,
        ctx: &DisputeContext<'_>,
        balance: f64,
        rng: &mut dyn RngCore,
    ) -> WatchAction {
        if rng.gen::<f64>() > self.selectivity {
            return WatchAction::Ignore;
        }
        let fraud_rate = ctx.protocol.equilibrium_cheat_probability(
            ctx.stake,
            ctx.job.value,
            ctx.job.loss_if_incorrect,
        );
        let value = fraud_rate * ctx.expected_value() - self.monitoring_cost;
        if value > 0.0 && balance >= self.monitoring_cost {
            WatchAction::Monitor
        } else {
            WatchAction::Ignore
        }
    }

    fn monitoring_cost(&self) -> f64 {
        self.monitoring_cost
    }
}

/// Files frivolous disputes at random until its budget runs out.
#[derive(Clone, Debug)]
pub struct Griefing {
    pub budget: f64,
    pub rate: f64,
    spent: f64,
}

impl Griefing {
    pub fn new(budget: f64, rate: f64) -> Self {
        Self {
            budget,
            rate,
            spent: 0.0,
        }
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }
}

impl ChallengerStrategy for Griefing {
    fn kind(&self) -> ChallengerKind {
        ChallengerKind::Griefing
    }

    fn decide_watch(
        &mut self,
        ctx: &DisputeContext<'_>,
        balance: f64,
        rng: &mut dyn RngCore,
    ) -> WatchAction {
        let outlay = ctx.protocol.dispute_outlay();
        if self.spent >= self.budget || balance < outlay {
            return WatchAction::Ignore;
        }
        if rng.gen::<f64>() < self.rate {
            self.spent += outlay;
            WatchAction::Grief
        } else {
            WatchAction::Ignore
        }
    }
}

/// Result of a griefing attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GriefOutcome {
    pub filed: bool,
    /// Net cost borne by the griefer, before any reward.
    pub cost: f64,
    /// `Some(upheld)` when the job really was fraudulent.
    pub accidental_catch: Option<bool>,
}

impl GriefOutcome {
    pub fn not_filed() -> Self {
        Self {
            filed: false,
            cost: 0.0,
            accidental_catch: None,
        }
    }

    pub fn is_frivolous(&self) -> bool {
        self.filed && self.accidental_catch.is_none()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ChallengerStats {
    pub jobs_monitored: u64,
    pub monitoring_costs: f64,
    pub disputes_filed: u64,
    pub disputes_won: u64,
    pub disputes_lost: u64,
    pub dispute_costs: f64,
    pub bonds_forfeited: f64,
    pub rewards: f64,
    pub frivolous_disputes: u64,
    pub accidental_catches: u64,
}

#[derive(Debug)]
pub struct Challenger {
    id: AgentId,
    state: AgentState,
    strategy: Box<dyn ChallengerStrategy>,
    pub stats: ChallengerStats,
}

impl Challenger {
    pub fn new(id: AgentId, balance: f64, strategy: Box<dyn ChallengerStrategy>) -> Self {
        Self {
            id,
            state: AgentState::new(balance),
            strategy,
            stats: ChallengerStats::default(),
        }
    }

    pub fn with_kind(
        id: AgentId,
        kind: ChallengerKind,
        agents: &AgentParameters,
        attack: &AttackParameters,
    ) -> Self {
        match kind {
            ChallengerKind::Permissionless => Self::new(
                id,
                agents.permissionless_balance,
                Box::new(Permissionless {
                    monitoring_cost: agents.monitoring_cost,
                    selectivity: agents.watcher_selectivity,
                }),
            ),
            ChallengerKind::Griefing => Self::new(
                id,
                agents.griefer_balance,
                Box::new(Griefing::new(attack.griefing_budget, attack.griefing_rate)),
            ),
        }
    }

    pub fn kind(&self) -> ChallengerKind {
        self.strategy.kind()
    }

    pub fn decide_dispute(&self, ctx: &DisputeContext<'_>) -> bool {
        self.strategy.decide_dispute(ctx, self.state.balance())
    }

    pub fn decide_watch(&mut self, ctx: &DisputeContext<'_>, rng: &mut dyn RngCore) -> WatchAction {
        let balance = self.state.balance();
        self.strategy.decide_watch(ctx, balance, rng)
    }

    /// Pay to inspect a job. Fails if the watcher cannot afford it.
    pub fn monitor(&mut self) -> bool {
        let cost = self.strategy.monitoring_cost();
        if !self.state.debit(cost) {
            return false;
        }
        self.stats.jobs_monitored += 1;
        self.stats.monitoring_costs += cost;
        true
    }

    /// Pay the dispute cost and bond, then draw enforcement.
    ///
    /// A dispute against an honest result always fails. Returns `None` if the
    /// outlay cannot be paid. On success the bond comes back; the reward is
    /// paid separately once the stake has been slashed.
    pub fn file_dispute(
        &mut self,
        protocol: &ProtocolParameters,
        fraudulent: bool,
        rng: &mut dyn RngCore,
    ) -> Option<bool> {
        let cost = protocol.dispute_cost();
        let bond = protocol.challenge_bond;
        if !self.state.debit(cost + bond) {
            return None;
        }
        self.state.disputes_initiated += 1;
        self.stats.disputes_filed += 1;
        self.stats.dispute_costs += cost;

        let upheld = fraudulent && rng.gen::<f64>() < protocol.enforcement_reliability;
        if upheld {
            self.state.credit(bond);
            self.state.disputes_won += 1;
            self.stats.disputes_won += 1;
        } else {
            self.state.disputes_lost += 1;
            self.stats.disputes_lost += 1;
            self.stats.bonds_forfeited += bond;
        }
        Some(upheld)
    }

    /// File a dispute without knowing whether the job was fraudulent.
    pub fn attempt_grief(
        &mut self,
        protocol: &ProtocolParameters,
        fraudulent: bool,
        rng: &mut dyn RngCore,
    ) -> GriefOutcome {
        match self.file_dispute(protocol, fraudulent, rng) {
            None => GriefOutcome::not_filed(),
            Some(upheld) => {
                let cost = if upheld {
                    protocol.dispute_cost()
                } else {
                    protocol.dispute_outlay()
                };
                if fraudulent {
                    self.stats.accidental_catches += 1;
                } else {
                    self.stats.frivolous_disputes += 1;
                }
                GriefOutcome {
                    filed: true,
                    cost,
                    accidental_catch: fraudulent.then_some(upheld),
                }
            }
        }
    }

    pub fn collect_reward(&mut self, reward: f64) {
        self.state.credit(reward);
        self.stats.rewards += reward;
    }
}

impl Agent for Challenger {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn role(&self) -> Role {
        Role::Challenger
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
