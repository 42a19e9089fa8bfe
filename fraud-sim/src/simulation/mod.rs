//! Agent-based simulation of the fraud game.
//!
//! Providers, clients and challengers trade jobs through a market while a
//! reputation system scores providers on their record. The engine drives the
//! job lifecycle period by period and collects a [`SimulationResult`].
//!
//! ## Watchers
//!
//! By default only the client that posted a job can audit and dispute it.
//! With `watchers_enabled`, challengers also see every job: permissionless
//! watchers monitor selectively and dispute fraud they find, and griefers
//! file disputes at random.

mod agent;
pub mod agents;
mod engine;
mod job;
pub mod market;
mod metrics;
mod queue;
pub mod reputation;

pub use agent::{Agent, AgentError, AgentId, AgentState, Role, INITIAL_REPUTATION, MAX_REPUTATION};
pub use agents::{
    Challenger, ChallengerKind, Client, ClientKind, Provider, ProviderKind,
};
pub use engine::SimulationEngine;
pub use job::{Job, JobId};
pub use market::{Candidate, Market, MarketState};
pub use metrics::{
    AttackMetrics, PeriodHistory, PeriodStats, RunTotals, SimulationResult,
};
pub use queue::{JobQueue, PendingJob};
pub use reputation::{
    ReputationRecord, ReputationStatistics, ReputationSystem, SelfBuyReport, SelfBuyingDetector,
};
