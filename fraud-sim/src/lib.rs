//! Agent-based simulation of the off-chain computation fraud game.
//!
//! Clients outsource jobs to staked providers. A provider either executes a
//! job honestly or returns a fake result; a client either pays for a safe
//! re-execution (an audit) or accepts the result. Caught fraud can be
//! disputed, and an upheld dispute slashes the provider's stake.
//!
//! The crate answers two questions:
//!
//! 1. **What does theory predict?** [`protocol`] and [`analysis`] compute the
//!    mixed equilibrium of the game in closed form: the audit probability
//!    `v*`, the cheat probability `q*` and the minimum stake that keeps
//!    enforcement viable.
//!
//! 2. **What do heterogeneous agents actually do?** [`simulation`] runs a
//!    seeded, period-based market of providers, clients and watchers, and
//!    [`attacks`] replays it under adversarial configurations.
//!
//! ## Agents
//!
//! | Role       | Strategies                                                          |
//! |------------|---------------------------------------------------------------------|
//! | Provider   | Honest, Rational, Adversarial, ReputationFarmer, Sybil, Colluding   |
//! | Client     | AlwaysAudit, NeverAudit, MixedEquilibrium, ReputationWeighted, BeliefThreshold, Naive, Colluding |
//! | Challenger | Permissionless watcher, Griefing                                    |
//!
//! ## Determinism
//!
//! Every run owns one `ChaCha8Rng` seeded from the configuration, and all
//! agent collections are ordered maps. The same configuration and seed give
//! the same [`SimulationResult`], bit for bit. Parallelism only ever splits
//! work across independent runs.

pub mod analysis;
pub mod attacks;
pub mod config;
pub mod experiments;
pub mod protocol;
pub mod simulation;

pub use analysis::{
    attack_profitability, calculate_gini, compute_theoretical_equilibrium, parameter_sensitivity,
    stake_thresholds, AttackProfitability, ProfitabilityModel, SensitivitySweep, StakeThreshold,
    TheoreticalEquilibrium, WelfareMetrics,
};
pub use attacks::{attack_by_name, run_all_attacks, AttackResult, AttackScenario, ATTACKS};
pub use config::{
    apply_overrides, ChallengerMix, ClientMix, ConfigError, ConfigOverrides, MatchingPolicy,
    Override, ProviderMix, SimulationConfig, PRESETS,
};
pub use experiments::{run_batch, run_convergence, run_seeds, BatchSummary, ConvergenceReport};
pub use protocol::{ProtocolField, ProtocolParameters, StakeRequirement};
pub use simulation::{AgentId, PeriodStats, SimulationEngine, SimulationResult};

/// Build an engine for `config` and run it to completion.
pub fn run_simulation(config: SimulationConfig) -> Result<SimulationResult, ConfigError> {
    Ok(SimulationEngine::new(config)?.run())
}
