//! Simulation configuration.
//!
//! Every struct here deserializes with `#[serde(default)]`, so a TOML file
//! only needs to mention the values it changes:
//!
//! ```toml
//! n_periods = 500
//! seed = 7
//!
//! [protocol]
//! enforcement_reliability = 0.7
//!
//! [provider_mix]
//! honest = 0.5
//! rational = 0.5
//! adversarial = 0.0
//! ```
//!
//! Attack scenarios and sweeps never edit a configuration in place; they
//! build a new one with [`apply_overrides`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{ProtocolField, ProtocolParameters};
use crate::simulation::agents::{ChallengerKind, ClientKind, ProviderKind};

/// Tolerance for population mixes summing to one.
pub const MIX_TOLERANCE: f64 = 1e-6;

/// Errors raised while building or loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{population} mix sums to {sum}, expected 1.0")]
    MixSum { population: &'static str, sum: f64 },

    #[error("{population} mix has negative share {value} for {kind}")]
    NegativeShare {
        population: &'static str,
        kind: &'static str,
        value: f64,
    },

    #[error("{field} must be positive")]
    NonPositiveCount { field: &'static str },

    #[error("{field} must be a non-negative finite number, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must lie in [0, 1], got {value}")]
    ProbabilityOutOfRange { field: &'static str, value: f64 },

    #[error("minimum stake {min} exceeds maximum stake {max}")]
    StakeBounds { min: f64, max: f64 },

    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    #[error("unknown protocol parameter '{0}'")]
    UnknownParameter(String),

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("unknown attack '{0}'")]
    UnknownAttack(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shape of the job value distribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDistribution {
    /// Log-normal with moments matched to `mean` and `std`.
    LogNormal,
    /// Uniform on `[mean - std, mean + std]`.
    Uniform,
    /// Exponential with the given mean; `std` is ignored.
    Exponential,
}

/// How job payments are drawn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobValueModel {
    pub distribution: ValueDistribution,
    pub mean: f64,
    pub std: f64,
}

impl Default for JobValueModel {
    fn default() -> Self {
        Self {
            distribution: ValueDistribution::LogNormal,
            mean: 50.0,
            std: 25.0,
        }
    }
}

/// How a job picks among eligible providers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MatchingPolicy {
    Random,
    /// Softmax over reputation.
    ReputationWeighted,
    /// Proportional to stake capacity.
    StakeWeighted,
    /// Linear blend of the reputation softmax and stake weights.
    Mixed {
        reputation_weight: f64,
        stake_weight: f64,
    },
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        MatchingPolicy::ReputationWeighted
    }
}

impl MatchingPolicy {
    pub fn mixed() -> Self {
        MatchingPolicy::Mixed {
            reputation_weight: 0.5,
            stake_weight: 0.3,
        }
    }
}

/// Fractions of the provider population per strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderMix {
    pub honest: f64,
    pub rational: f64,
    pub adversarial: f64,
    pub reputation_farmer: f64,
    pub sybil: f64,
    pub colluding: f64,
}

impl Default for ProviderMix {
    fn default() -> Self {
        Self {
            honest: 0.6,
            rational: 0.3,
            adversarial: 0.1,
            reputation_farmer: 0.0,
            sybil: 0.0,
            colluding: 0.0,
        }
    }
}

impl ProviderMix {
    /// A population made of a single strategy.
    pub fn only(kind: ProviderKind) -> Self {
        let mut mix = Self {
            honest: 0.0,
            rational: 0.0,
            adversarial: 0.0,
            reputation_farmer: 0.0,
            sybil: 0.0,
            colluding: 0.0,
        };
        *mix.share_mut(kind) = 1.0;
        mix
    }

    pub fn share(&self, kind: ProviderKind) -> f64 {
        match kind {
            ProviderKind::Honest => self.honest,
            ProviderKind::Rational => self.rational,
            ProviderKind::Adversarial => self.adversarial,
            ProviderKind::ReputationFarmer => self.reputation_farmer,
            ProviderKind::Sybil => self.sybil,
            ProviderKind::Colluding => self.colluding,
        }
    }

    fn share_mut(&mut self, kind: ProviderKind) -> &mut f64 {
        match kind {
            ProviderKind::Honest => &mut self.honest,
            ProviderKind::Rational => &mut self.rational,
            ProviderKind::Adversarial => &mut self.adversarial,
            ProviderKind::ReputationFarmer => &mut self.reputation_farmer,
            ProviderKind::Sybil => &mut self.sybil,
            ProviderKind::Colluding => &mut self.colluding,
        }
    }

    /// Set one share and rescale the others so the mix still sums to one.
    pub fn with_share(&self, kind: ProviderKind, share: f64) -> Self {
        let mut mix = self.clone();
        rescale(&mut mix, &ProviderKind::ALL, kind, share, |m, k| m.share_mut(k));
        mix
    }

    /// Head counts per strategy for `total` providers.
    pub fn counts(&self, total: usize) -> Vec<(ProviderKind, usize)> {
        let shares: Vec<f64> = ProviderKind::ALL.iter().map(|&k| self.share(k)).collect();
        ProviderKind::ALL
            .iter()
            .copied()
            .zip(apportion(total, &shares))
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let shares: Vec<(&'static str, f64)> = ProviderKind::ALL
            .iter()
            .map(|&k| (k.name(), self.share(k)))
            .collect();
        validate_mix("provider", &shares)
    }
}

/// Fractions of the client population per strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientMix {
    pub always_audit: f64,
    pub never_audit: f64,
    pub mixed_equilibrium: f64,
    pub reputation_weighted: f64,
    pub belief_threshold: f64,
    pub naive: f64,
    pub colluding: f64,
}

impl Default for ClientMix {
    fn default() -> Self {
        Self {
            always_audit: 0.1,
            never_audit: 0.2,
            mixed_equilibrium: 0.35,
            reputation_weighted: 0.35,
            belief_threshold: 0.0,
            naive: 0.0,
            colluding: 0.0,
        }
    }
}

impl ClientMix {
    pub fn only(kind: ClientKind) -> Self {
        let mut mix = Self {
            always_audit: 0.0,
            never_audit: 0.0,
            mixed_equilibrium: 0.0,
            reputation_weighted: 0.0,
            belief_threshold: 0.0,
            naive: 0.0,
            colluding: 0.0,
        };
        *mix.share_mut(kind) = 1.0;
        mix
    }

    pub fn share(&self, kind: ClientKind) -> f64 {
        match kind {
            ClientKind::AlwaysAudit => self.always_audit,
            ClientKind::NeverAudit => self.never_audit,
            ClientKind::MixedEquilibrium => self.mixed_equilibrium,
            ClientKind::ReputationWeighted => self.reputation_weighted,
            ClientKind::BeliefThreshold => self.belief_threshold,
            ClientKind::Naive => self.naive,
            ClientKind::Colluding => self.colluding,
        }
    }

    fn share_mut(&mut self, kind: ClientKind) -> &mut f64 {
        match kind {
            ClientKind::AlwaysAudit => &mut self.always_audit,
            ClientKind::NeverAudit => &mut self.never_audit,
            ClientKind::MixedEquilibrium => &mut self.mixed_equilibrium,
            ClientKind::ReputationWeighted => &mut self.reputation_weighted,
            ClientKind::BeliefThreshold => &mut self.belief_threshold,
            ClientKind::Naive => &mut self.naive,
            ClientKind::Colluding => &mut self.colluding,
        }
    }

    pub fn with_share(&self, kind: ClientKind, share: f64) -> Self {
        let mut mix = self.clone();
        rescale(&mut mix, &ClientKind::ALL, kind, share, |m, k| m.share_mut(k));
        mix
    }

    pub fn counts(&self, total: usize) -> Vec<(ClientKind, usize)> {
        let shares: Vec<f64> = ClientKind::ALL.iter().map(|&k| self.share(k)).collect();
        ClientKind::ALL
            .iter()
            .copied()
            .zip(apportion(total, &shares))
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let shares: Vec<(&'static str, f64)> = ClientKind::ALL
            .iter()
            .map(|&k| (k.name(), self.share(k)))
            .collect();
        validate_mix("client", &shares)
    }
}

/// Fractions of the challenger population per strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengerMix {
    pub permissionless: f64,
    pub griefing: f64,
}

impl Default for ChallengerMix {
    fn default() -> Self {
        Self {
            permissionless: 1.0,
            griefing: 0.0,
        }
    }
}

impl ChallengerMix {
    pub fn share(&self, kind: ChallengerKind) -> f64 {
        match kind {
            ChallengerKind::Permissionless => self.permissionless,
            ChallengerKind::Griefing => self.griefing,
        }
    }

    pub fn counts(&self, total: usize) -> Vec<(ChallengerKind, usize)> {
        let shares: Vec<f64> = ChallengerKind::ALL.iter().map(|&k| self.share(k)).collect();
        ChallengerKind::ALL
            .iter()
            .copied()
            .zip(apportion(total, &shares))
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_mix(
            "challenger",
            &[
                ("permissionless", self.permissionless),
                ("griefing", self.griefing),
            ],
        )
    }
}

/// Reputation dynamics and the farming / self-buying heuristics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationParameters {
    /// Multiplicative decay applied to every score once per period.
    pub decay: f64,
    /// Base gain for an honest (or undetected) job.
    pub gain_honest: f64,
    /// Flat penalty for proven fraud.
    pub loss_fraud: f64,
    /// Extra gain per unit of stake.
    pub stake_weight: f64,
    /// Per-period bonus per period spent in the system.
    pub time_weight: f64,
    /// Cap on the periods counted by the time bonus.
    pub time_bonus_cap: f64,
    /// Stakes below this earn only a tenth of the base gain.
    pub min_stake_for_reputation: f64,
    /// When false, low-stake jobs earn the full gain.
    pub min_stake_enforcement: bool,
    /// Fraud prior a client assigns to a provider of reputation 50.
    pub prior_base: f64,
    /// Exponential sensitivity of the prior to reputation.
    pub prior_sensitivity: f64,
    /// Average stake below which high reputation looks farmed.
    pub farming_stake_threshold: f64,
    /// Job count above which the farming heuristic applies.
    pub farming_job_threshold: u64,
    /// Score above which the farming heuristic applies.
    pub farming_reputation_floor: f64,
    /// Fewer distinct clients than this is suspicious.
    pub self_buy_min_unique_clients: usize,
    /// Largest share of jobs one client, or one id prefix, may account for.
    pub self_buy_max_ratio: f64,
    /// Number of leading id characters compared by the prefix heuristic.
    pub self_buy_prefix_len: usize,
}

impl Default for ReputationParameters {
    fn default() -> Self {
        Self {
            decay: 0.99,
            gain_honest: 1.0,
            loss_fraud: 50.0,
            stake_weight: 0.01,
            time_weight: 0.001,
            time_bonus_cap: 1000.0,
            min_stake_for_reputation: 10.0,
            min_stake_enforcement: true,
            prior_base: 0.1,
            prior_sensitivity: 0.02,
            farming_stake_threshold: 20.0,
            farming_job_threshold: 10,
            farming_reputation_floor: 70.0,
            self_buy_min_unique_clients: 3,
            self_buy_max_ratio: 0.5,
            self_buy_prefix_len: 4,
        }
    }
}

impl ReputationParameters {
    fn validate(&self) -> Result<(), ConfigError> {
        check_probability("reputation.decay", self.decay)?;
        check_probability("reputation.self_buy_max_ratio", self.self_buy_max_ratio)?;
        for (field, value) in [
            ("reputation.gain_honest", self.gain_honest),
            ("reputation.loss_fraud", self.loss_fraud),
            ("reputation.stake_weight", self.stake_weight),
            ("reputation.time_weight", self.time_weight),
            ("reputation.time_bonus_cap", self.time_bonus_cap),
            ("reputation.min_stake_for_reputation", self.min_stake_for_reputation),
            ("reputation.prior_base", self.prior_base),
            ("reputation.prior_sensitivity", self.prior_sensitivity),
            ("reputation.farming_stake_threshold", self.farming_stake_threshold),
        ] {
            check_non_negative(field, value)?;
        }
        Ok(())
    }
}

/// Starting balances and behavioural constants of the agent strategies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentParameters {
    pub provider_balance: f64,
    pub adversarial_balance: f64,
    pub farmer_balance: f64,
    pub sybil_balance: f64,
    pub colluding_balance: f64,
    pub client_balance: f64,
    pub permissionless_balance: f64,
    pub griefer_balance: f64,

    /// Stake offered by well-behaved providers.
    pub default_stake: f64,
    /// Stake offered by adversaries when no floor is enforced.
    pub adversarial_stake: f64,

    /// Standard deviation of the noise in a rational provider's comparison.
    pub rational_noise: f64,

    /// Detection estimate below which an adversary exploits.
    pub adversarial_exploit_threshold: f64,
    /// Honest jobs an adversary completes before exploiting.
    pub adversarial_farming_jobs: u64,

    /// Reputation a farmer builds before exploiting.
    pub farmer_reputation_target: f64,
    /// Exploit jobs a farmer attempts once the target is reached.
    pub farmer_exploit_jobs: u64,
    /// Detection estimate a farmer requires before exploiting.
    pub farmer_detection_ceiling: f64,

    pub naive_audit_probability: f64,
    /// Audit probability of a reputation-weighted client at reputation 50.
    pub reputation_audit_base: f64,
    pub reputation_audit_sensitivity: f64,
    /// Belief-threshold prior at reputation 50.
    pub belief_base_prior: f64,
    pub belief_sensitivity: f64,

    /// Cost a permissionless watcher pays to monitor one job.
    pub monitoring_cost: f64,
    /// Fraction of jobs a permissionless watcher considers.
    pub watcher_selectivity: f64,
}

impl Default for AgentParameters {
    fn default() -> Self {
        Self {
            provider_balance: 1000.0,
            adversarial_balance: 2000.0,
            farmer_balance: 3000.0,
            sybil_balance: 5000.0,
            colluding_balance: 1000.0,
            client_balance: 500.0,
            permissionless_balance: 2000.0,
            griefer_balance: 5000.0,
            default_stake: 100.0,
            adversarial_stake: 50.0,
            rational_noise: 0.1,
            adversarial_exploit_threshold: 0.3,
            adversarial_farming_jobs: 20,
            farmer_reputation_target: 80.0,
            farmer_exploit_jobs: 5,
            farmer_detection_ceiling: 0.3,
            naive_audit_probability: 0.1,
            reputation_audit_base: 0.3,
            reputation_audit_sensitivity: 0.02,
            belief_base_prior: 0.1,
            belief_sensitivity: 0.5,
            monitoring_cost: 0.5,
            watcher_selectivity: 0.5,
        }
    }
}

impl AgentParameters {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("agents.provider_balance", self.provider_balance),
            ("agents.adversarial_balance", self.adversarial_balance),
            ("agents.farmer_balance", self.farmer_balance),
            ("agents.sybil_balance", self.sybil_balance),
            ("agents.colluding_balance", self.colluding_balance),
            ("agents.client_balance", self.client_balance),
            ("agents.permissionless_balance", self.permissionless_balance),
            ("agents.griefer_balance", self.griefer_balance),
            ("agents.default_stake", self.default_stake),
            ("agents.adversarial_stake", self.adversarial_stake),
            ("agents.rational_noise", self.rational_noise),
            ("agents.farmer_reputation_target", self.farmer_reputation_target),
            ("agents.reputation_audit_sensitivity", self.reputation_audit_sensitivity),
            ("agents.belief_sensitivity", self.belief_sensitivity),
            ("agents.monitoring_cost", self.monitoring_cost),
        ] {
            check_non_negative(field, value)?;
        }
        for (field, value) in [
            ("agents.adversarial_exploit_threshold", self.adversarial_exploit_threshold),
            ("agents.farmer_detection_ceiling", self.farmer_detection_ceiling),
            ("agents.naive_audit_probability", self.naive_audit_probability),
            ("agents.reputation_audit_base", self.reputation_audit_base),
            ("agents.belief_base_prior", self.belief_base_prior),
            ("agents.watcher_selectivity", self.watcher_selectivity),
        ] {
            check_probability(field, value)?;
        }
        Ok(())
    }
}

/// Knobs used by the attacker strategies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackParameters {
    /// Stake a reputation farmer offers while building reputation.
    pub farming_stake: f64,
    /// Identities controlled by one sybil attacker.
    pub sybil_identities_per_attacker: usize,
    /// Cost charged to each sybil identity at creation.
    pub sybil_creation_cost: f64,
    /// Sybil identities at or above this score are kept clean.
    pub sybil_preserve_reputation: f64,
    /// Total a griefer is willing to spend on frivolous disputes.
    pub griefing_budget: f64,
    /// Probability a griefer disputes any given job.
    pub griefing_rate: f64,
}

impl Default for AttackParameters {
    fn default() -> Self {
        Self {
            farming_stake: 5.0,
            sybil_identities_per_attacker: 10,
            sybil_creation_cost: 10.0,
            sybil_preserve_reputation: 60.0,
            griefing_budget: 1000.0,
            griefing_rate: 0.1,
        }
    }
}

impl AttackParameters {
    fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("attack.farming_stake", self.farming_stake)?;
        check_non_negative("attack.sybil_creation_cost", self.sybil_creation_cost)?;
        check_non_negative("attack.sybil_preserve_reputation", self.sybil_preserve_reputation)?;
        check_non_negative("attack.griefing_budget", self.griefing_budget)?;
        check_probability("attack.griefing_rate", self.griefing_rate)?;
        if self.sybil_identities_per_attacker == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "attack.sybil_identities_per_attacker",
            });
        }
        Ok(())
    }
}

/// Complete description of one simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub n_providers: usize,
    pub n_clients: usize,
    pub n_challengers: usize,
    pub n_periods: u64,
    pub jobs_per_period: usize,
    pub seed: u64,

    /// When set, challengers inspect every executed job after the client.
    pub watchers_enabled: bool,

    pub job_values: JobValueModel,
    pub matching: MatchingPolicy,
    pub provider_mix: ProviderMix,
    pub client_mix: ClientMix,
    pub challenger_mix: ChallengerMix,

    pub protocol: ProtocolParameters,
    pub reputation: ReputationParameters,
    pub agents: AgentParameters,
    pub attack: AttackParameters,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_providers: 50,
            n_clients: 100,
            n_challengers: 10,
            n_periods: 1000,
            jobs_per_period: 20,
            seed: 42,
            watchers_enabled: false,
            job_values: JobValueModel::default(),
            matching: MatchingPolicy::default(),
            provider_mix: ProviderMix::default(),
            client_mix: ClientMix::default(),
            challenger_mix: ChallengerMix::default(),
            protocol: ProtocolParameters::default(),
            reputation: ReputationParameters::default(),
            agents: AgentParameters::default(),
            attack: AttackParameters::default(),
        }
    }
}

/// Names accepted by [`SimulationConfig::preset`].
pub const PRESETS: [&str; 5] = [
    "baseline",
    "weak_enforcement",
    "high_verification_cost",
    "no_stake_floor",
    "adversarial_heavy",
];

impl SimulationConfig {
    pub fn baseline() -> Self {
        Self::default()
    }

    /// Unreliable enforcement and a small slashing share.
    pub fn weak_enforcement() -> Self {
        let mut config = Self::default();
        config.protocol = config
            .protocol
            .with_enforcement_reliability(0.7)
            .with_slash_share(0.3);
        config
    }

    pub fn high_verification_cost() -> Self {
        let mut config = Self::default();
        config.protocol = config
            .protocol
            .with_verification_cost(25.0)
            .with_proof_cost(5.0);
        config
    }

    /// No stake floor and no stake requirement for reputation.
    pub fn no_stake_floor() -> Self {
        let mut config = Self::default();
        config.protocol = config.protocol.with_min_stake(0.0);
        config.reputation.min_stake_enforcement = false;
        config
    }

    pub fn adversarial_heavy() -> Self {
        let mut config = Self::default();
        config.provider_mix = ProviderMix {
            honest: 0.3,
            rational: 0.3,
            adversarial: 0.4,
            ..ProviderMix::default()
        };
        config
    }

    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "baseline" | "default" => Ok(Self::baseline()),
            "weak_enforcement" => Ok(Self::weak_enforcement()),
            "high_verification_cost" => Ok(Self::high_verification_cost()),
            "no_stake_floor" => Ok(Self::no_stake_floor()),
            "adversarial_heavy" => Ok(Self::adversarial_heavy()),
            _ => Err(ConfigError::UnknownPreset(name.to_string())),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_periods(mut self, n_periods: u64) -> Self {
        self.n_periods = n_periods;
        self
    }

    pub fn with_population(mut self, providers: usize, clients: usize, challengers: usize) -> Self {
        self.n_providers = providers;
        self.n_clients = clients;
        self.n_challengers = challengers;
        self
    }

    pub fn with_jobs_per_period(mut self, jobs: usize) -> Self {
        self.jobs_per_period = jobs;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolParameters) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_provider_mix(mut self, mix: ProviderMix) -> Self {
        self.provider_mix = mix;
        self
    }

    pub fn with_client_mix(mut self, mix: ClientMix) -> Self {
        self.client_mix = mix;
        self
    }

    pub fn with_challenger_mix(mut self, mix: ChallengerMix) -> Self {
        self.challenger_mix = mix;
        self
    }

    pub fn with_matching(mut self, matching: MatchingPolicy) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_watchers(mut self, enabled: bool) -> Self {
        self.watchers_enabled = enabled;
        self
    }

    /// Check the whole configuration, failing on the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_providers == 0 {
            return Err(ConfigError::NonPositiveCount { field: "n_providers" });
        }
        if self.n_clients == 0 {
            return Err(ConfigError::NonPositiveCount { field: "n_clients" });
        }
        if self.jobs_per_period == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "jobs_per_period",
            });
        }

        self.provider_mix.validate()?;
        self.client_mix.validate()?;
        self.challenger_mix.validate()?;

        if !(self.job_values.mean > 0.0) || !self.job_values.mean.is_finite() {
            return Err(ConfigError::InvalidDistribution(format!(
                "job value mean must be positive, got {}",
                self.job_values.mean
            )));
        }
        check_non_negative("job_values.std", self.job_values.std)?;

        if let MatchingPolicy::Mixed {
            reputation_weight,
            stake_weight,
        } = self.matching
        {
            check_non_negative("matching.reputation_weight", reputation_weight)?;
            check_non_negative("matching.stake_weight", stake_weight)?;
            if reputation_weight + stake_weight <= 0.0 {
                return Err(ConfigError::InvalidDistribution(
                    "mixed matching weights sum to zero".to_string(),
                ));
            }
        }

        self.protocol.validate()?;
        self.reputation.validate()?;
        self.agents.validate()?;
        self.attack.validate()
    }
}

/// A single-field change to a [`SimulationConfig`].
#[derive(Clone, Debug, PartialEq)]
pub enum Override {
    Protocol(ProtocolField, f64),
    Providers(usize),
    Clients(usize),
    Challengers(usize),
    Periods(u64),
    Seed(u64),
    ProviderMix(ProviderMix),
    ClientMix(ClientMix),
    ChallengerMix(ChallengerMix),
    MinStakeEnforcement(bool),
    WatchersEnabled(bool),
    SybilIdentitiesPerAttacker(usize),
    SybilCreationCost(f64),
    GriefingBudget(f64),
}

/// An ordered list of overrides; later entries win.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOverrides(Vec<Override>);

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, change: Override) -> Self {
        self.0.push(change);
        self
    }

    pub fn protocol(self, field: ProtocolField, value: f64) -> Self {
        self.set(Override::Protocol(field, value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Override> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build a new configuration from `base` with `overrides` applied in order.
///
/// `base` is left untouched; the result shares nothing with it.
pub fn apply_overrides(base: &SimulationConfig, overrides: &ConfigOverrides) -> SimulationConfig {
    let mut config = base.clone();
    for change in overrides.iter() {
        match change {
            Override::Protocol(field, value) => {
                config.protocol = config.protocol.with_field(*field, *value)
            }
            Override::Providers(n) => config.n_providers = *n,
            Override::Clients(n) => config.n_clients = *n,
            Override::Challengers(n) => config.n_challengers = *n,
            Override::Periods(n) => config.n_periods = *n,
            Override::Seed(seed) => config.seed = *seed,
            Override::ProviderMix(mix) => config.provider_mix = mix.clone(),
            Override::ClientMix(mix) => config.client_mix = mix.clone(),
            Override::ChallengerMix(mix) => config.challenger_mix = mix.clone(),
            Override::MinStakeEnforcement(enabled) => {
                config.reputation.min_stake_enforcement = *enabled
            }
            Override::WatchersEnabled(enabled) => config.watchers_enabled = *enabled,
            Override::SybilIdentitiesPerAttacker(n) => {
                config.attack.sybil_identities_per_attacker = *n
            }
            Override::SybilCreationCost(cost) => config.attack.sybil_creation_cost = *cost,
            Override::GriefingBudget(budget) => config.attack.griefing_budget = *budget,
        }
    }
    config
}

/// Split `total` into integer counts proportional to `shares` using the
/// largest-remainder method. Ties go to the earlier share.
pub fn apportion(total: usize, shares: &[f64]) -> Vec<usize> {
    let sum: f64 = shares.iter().filter(|s| **s > 0.0).sum();
    if shares.is_empty() || sum <= 0.0 {
        return vec![0; shares.len()];
    }

    let quotas: Vec<f64> = shares
        .iter()
        .map(|&s| if s > 0.0 { s / sum * total as f64 } else { 0.0 })
        .collect();
    let mut counts: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let assigned: usize = counts.iter().sum();

    let mut order: Vec<usize> = (0..shares.len()).filter(|&i| shares[i] > 0.0).collect();
    order.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &i in order.iter().cycle().take(total.saturating_sub(assigned)) {
        counts[i] += 1;
    }
    counts
}

fn rescale<M, K: Copy + PartialEq>(
    mix: &mut M,
    kinds: &[K],
    target: K,
    share: f64,
    mut share_mut: impl FnMut(&mut M, K) -> &mut f64,
) {
    let share = share.clamp(0.0, 1.0);
    let others: f64 = kinds
        .iter()
        .filter(|&&k| k != target)
        .map(|&k| *share_mut(mix, k))
        .sum();
    for &kind in kinds.iter().filter(|&&k| k != target) {
        let current = share_mut(mix, kind);
        *current = if others > 0.0 {
            *current / others * (1.0 - share)
        } else {
            0.0
        };
    }
    *share_mut(mix, target) = share;
}

fn validate_mix(population: &'static str, shares: &[(&'static str, f64)]) -> Result<(), ConfigError> {
    for &(kind, value) in shares {
        if !(value >= 0.0) {
            return Err(ConfigError::NegativeShare {
                population,
                kind,
                value,
            });
        }
    }
    let sum: f64 = shares.iter().map(|(_, v)| v).sum();
    if (sum - 1.0).abs() > MIX_TOLERANCE {
        return Err(ConfigError::MixSum { population, sum });
    }
    Ok(())
}

fn check_probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ProbabilityOutOfRange { field, value })
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        SimulationConfig::default().validate().unwrap();
        for name in PRESETS {
            let config = SimulationConfig::preset(name).unwrap();
            config
                .validate()
                .unwrap_or_else(|e| panic!("preset {} invalid: {}", name, e));
        }
    }

    #[test]
    fn test_mix_must_sum_to_one() {
        let config = SimulationConfig::default().with_provider_mix(ProviderMix {
            honest: 0.5,
            rational: 0.3,
            adversarial: 0.1,
            ..ProviderMix::default()
        });
        match config.validate() {
            Err(ConfigError::MixSum { population, sum }) => {
                assert_eq!(population, "provider");
                assert!((sum - 0.9).abs() < 1e-9);
            }
            other => panic!("expected MixSum error, got {:?}", other),
        }

        let config = SimulationConfig::default().with_client_mix(ClientMix {
            always_audit: 0.5,
            ..ClientMix::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MixSum { population: "client", .. })
        ));
    }

    #[test]
    fn test_mix_within_tolerance_accepted() {
        let config = SimulationConfig::default().with_provider_mix(ProviderMix {
            honest: 0.6 + 5e-7,
            ..ProviderMix::default()
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_positive_counts_rejected() {
        let config = SimulationConfig::default().with_population(0, 10, 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveCount { field: "n_providers" })
        ));
        let config = SimulationConfig::default().with_jobs_per_period(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let toml = r#"
            n_periods = 25
            seed = 9

            [protocol]
            enforcement_reliability = 0.7

            [provider_mix]
            honest = 0.5
            rational = 0.5
            adversarial = 0.0

            [matching]
            policy = "mixed"
            reputation_weight = 0.6
            stake_weight = 0.4
        "#;
        let config = SimulationConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.n_periods, 25);
        assert_eq!(config.seed, 9);
        assert_eq!(config.n_providers, 50);
        assert_eq!(config.protocol.enforcement_reliability, 0.7);
        assert_eq!(config.protocol.verification_cost, 8.0);
        assert_eq!(config.provider_mix.rational, 0.5);
        assert_eq!(
            config.matching,
            MatchingPolicy::Mixed {
                reputation_weight: 0.6,
                stake_weight: 0.4
            }
        );
    }

    #[test]
    fn test_invalid_toml_mix_rejected() {
        let toml = "[client_mix]\nalways_audit = 0.9\n";
        assert!(matches!(
            SimulationConfig::from_toml_str(toml),
            Err(ConfigError::MixSum { .. })
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("n_periods = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_apply_overrides_is_pure() {
        let base = SimulationConfig::default();
        let overrides = ConfigOverrides::new()
            .protocol(ProtocolField::MinStake, 1.0)
            .set(Override::MinStakeEnforcement(false))
            .set(Override::Providers(80));
        let derived = apply_overrides(&base, &overrides);

        assert_eq!(derived.protocol.min_stake, 1.0);
        assert!(!derived.reputation.min_stake_enforcement);
        assert_eq!(derived.n_providers, 80);
        assert_eq!(base, SimulationConfig::default(), "base must not change");
    }

    #[test]
    fn test_later_overrides_win() {
        let overrides = ConfigOverrides::new()
            .set(Override::Seed(1))
            .set(Override::Seed(2));
        assert_eq!(apply_overrides(&SimulationConfig::default(), &overrides).seed, 2);
    }

    #[test]
    fn test_apportion_largest_remainder() {
        assert_eq!(apportion(100, &[0.1, 0.2, 0.35, 0.35]), vec![10, 20, 35, 35]);
        assert_eq!(apportion(10, &[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]), vec![4, 3, 3]);
        assert_eq!(apportion(7, &[0.5, 0.0, 0.5]), vec![4, 0, 3]);
        assert_eq!(apportion(5, &[0.0, 0.0]), vec![0, 0]);

        let counts = apportion(53, &[0.6, 0.3, 0.1]);
        assert_eq!(counts.iter().sum::<usize>(), 53);
    }

    #[test]
    fn test_with_share_rescales_others() {
        let mix = ProviderMix::default().with_share(ProviderKind::Adversarial, 0.4);
        assert!((mix.adversarial - 0.4).abs() < 1e-12);
        assert!((mix.honest - 0.4).abs() < 1e-9, "honest = {}", mix.honest);
        assert!((mix.rational - 0.2).abs() < 1e-9, "rational = {}", mix.rational);
        assert!(mix.validate().is_ok());
    }

    #[test]
    fn test_counts_cover_population() {
        let counts = ProviderMix::default().counts(50);
        let total: usize = counts.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 50);
        assert!(counts.contains(&(ProviderKind::Honest, 30)));
        assert!(counts.contains(&(ProviderKind::Rational, 15)));
        assert!(counts.contains(&(ProviderKind::Adversarial, 5)));
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(
            SimulationConfig::preset("chaos"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }
}
