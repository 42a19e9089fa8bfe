//! Attack scenarios.
//!
//! An attack is a configuration transform: it derives a perturbed
//! configuration from a base one, runs both, and reports the difference.
//! Scenarios never touch the engine; all adversarial behaviour comes from the
//! population mix and protocol parameters they select.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::{
    apply_overrides, ChallengerMix, ClientMix, ConfigError, ConfigOverrides, Override, ProviderMix,
    SimulationConfig,
};
use crate::protocol::ProtocolField;
use crate::simulation::{ClientKind, ProviderKind, SimulationEngine, SimulationResult};

/// Names accepted by [`attack_by_name`].
pub const ATTACKS: [&str; 6] = [
    "reputation_farming",
    "sybil",
    "collusion",
    "griefing",
    "no_stake_floor",
    "censorship",
];

/// Baseline and attack runs side by side.
#[derive(Clone, Debug, Serialize)]
pub struct AttackResult {
    pub attack_name: String,
    pub baseline: SimulationResult,
    pub attack: SimulationResult,

    pub fraud_rate_increase: f64,
    pub detection_rate_change: f64,
    /// Net profit of attacker-controlled providers in the attack run.
    pub attacker_profit: f64,
    /// Extra client fraud losses caused by the attack.
    pub victim_losses: f64,
    pub social_welfare_loss: f64,

    pub attack_specific: BTreeMap<String, f64>,
}

impl AttackResult {
    pub fn compare(
        attack_name: &str,
        baseline: SimulationResult,
        attack: SimulationResult,
        attack_specific: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            attack_name: attack_name.to_string(),
            fraud_rate_increase: attack.fraud_rate - baseline.fraud_rate,
            detection_rate_change: attack.detection_rate - baseline.detection_rate,
            attacker_profit: attack.attack.attacker_total_profit,
            victim_losses: attack.totals.client_losses - baseline.totals.client_losses,
            social_welfare_loss: baseline.social_welfare() - attack.social_welfare(),
            attack_specific,
            baseline,
            attack,
        }
    }
}

/// A named perturbation of a base configuration.
pub trait AttackScenario: Send + Sync {
    fn name(&self) -> &'static str;

    fn base_config(&self) -> &SimulationConfig;

    /// Changes the attack makes to the baseline.
    fn overrides(&self) -> ConfigOverrides;

    /// Configuration the attack is measured against.
    fn baseline_config(&self) -> SimulationConfig {
        self.base_config().clone()
    }

    fn attack_config(&self) -> SimulationConfig {
        apply_overrides(&self.baseline_config(), &self.overrides())
    }

    fn attack_specific(
        &self,
        _baseline: &SimulationResult,
        _attack: &SimulationResult,
    ) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    /// Run baseline and attack for `periods` periods each, in parallel.
    fn run(&self, periods: u64) -> Result<AttackResult, ConfigError> {
        let baseline_config = self.baseline_config().with_periods(periods);
        let attack_config = self.attack_config().with_periods(periods);
        info!("Running {} attack over {} periods", self.name(), periods);

        let (baseline, attack) = rayon::join(
            || SimulationEngine::new(baseline_config).map(SimulationEngine::run),
            || SimulationEngine::new(attack_config).map(SimulationEngine::run),
        );
        let (baseline, attack) = (baseline?, attack?);
        let specific = self.attack_specific(&baseline, &attack);
        Ok(AttackResult::compare(self.name(), baseline, attack, specific))
    }
}

fn metric(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect()
}

fn mean_profit(result: &SimulationResult, kind: ProviderKind) -> f64 {
    result.mean_profit_of(kind).unwrap_or(0.0)
}

/// Farmers build reputation on cheap jobs, then cheat on clients that audit
/// less as reputation grows.
#[derive(Clone, Debug)]
pub struct ReputationFarming {
    pub base: SimulationConfig,
    pub farmers: usize,
    pub min_stake_enforced: bool,
}

impl ReputationFarming {
    pub fn new(base: SimulationConfig) -> Self {
        Self {
            base,
            farmers: 5,
            min_stake_enforced: false,
        }
    }

    pub fn with_farmers(mut self, farmers: usize) -> Self {
        self.farmers = farmers;
        self
    }

    pub fn with_min_stake_enforced(mut self, enforced: bool) -> Self {
        self.min_stake_enforced = enforced;
        self
    }
}

impl AttackScenario for ReputationFarming {
    fn name(&self) -> &'static str {
        "reputation_farming"
    }

    fn base_config(&self) -> &SimulationConfig {
        &self.base
    }

    fn overrides(&self) -> ConfigOverrides {
        let share = (self.farmers as f64 / self.base.n_providers as f64).min(0.5);
        let providers = ProviderMix {
            honest: 0.3,
            rational: 0.7 - share,
            adversarial: 0.0,
            reputation_farmer: share,
            sybil: 0.0,
            colluding: 0.0,
        };
        let clients = ClientMix {
            always_audit: 0.05,
            never_audit: 0.15,
            mixed_equilibrium: 0.0,
            reputation_weighted: 0.8,
            belief_threshold: 0.0,
            naive: 0.0,
            colluding: 0.0,
        };

        let mut overrides = ConfigOverrides::new()
            .set(Override::ProviderMix(providers))
            .set(Override::ClientMix(clients))
            .set(Override::MinStakeEnforcement(self.min_stake_enforced));
        if !self.min_stake_enforced {
            overrides = overrides.protocol(ProtocolField::MinStake, 1.0);
        }
        overrides
    }

    fn attack_specific(
        &self,
        _baseline: &SimulationResult,
        attack: &SimulationResult,
    ) -> BTreeMap<String, f64> {
        metric(&[
            ("farming_suspects", attack.attack.farming_suspects.len() as f64),
            ("farmer_mean_profit", mean_profit(attack, ProviderKind::ReputationFarmer)),
            ("honest_mean_profit", mean_profit(attack, ProviderKind::Honest)),
            ("attacker_frauds_undetected", attack.attack.attacker_frauds_undetected as f64),
        ])
    }
}

/// Rings of cheap identities that burn low-reputation identities on fraud.
#[derive(Clone, Debug)]
pub struct Sybil {
    pub base: SimulationConfig,
    pub identities_per_attacker: usize,
    pub attackers: usize,
    pub identity_cost: f64,
}

impl Sybil {
    pub fn new(base: SimulationConfig) -> Self {
        Self {
            base,
            identities_per_attacker: 10,
            attackers: 3,
            identity_cost: 10.0,
        }
    }

    pub fn with_attackers(mut self, attackers: usize, identities_per_attacker: usize) -> Self {
        self.attackers = attackers;
        self.identities_per_attacker = identities_per_attacker;
        self
    }
}

impl AttackScenario for Sybil {
    fn name(&self) -> &'static str {
        "sybil"
    }

    fn base_config(&self) -> &SimulationConfig {
        &self.base
    }

    fn overrides(&self) -> ConfigOverrides {
        let base_n = self.base.n_providers;
        let identities = self.identities_per_attacker * self.attackers;
        let total = (base_n + identities) as f64;

        // The original providers keep their numbers; the identities are added.
        let honest = (base_n as f64 * 0.6).floor() / total;
        let adversarial = (base_n as f64 * 0.1).floor() / total;
        let sybil = identities as f64 / total;
        let providers = ProviderMix {
            honest,
            rational: 1.0 - honest - adversarial - sybil,
            adversarial,
            reputation_farmer: 0.0,
            sybil,
            colluding: 0.0,
        };

        ConfigOverrides::new()
            .set(Override::Providers(base_n + identities))
            .set(Override::ProviderMix(providers))
            .set(Override::SybilIdentitiesPerAttacker(self.identities_per_attacker))
            .set(Override::SybilCreationCost(self.identity_cost))
    }

    fn attack_specific(
        &self,
        _baseline: &SimulationResult,
        attack: &SimulationResult,
    ) -> BTreeMap<String, f64> {
        metric(&[
            ("identities", (self.identities_per_attacker * self.attackers) as f64),
            ("sybil_mean_profit", mean_profit(attack, ProviderKind::Sybil)),
            ("creation_costs", attack.attack.sybil_creation_costs),
            ("self_buy_suspects", attack.attack.self_buy_suspects.len() as f64),
        ])
    }
}

/// Provider/client pairs where the client never audits its partner.
#[derive(Clone, Debug)]
pub struct Collusion {
    pub base: SimulationConfig,
    pub pairs: usize,
}

impl Collusion {
    pub fn new(base: SimulationConfig) -> Self {
        Self { base, pairs: 10 }
    }

    pub fn with_pairs(mut self, pairs: usize) -> Self {
        self.pairs = pairs;
        self
    }
}

impl AttackScenario for Collusion {
    fn name(&self) -> &'static str {
        "collusion"
    }

    fn base_config(&self) -> &SimulationConfig {
        &self.base
    }

    fn overrides(&self) -> ConfigOverrides {
        let provider_share = (self.pairs as f64 / self.base.n_providers as f64).min(1.0);
        let client_share = (self.pairs as f64 / self.base.n_clients as f64).min(1.0);
        ConfigOverrides::new()
            .set(Override::ProviderMix(
                self.base
                    .provider_mix
                    .with_share(ProviderKind::Colluding, provider_share),
            ))
            .set(Override::ClientMix(
                self.base.client_mix.with_share(ClientKind::Colluding, client_share),
            ))
            // Nobody outside the pair looks at the job.
            .set(Override::Challengers(0))
    }

    fn attack_specific(
        &self,
        _baseline: &SimulationResult,
        attack: &SimulationResult,
    ) -> BTreeMap<String, f64> {
        metric(&[
            ("pairs", self.pairs as f64),
            ("colluding_mean_profit", mean_profit(attack, ProviderKind::Colluding)),
            ("attacker_frauds_undetected", attack.attack.attacker_frauds_undetected as f64),
            ("self_buy_suspects", attack.attack.self_buy_suspects.len() as f64),
        ])
    }
}

/// Challengers that file disputes against random jobs.
///
/// Both runs enable watchers so the only difference is the griefers.
#[derive(Clone, Debug)]
pub struct Griefing {
    pub base: SimulationConfig,
    pub griefers: usize,
    pub budget_per_griefer: f64,
}

impl Griefing {
    pub fn new(base: SimulationConfig) -> Self {
        Self {
            base,
            griefers: 5,
            budget_per_griefer: 500.0,
        }
    }

    pub fn with_griefers(mut self, griefers: usize, budget_per_griefer: f64) -> Self {
        self.griefers = griefers;
        self.budget_per_griefer = budget_per_griefer;
        self
    }
}

impl AttackScenario for Griefing {
    fn name(&self) -> &'static str {
        "griefing"
    }

    fn base_config(&self) -> &SimulationConfig {
        &self.base
    }

    fn baseline_config(&self) -> SimulationConfig {
        self.base.clone().with_watchers(true)
    }

    fn overrides(&self) -> ConfigOverrides {
        let watchers = self.base.n_challengers;
        let total = watchers + self.griefers;
        let mix = if total == 0 {
            ChallengerMix::default()
        } else {
            ChallengerMix {
                permissionless: watchers as f64 / total as f64,
                griefing: self.griefers as f64 / total as f64,
            }
        };
        let bond = (self.base.protocol.challenge_bond * 0.5).max(1.0);

        ConfigOverrides::new()
            .set(Override::Challengers(total))
            .set(Override::ChallengerMix(mix))
            .set(Override::GriefingBudget(self.budget_per_griefer))
            .protocol(ProtocolField::ChallengeBond, bond)
    }

    fn attack_specific(
        &self,
        baseline: &SimulationResult,
        attack: &SimulationResult,
    ) -> BTreeMap<String, f64> {
        metric(&[
            ("frivolous_disputes", attack.attack.frivolous_disputes as f64),
            ("accidental_catches", attack.attack.accidental_catches as f64),
            ("griefing_costs", attack.attack.griefing_costs),
            (
                "honest_profit_change",
                mean_profit(attack, ProviderKind::Honest) - mean_profit(baseline, ProviderKind::Honest),
            ),
        ])
    }
}

/// Stake floor dropped so that slashing costs a cheater almost nothing.
#[derive(Clone, Debug)]
pub struct NoStakeFloor {
    pub base: SimulationConfig,
    pub min_stake: f64,
}

impl NoStakeFloor {
    pub fn new(base: SimulationConfig) -> Self {
        Self {
            base,
            min_stake: 1.0,
        }
    }
}

impl AttackScenario for NoStakeFloor {
    fn name(&self) -> &'static str {
        "no_stake_floor"
    }

    fn base_config(&self) -> &SimulationConfig {
        &self.base
    }

    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides::new()
            .protocol(ProtocolField::MinStake, self.min_stake)
            .set(Override::ProviderMix(ProviderMix {
                honest: 0.3,
                rational: 0.4,
                adversarial: 0.3,
                reputation_farmer: 0.0,
                sybil: 0.0,
                colluding: 0.0,
            }))
    }

    fn attack_specific(
        &self,
        baseline: &SimulationResult,
        attack: &SimulationResult,
    ) -> BTreeMap<String, f64> {
        let minimum = self
            .base
            .protocol
            .minimum_viable_stake(baseline.mean_job_value)
            .as_f64();
        metric(&[
            ("mean_stake_baseline", baseline.mean_stake),
            ("mean_stake_attack", attack.mean_stake),
            ("minimum_viable_stake", minimum),
            ("adversarial_mean_profit", mean_profit(attack, ProviderKind::Adversarial)),
        ])
    }
}

/// A censor drops a share of dispute transactions, lowering `p_w`.
#[derive(Clone, Debug)]
pub struct Censorship {
    pub base: SimulationConfig,
    pub censorship_rate: f64,
}

impl Censorship {
    pub fn new(base: SimulationConfig) -> Self {
        Self {
            base,
            censorship_rate: 0.3,
        }
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.censorship_rate = rate;
        self
    }
}

impl AttackScenario for Censorship {
    fn name(&self) -> &'static str {
        "censorship"
    }

    fn base_config(&self) -> &SimulationConfig {
        &self.base
    }

    fn overrides(&self) -> ConfigOverrides {
        let p_w = self.base.protocol.enforcement_reliability * (1.0 - self.censorship_rate);
        ConfigOverrides::new().protocol(ProtocolField::EnforcementReliability, p_w)
    }

    fn attack_specific(
        &self,
        baseline: &SimulationResult,
        attack: &SimulationResult,
    ) -> BTreeMap<String, f64> {
        metric(&[
            ("censorship_rate", self.censorship_rate),
            ("dispute_success_baseline", baseline.dispute_success_rate),
            ("dispute_success_attack", attack.dispute_success_rate),
            ("q_star_attack", attack.theoretical.q_star),
        ])
    }
}

/// Look up a scenario by name with its default parameters.
pub fn attack_by_name(
    name: &str,
    base: &SimulationConfig,
) -> Result<Box<dyn AttackScenario>, ConfigError> {
    let base = base.clone();
    match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "reputation_farming" | "farming" => Ok(Box::new(ReputationFarming::new(base))),
        "sybil" => Ok(Box::new(Sybil::new(base))),
        "collusion" => Ok(Box::new(Collusion::new(base))),
        "griefing" => Ok(Box::new(Griefing::new(base))),
        "no_stake_floor" => Ok(Box::new(NoStakeFloor::new(base))),
        "censorship" => Ok(Box::new(Censorship::new(base))),
        _ => Err(ConfigError::UnknownAttack(name.to_string())),
    }
}

/// Run every scenario against `base`, in parallel.
pub fn run_all_attacks(
    base: &SimulationConfig,
    periods: u64,
) -> Result<BTreeMap<String, AttackResult>, ConfigError> {
    let results = ATTACKS
        .par_iter()
        .map(|name| {
            let scenario = attack_by_name(name, base)?;
            Ok((name.to_string(), scenario.run(periods)?))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    Ok(results.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SimulationConfig {
        SimulationConfig::baseline()
            .with_population(20, 40, 4)
            .with_jobs_per_period(10)
    }

    #[test]
    fn test_every_attack_config_is_valid() {
        let base = base();
        for name in ATTACKS {
            let scenario = attack_by_name(name, &base).unwrap();
            assert_eq!(scenario.name(), name);
            scenario
                .attack_config()
                .validate()
                .unwrap_or_else(|e| panic!("{} config invalid: {}", name, e));
            scenario
                .baseline_config()
                .validate()
                .unwrap_or_else(|e| panic!("{} baseline invalid: {}", name, e));
        }
    }

    #[test]
    fn test_unknown_attack_rejected() {
        assert!(matches!(
            attack_by_name("ddos", &base()),
            Err(ConfigError::UnknownAttack(_))
        ));
    }

    #[test]
    fn test_attack_config_leaves_base_untouched() {
        let base = base();
        let attack = NoStakeFloor::new(base.clone());
        let config = attack.attack_config();
        assert_eq!(config.protocol.min_stake, 1.0);
        assert_eq!(attack.base.protocol.min_stake, 100.0);
        assert_eq!(attack.base, base);
    }

    #[test]
    fn test_sybil_adds_identities() {
        let attack = Sybil::new(base()).with_attackers(2, 5);
        let config = attack.attack_config();
        assert_eq!(config.n_providers, 30);
        let counts = config.provider_mix.counts(config.n_providers);
        let sybils = counts
            .iter()
            .find(|(k, _)| *k == ProviderKind::Sybil)
            .map(|(_, n)| *n);
        assert_eq!(sybils, Some(10));
        assert_eq!(config.attack.sybil_identities_per_attacker, 5);
    }

    #[test]
    fn test_griefing_baseline_has_watchers() {
        let attack = Griefing::new(base());
        assert!(attack.baseline_config().watchers_enabled);
        let config = attack.attack_config();
        assert!(config.watchers_enabled);
        assert_eq!(config.n_challengers, 9);
        assert_eq!(config.protocol.challenge_bond, 2.5);
    }

    #[test]
    fn test_censorship_lowers_enforcement() {
        let config = Censorship::new(base()).attack_config();
        assert!((config.protocol.enforcement_reliability - 0.665).abs() < 1e-12);
    }

    #[test]
    fn test_collusion_run_reports_diff() {
        let result = Collusion::new(base()).with_pairs(4).run(20).unwrap();
        assert_eq!(result.attack_name, "collusion");
        assert_eq!(result.baseline.n_periods, 20);
        assert_eq!(result.attack.n_periods, 20);
        assert!(
            (result.fraud_rate_increase - (result.attack.fraud_rate - result.baseline.fraud_rate))
                .abs()
                < 1e-12
        );
        assert!(result.attack_specific.contains_key("colluding_mean_profit"));
    }
}
