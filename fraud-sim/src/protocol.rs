//! Protocol parameter model and the closed-form quantities of the fraud game.
//!
//! Every formula the engine, the agents and the analysis tools rely on lives
//! here, so that the simulated incentives and the theoretical predictions are
//! computed by exactly one piece of code.
//!
//! ## Notation
//!
//! | Field                     | Symbol      | Meaning                                   |
//! |---------------------------|-------------|-------------------------------------------|
//! | `min_stake`               | `S_P_min`   | Protocol stake floor                      |
//! | `max_stake`               | `S_P_max`   | Stake ceiling                             |
//! | `base_payment`            | `P_set`     | Nominal job payment                       |
//! | `honest_cost`             | `c_H`       | Provider cost of honest execution         |
//! | `cheat_cost`              | `c_F`       | Provider cost of faking a result          |
//! | `verification_cost`       | `C_safe`    | Client cost of a safe re-execution        |
//! | `proof_cost`              | `c_proof`   | Cost of producing a fraud proof           |
//! | `tx_cost`                 | `c_tx`      | On-chain transaction cost                 |
//! | `slash_share`             | `beta`      | Share of slashed stake paid to disputant  |
//! | `payment_share`           | `lambda`    | Share of the payment refunded to disputant|
//! | `challenge_bond`          | `B_C`       | Bond forfeited by a failed disputant      |
//! | `enforcement_reliability` | `p_w`       | Probability a valid dispute is enforced   |
//!
//! The derived quantities are the equilibrium audit probability
//! `v* = (c_H - c_F) / (P + S)`, the net dispute surplus
//! `Δ = p_w(β·S + λ·P) - (c_proof + c_tx) - (1 - p_w)·B_C` and the equilibrium
//! cheat probability `q* = C_safe / (L + Δ)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::config::ConfigError;

/// Immutable protocol parameters.
///
/// Sweeps and attack scenarios derive variants through the `with_*` builders
/// or [`ProtocolParameters::with_field`]; a run never mutates its copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParameters {
    /// Minimum stake a provider must lock to accept a job.
    pub min_stake: f64,

    /// Maximum stake a provider may lock for a single job.
    pub max_stake: f64,

    /// Nominal payment for a job.
    pub base_payment: f64,

    /// Provider cost of honest execution.
    pub honest_cost: f64,

    /// Provider cost of returning a fabricated result.
    pub cheat_cost: f64,

    /// Client cost of verifying a result.
    pub verification_cost: f64,

    /// Cost of constructing a fraud proof.
    pub proof_cost: f64,

    /// Transaction cost of submitting a dispute.
    pub tx_cost: f64,

    /// Fraction of the slashed stake paid to a successful disputant.
    pub slash_share: f64,

    /// Fraction of the job payment refunded to a successful disputant.
    pub payment_share: f64,

    /// Bond posted by a disputant and forfeited if the dispute fails.
    pub challenge_bond: f64,

    /// Probability that a valid dispute is actually enforced.
    pub enforcement_reliability: f64,

    /// Mean loss a client suffers from an undetected incorrect result.
    pub base_loss: f64,

    /// Standard deviation of the loss around `base_loss`.
    pub loss_variance: f64,

    /// Interest rate used to price locked capital.
    pub capital_rate: f64,

    /// Lock duration, as a fraction of the rate period.
    pub lock_duration: f64,

    /// Length of the challenge window in periods.
    pub challenge_window: u64,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            min_stake: 100.0,
            max_stake: 10_000.0,
            base_payment: 10.0,
            honest_cost: 5.0,
            cheat_cost: 0.5,
            verification_cost: 8.0,
            proof_cost: 2.0,
            tx_cost: 1.0,
            slash_share: 0.5,
            payment_share: 1.0,
            challenge_bond: 5.0,
            enforcement_reliability: 0.95,
            base_loss: 50.0,
            loss_variance: 20.0,
            capital_rate: 0.05,
            lock_duration: 0.01,
            challenge_window: 100,
        }
    }
}

/// Stake needed for a dispute to be worth filing.
///
/// When enforcement never pays out (`p_w·β = 0`) no finite stake makes
/// disputes profitable, which is reported as [`StakeRequirement::Unenforceable`]
/// instead of an infinite float.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StakeRequirement {
    Finite(f64),
    Unenforceable,
}

impl StakeRequirement {
    /// The requirement as a float, with `Unenforceable` mapped to infinity.
    pub fn as_f64(self) -> f64 {
        match self {
            StakeRequirement::Finite(stake) => stake,
            StakeRequirement::Unenforceable => f64::INFINITY,
        }
    }

    pub fn finite(self) -> Option<f64> {
        match self {
            StakeRequirement::Finite(stake) => Some(stake),
            StakeRequirement::Unenforceable => None,
        }
    }

    /// Whether `stake` satisfies the requirement.
    pub fn is_met_by(self, stake: f64) -> bool {
        match self {
            StakeRequirement::Finite(required) => stake >= required,
            StakeRequirement::Unenforceable => false,
        }
    }
}

impl fmt::Display for StakeRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StakeRequirement::Finite(stake) => write!(f, "{:.2}", stake),
            StakeRequirement::Unenforceable => f.write_str("unenforceable"),
        }
    }
}

impl Serialize for StakeRequirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StakeRequirement::Finite(stake) if stake.is_finite() => serializer.serialize_f64(*stake),
            _ => serializer.serialize_none(),
        }
    }
}

impl ProtocolParameters {
    /// Total cost of pursuing a dispute: verification, proof and transaction.
    pub fn dispute_cost(&self) -> f64 {
        self.verification_cost + self.proof_cost + self.tx_cost
    }

    /// Audit probability `v*` at which a provider is indifferent between
    /// honest execution and cheating.
    ///
    /// `payment + stake <= 0` cannot deter anything, so the client should
    /// always audit and the result is 1.0.
    pub fn equilibrium_audit_probability(&self, payment: f64, stake: f64) -> f64 {
        let at_risk = payment + stake;
        if at_risk <= 0.0 || at_risk.is_nan() {
            return 1.0;
        }
        let savings = self.honest_cost - self.cheat_cost;
        if savings <= 0.0 {
            return 0.0;
        }
        (savings / at_risk).clamp(0.0, 1.0)
    }

    /// Detection probability above which a rational provider stays honest.
    ///
    /// Same quantity as [`Self::equilibrium_audit_probability`].
    pub fn incentive_threshold(&self, payment: f64, stake: f64) -> f64 {
        self.equilibrium_audit_probability(payment, stake)
    }

    /// Net surplus `Δ` a client collects from a dispute it has decided to
    /// pursue after verifying. May be negative.
    pub fn net_dispute_surplus(&self, stake: f64, payment: f64) -> f64 {
        let p_w = self.enforcement_reliability;
        p_w * (self.slash_share * stake + self.payment_share * payment)
            - (self.proof_cost + self.tx_cost)
            - (1.0 - p_w) * self.challenge_bond
    }

    /// Cheat probability `q*` at which a client is indifferent between
    /// auditing and trusting the result.
    pub fn equilibrium_cheat_probability(&self, stake: f64, payment: f64, loss: f64) -> f64 {
        let denominator = loss + self.net_dispute_surplus(stake, payment);
        if denominator <= 0.0 || denominator.is_nan() {
            return 1.0;
        }
        (self.verification_cost / denominator).clamp(0.0, 1.0)
    }

    /// Belief `μ*` in the provider cheating above which auditing pays off.
    ///
    /// Same quantity as [`Self::equilibrium_cheat_probability`].
    pub fn belief_threshold_for_auditing(&self, stake: f64, payment: f64, loss: f64) -> f64 {
        self.equilibrium_cheat_probability(stake, payment, loss)
    }

    /// Expected value for a challenger that disputes from scratch and pays the
    /// full dispute cost.
    pub fn dispute_expected_value(&self, stake: f64, payment: f64) -> f64 {
        let p_w = self.enforcement_reliability;
        p_w * (self.slash_share * stake + self.payment_share * payment)
            - self.dispute_cost()
            - (1.0 - p_w) * self.challenge_bond
    }

    /// Smallest stake at which a full-cost dispute breaks even.
    pub fn minimum_viable_stake(&self, payment: f64) -> StakeRequirement {
        let p_w = self.enforcement_reliability;
        let leverage = p_w * self.slash_share;
        if leverage <= 0.0 {
            return StakeRequirement::Unenforceable;
        }
        let shortfall = self.dispute_cost() + (1.0 - p_w) * self.challenge_bond
            - p_w * self.payment_share * payment;
        StakeRequirement::Finite((shortfall / leverage).max(0.0))
    }

    /// Opportunity cost of keeping `stake` locked for one job.
    pub fn capital_cost(&self, stake: f64) -> f64 {
        self.capital_rate * self.lock_duration * stake
    }

    /// Sum a disputant must hold to file a dispute from scratch.
    pub fn dispute_outlay(&self) -> f64 {
        self.dispute_cost() + self.challenge_bond
    }

    /// Sum a client that already verified must hold to continue to a dispute.
    pub fn escalation_outlay(&self) -> f64 {
        self.proof_cost + self.tx_cost + self.challenge_bond
    }

    /// Check that costs are non-negative and probabilities lie in [0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let costs = [
            ("protocol.min_stake", self.min_stake),
            ("protocol.max_stake", self.max_stake),
            ("protocol.base_payment", self.base_payment),
            ("protocol.honest_cost", self.honest_cost),
            ("protocol.cheat_cost", self.cheat_cost),
            ("protocol.verification_cost", self.verification_cost),
            ("protocol.proof_cost", self.proof_cost),
            ("protocol.tx_cost", self.tx_cost),
            ("protocol.challenge_bond", self.challenge_bond),
            ("protocol.base_loss", self.base_loss),
            ("protocol.loss_variance", self.loss_variance),
            ("protocol.capital_rate", self.capital_rate),
            ("protocol.lock_duration", self.lock_duration),
        ];
        for (field, value) in costs {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ConfigError::Negative { field, value });
            }
        }

        let probabilities = [
            ("protocol.slash_share", self.slash_share),
            ("protocol.payment_share", self.payment_share),
            ("protocol.enforcement_reliability", self.enforcement_reliability),
        ];
        for (field, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ProbabilityOutOfRange { field, value });
            }
        }

        if self.max_stake < self.min_stake {
            return Err(ConfigError::StakeBounds {
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        Ok(())
    }

    pub fn with_min_stake(mut self, min_stake: f64) -> Self {
        self.min_stake = min_stake;
        self
    }

    pub fn with_enforcement_reliability(mut self, p_w: f64) -> Self {
        self.enforcement_reliability = p_w;
        self
    }

    pub fn with_slash_share(mut self, beta: f64) -> Self {
        self.slash_share = beta;
        self
    }

    pub fn with_challenge_bond(mut self, bond: f64) -> Self {
        self.challenge_bond = bond;
        self
    }

    pub fn with_verification_cost(mut self, cost: f64) -> Self {
        self.verification_cost = cost;
        self
    }

    pub fn with_proof_cost(mut self, cost: f64) -> Self {
        self.proof_cost = cost;
        self
    }

    /// Copy of these parameters with one numeric field replaced.
    pub fn with_field(&self, field: ProtocolField, value: f64) -> Self {
        let mut params = self.clone();
        *params.field_mut(field) = value;
        params
    }

    /// Current value of a numeric field.
    pub fn field(&self, field: ProtocolField) -> f64 {
        match field {
            ProtocolField::MinStake => self.min_stake,
            ProtocolField::MaxStake => self.max_stake,
            ProtocolField::BasePayment => self.base_payment,
            ProtocolField::HonestCost => self.honest_cost,
            ProtocolField::CheatCost => self.cheat_cost,
            ProtocolField::VerificationCost => self.verification_cost,
            ProtocolField::ProofCost => self.proof_cost,
            ProtocolField::TxCost => self.tx_cost,
            ProtocolField::SlashShare => self.slash_share,
            ProtocolField::PaymentShare => self.payment_share,
            ProtocolField::ChallengeBond => self.challenge_bond,
            ProtocolField::EnforcementReliability => self.enforcement_reliability,
            ProtocolField::BaseLoss => self.base_loss,
            ProtocolField::LossVariance => self.loss_variance,
            ProtocolField::CapitalRate => self.capital_rate,
            ProtocolField::LockDuration => self.lock_duration,
        }
    }

    fn field_mut(&mut self, field: ProtocolField) -> &mut f64 {
        match field {
            ProtocolField::MinStake => &mut self.min_stake,
            ProtocolField::MaxStake => &mut self.max_stake,
            ProtocolField::BasePayment => &mut self.base_payment,
            ProtocolField::HonestCost => &mut self.honest_cost,
            ProtocolField::CheatCost => &mut self.cheat_cost,
            ProtocolField::VerificationCost => &mut self.verification_cost,
            ProtocolField::ProofCost => &mut self.proof_cost,
            ProtocolField::TxCost => &mut self.tx_cost,
            ProtocolField::SlashShare => &mut self.slash_share,
            ProtocolField::PaymentShare => &mut self.payment_share,
            ProtocolField::ChallengeBond => &mut self.challenge_bond,
            ProtocolField::EnforcementReliability => &mut self.enforcement_reliability,
            ProtocolField::BaseLoss => &mut self.base_loss,
            ProtocolField::LossVariance => &mut self.loss_variance,
            ProtocolField::CapitalRate => &mut self.capital_rate,
            ProtocolField::LockDuration => &mut self.lock_duration,
        }
    }
}

/// Numeric protocol fields addressable by sweeps and overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolField {
    MinStake,
    MaxStake,
    BasePayment,
    HonestCost,
    CheatCost,
    VerificationCost,
    ProofCost,
    TxCost,
    SlashShare,
    PaymentShare,
    ChallengeBond,
    EnforcementReliability,
    BaseLoss,
    LossVariance,
    CapitalRate,
    LockDuration,
}

impl ProtocolField {
    pub const ALL: [ProtocolField; 16] = [
        ProtocolField::MinStake,
        ProtocolField::MaxStake,
        ProtocolField::BasePayment,
        ProtocolField::HonestCost,
        ProtocolField::CheatCost,
        ProtocolField::VerificationCost,
        ProtocolField::ProofCost,
        ProtocolField::TxCost,
        ProtocolField::SlashShare,
        ProtocolField::PaymentShare,
        ProtocolField::ChallengeBond,
        ProtocolField::EnforcementReliability,
        ProtocolField::BaseLoss,
        ProtocolField::LossVariance,
        ProtocolField::CapitalRate,
        ProtocolField::LockDuration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProtocolField::MinStake => "min_stake",
            ProtocolField::MaxStake => "max_stake",
            ProtocolField::BasePayment => "base_payment",
            ProtocolField::HonestCost => "honest_cost",
            ProtocolField::CheatCost => "cheat_cost",
            ProtocolField::VerificationCost => "verification_cost",
            ProtocolField::ProofCost => "proof_cost",
            ProtocolField::TxCost => "tx_cost",
            ProtocolField::SlashShare => "slash_share",
            ProtocolField::PaymentShare => "payment_share",
            ProtocolField::ChallengeBond => "challenge_bond",
            ProtocolField::EnforcementReliability => "enforcement_reliability",
            ProtocolField::BaseLoss => "base_loss",
            ProtocolField::LossVariance => "loss_variance",
            ProtocolField::CapitalRate => "capital_rate",
            ProtocolField::LockDuration => "lock_duration",
        }
    }
}

impl fmt::Display for ProtocolField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        ProtocolField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownParameter(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_scenario() {
        let params = ProtocolParameters::default();

        let v_star = params.equilibrium_audit_probability(50.0, 100.0);
        assert!((v_star - 0.03).abs() < 1e-12, "v* = {}", v_star);

        let delta = params.net_dispute_surplus(100.0, 50.0);
        assert!((delta - 91.75).abs() < 1e-9, "Δ = {}", delta);

        let q_star = params.equilibrium_cheat_probability(100.0, 50.0, 50.0);
        assert!(
            (q_star - 8.0 / 141.75).abs() < 1e-12,
            "q* = {}",
            q_star
        );
        assert_eq!(format!("{:.4}", q_star), "0.0564");
    }

    #[test]
    fn test_threshold_and_audit_probability_agree() {
        let params = ProtocolParameters::default();
        for (payment, stake) in [(10.0, 100.0), (50.0, 1.0), (0.5, 0.5), (200.0, 5000.0)] {
            assert_eq!(
                params.incentive_threshold(payment, stake),
                params.equilibrium_audit_probability(payment, stake)
            );
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        let params = ProtocolParameters::default();
        assert_eq!(params.equilibrium_audit_probability(0.0, 0.0), 1.0);
        assert_eq!(params.equilibrium_audit_probability(-5.0, 2.0), 1.0);

        // Cheating more expensive than honesty: never audit.
        let inverted = ProtocolParameters {
            cheat_cost: 10.0,
            ..Default::default()
        };
        assert_eq!(inverted.equilibrium_audit_probability(10.0, 10.0), 0.0);

        // Denominator wiped out by a large bond and no enforcement.
        let hostile = ProtocolParameters::default()
            .with_enforcement_reliability(0.0)
            .with_challenge_bond(1000.0);
        assert_eq!(hostile.equilibrium_cheat_probability(100.0, 10.0, 50.0), 1.0);
    }

    #[test]
    fn test_probabilities_clamped() {
        let params = ProtocolParameters::default();
        // Tiny stakes push the raw ratio above one.
        assert_eq!(params.equilibrium_audit_probability(1.0, 1.0), 1.0);
        let q = params.equilibrium_cheat_probability(0.0, 0.0, 1.0);
        assert!((0.0..=1.0).contains(&q));
    }

    #[test]
    fn test_minimum_viable_stake() {
        let params = ProtocolParameters::default();
        // (11 + 0.25 - 0.95 * 10) / 0.475
        let expected = (11.0 + 0.05 * 5.0 - 0.95 * 10.0) / 0.475;
        match params.minimum_viable_stake(10.0) {
            StakeRequirement::Finite(stake) => {
                assert!((stake - expected).abs() < 1e-9, "stake = {}", stake)
            }
            other => panic!("expected finite stake, got {:?}", other),
        }

        // Large payments alone cover the dispute.
        assert_eq!(
            params.minimum_viable_stake(1000.0),
            StakeRequirement::Finite(0.0)
        );

        let unenforced = params.clone().with_enforcement_reliability(0.0);
        assert_eq!(
            unenforced.minimum_viable_stake(10.0),
            StakeRequirement::Unenforceable
        );
        let no_slash = params.with_slash_share(0.0);
        assert!(no_slash.minimum_viable_stake(10.0).as_f64().is_infinite());
    }

    #[test]
    fn test_stake_requirement_serializes_null_when_unenforceable() {
        let json = serde_json::to_string(&StakeRequirement::Unenforceable).unwrap();
        assert_eq!(json, "null");
        let json = serde_json::to_string(&StakeRequirement::Finite(2.5)).unwrap();
        assert_eq!(json, "2.5");
    }

    #[test]
    fn test_dispute_expected_value() {
        let params = ProtocolParameters::default();
        // 0.95 * (50 + 50) - 11 - 0.25
        let ev = params.dispute_expected_value(100.0, 50.0);
        assert!((ev - 83.75).abs() < 1e-9, "EV = {}", ev);
        assert!(params.dispute_expected_value(0.0, 0.0) < 0.0);
    }

    #[test]
    fn test_capital_cost() {
        let params = ProtocolParameters::default();
        assert!((params.capital_cost(100.0) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_with_field_and_parse() {
        let params = ProtocolParameters::default();
        let field: ProtocolField = "enforcement-reliability".parse().unwrap();
        assert_eq!(field, ProtocolField::EnforcementReliability);

        let weaker = params.with_field(field, 0.7);
        assert_eq!(weaker.enforcement_reliability, 0.7);
        assert_eq!(params.enforcement_reliability, 0.95, "original untouched");
        assert_eq!(weaker.field(field), 0.7);

        assert!("not_a_field".parse::<ProtocolField>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ProtocolParameters::default().validate().is_ok());
        let bad = ProtocolParameters::default().with_enforcement_reliability(1.5);
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::ProbabilityOutOfRange { .. })
        ));
        let bad = ProtocolParameters::default().with_verification_cost(-1.0);
        assert!(matches!(bad.validate(), Err(ConfigError::Negative { .. })));
    }
}
