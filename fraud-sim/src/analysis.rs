//! Closed-form analysis of the fraud game.
//!
//! This module provides calculations for:
//! - The mixed-strategy equilibrium at a given payment, stake and loss
//! - One-parameter sensitivity sweeps
//! - Minimum viable stake across payment levels
//! - Back-of-envelope attack profitability
//! - Welfare and inequality of simulated outcomes

use std::collections::BTreeMap;

use serde::Serialize;

use crate::protocol::{ProtocolField, ProtocolParameters, StakeRequirement};
use crate::simulation::AgentId;

/// Equilibrium quantities for one (payment, stake, loss) point.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TheoreticalEquilibrium {
    /// Equilibrium audit probability.
    pub v_star: f64,
    /// Equilibrium cheating probability.
    pub q_star: f64,
    /// Detection probability at which cheating stops paying.
    pub theta: f64,
    /// Net dispute surplus.
    pub delta: f64,
    pub minimum_viable_stake: StakeRequirement,
    /// Fraud belief above which auditing pays.
    pub mu_star: f64,

    pub enforcement_viable: bool,
    pub incentive_compatible: bool,

    pub expected_fraud_rate: f64,
    pub expected_detection_rate: f64,
    pub expected_provider_utility: f64,
    pub expected_client_utility: f64,
}

pub fn compute_theoretical_equilibrium(
    protocol: &ProtocolParameters,
    payment: f64,
    stake: f64,
    loss: f64,
) -> TheoreticalEquilibrium {
    let v_star = protocol.equilibrium_audit_probability(payment, stake);
    let q_star = protocol.equilibrium_cheat_probability(stake, payment, loss);
    let theta = protocol.incentive_threshold(payment, stake);
    let delta = protocol.net_dispute_surplus(stake, payment);
    let minimum_viable_stake = protocol.minimum_viable_stake(payment);
    let mu_star = protocol.belief_threshold_for_auditing(stake, payment, loss);

    // Client pays P, audits with v*, eats L on missed fraud and recovers Δ
    // on caught fraud.
    let expected_client_utility = -payment - v_star * protocol.verification_cost
        - (1.0 - v_star) * q_star * loss
        + v_star * q_star * delta;

    TheoreticalEquilibrium {
        v_star,
        q_star,
        theta,
        delta,
        minimum_viable_stake,
        mu_star,
        enforcement_viable: minimum_viable_stake.is_met_by(stake),
        incentive_compatible: v_star >= theta,
        expected_fraud_rate: q_star,
        expected_detection_rate: if q_star > 0.0 { v_star } else { 1.0 },
        expected_provider_utility: payment - protocol.honest_cost,
        expected_client_utility,
    }
}

/// Equilibrium response to one protocol field.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SensitivitySweep {
    pub parameter: String,
    pub values: Vec<f64>,
    pub v_star: Vec<f64>,
    pub q_star: Vec<f64>,
    pub theta: Vec<f64>,
    pub delta: Vec<f64>,
    pub minimum_viable_stake: Vec<StakeRequirement>,
    pub expected_fraud_rate: Vec<f64>,
    pub expected_provider_utility: Vec<f64>,
    pub expected_client_utility: Vec<f64>,
}

pub fn parameter_sensitivity(
    base: &ProtocolParameters,
    parameter: ProtocolField,
    values: &[f64],
    payment: f64,
    stake: f64,
    loss: f64,
) -> SensitivitySweep {
    let mut sweep = SensitivitySweep {
        parameter: parameter.name().to_string(),
        values: values.to_vec(),
        ..Default::default()
    };
    for &value in values {
        let protocol = base.with_field(parameter, value);
        let eq = compute_theoretical_equilibrium(&protocol, payment, stake, loss);
        sweep.v_star.push(eq.v_star);
        sweep.q_star.push(eq.q_star);
        sweep.theta.push(eq.theta);
        sweep.delta.push(eq.delta);
        sweep.minimum_viable_stake.push(eq.minimum_viable_stake);
        sweep.expected_fraud_rate.push(eq.expected_fraud_rate);
        sweep.expected_provider_utility.push(eq.expected_provider_utility);
        sweep.expected_client_utility.push(eq.expected_client_utility);
    }
    sweep
}

/// Evenly spaced values from `from` to `to` inclusive.
pub fn linspace(from: f64, to: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![from],
        _ => {
            let step = (to - from) / (steps - 1) as f64;
            (0..steps).map(|i| from + step * i as f64).collect()
        }
    }
}

/// One payment level's minimum stake and the equilibrium it supports.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StakeThreshold {
    pub payment: f64,
    pub minimum_viable_stake: StakeRequirement,
    /// Zero when no positive stake is required.
    pub q_star_at_min: f64,
    pub v_star_at_min: f64,
}

pub fn stake_thresholds(
    protocol: &ProtocolParameters,
    payments: &[f64],
    loss: f64,
) -> Vec<StakeThreshold> {
    payments
        .iter()
        .map(|&payment| {
            let minimum = protocol.minimum_viable_stake(payment);
            let (q_star_at_min, v_star_at_min) = match minimum {
                StakeRequirement::Finite(stake) if stake > 0.0 => {
                    let eq = compute_theoretical_equilibrium(protocol, payment, stake, loss);
                    (eq.q_star, eq.v_star)
                }
                _ => (0.0, 0.0),
            };
            StakeThreshold {
                payment,
                minimum_viable_stake: minimum,
                q_star_at_min,
                v_star_at_min,
            }
        })
        .collect()
}

/// Attacks with a closed-form profitability estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitabilityModel {
    ReputationFarming,
    NoStakeFloor,
    Censorship,
}

/// Audit discount a farmed reputation is assumed to buy.
const FARMED_AUDIT_DISCOUNT: f64 = 0.5;
/// Honest jobs spent building reputation before exploiting it.
const FARMING_JOBS: f64 = 20.0;
/// Jobs the farmed reputation is exploited over.
const EXPLOIT_JOBS: f64 = 5.0;
/// Stake an attacker posts when there is no floor.
const FLOORLESS_STAKE: f64 = 1.0;
/// Share of enforcement a censor removes.
const CENSORED_SHARE: f64 = 0.3;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "attack", rename_all = "snake_case")]
pub enum AttackProfitability {
    ReputationFarming {
        cheat_profit: f64,
        honest_profit: f64,
        attack_advantage: f64,
        farming_cost: f64,
        net_attack_profit: f64,
    },
    NoStakeFloor {
        cheat_profit: f64,
        honest_profit: f64,
        attack_advantage: f64,
        minimum_viable_stake: StakeRequirement,
        disputing_viable: bool,
    },
    Censorship {
        original_q_star: f64,
        new_q_star: f64,
        fraud_rate_increase: f64,
        original_delta: f64,
        new_delta: f64,
    },
}

pub fn attack_profitability(
    protocol: &ProtocolParameters,
    payment: f64,
    stake: f64,
    loss: f64,
    model: ProfitabilityModel,
) -> AttackProfitability {
    let eq = compute_theoretical_equilibrium(protocol, payment, stake, loss);
    let honest_profit = payment - protocol.honest_cost;

    match model {
        ProfitabilityModel::ReputationFarming => {
            let reduced_audit = eq.v_star * FARMED_AUDIT_DISCOUNT;
            let cheat_profit = payment - protocol.cheat_cost - reduced_audit * (payment + stake);
            let farming_cost = protocol.honest_cost * FARMING_JOBS;
            AttackProfitability::ReputationFarming {
                cheat_profit,
                honest_profit,
                attack_advantage: cheat_profit - honest_profit,
                farming_cost,
                net_attack_profit: cheat_profit - honest_profit - farming_cost / EXPLOIT_JOBS,
            }
        }
        ProfitabilityModel::NoStakeFloor => {
            let minimum = protocol.minimum_viable_stake(payment);
            let disputing_viable = minimum.is_met_by(FLOORLESS_STAKE);
            let cheat_profit = if disputing_viable {
                payment - protocol.cheat_cost - eq.v_star * (payment + FLOORLESS_STAKE)
            } else {
                payment - protocol.cheat_cost
            };
            AttackProfitability::NoStakeFloor {
                cheat_profit,
                honest_profit,
                attack_advantage: cheat_profit - honest_profit,
                minimum_viable_stake: minimum,
                disputing_viable,
            }
        }
        ProfitabilityModel::Censorship => {
            let censored = protocol
                .clone()
                .with_enforcement_reliability(protocol.enforcement_reliability * (1.0 - CENSORED_SHARE));
            let new_delta = censored.net_dispute_surplus(stake, payment);
            let new_q_star = censored.equilibrium_cheat_probability(stake, payment, loss);
            AttackProfitability::Censorship {
                original_q_star: eq.q_star,
                new_q_star,
                fraud_rate_increase: new_q_star - eq.q_star,
                original_delta: eq.delta,
                new_delta,
            }
        }
    }
}

/// Welfare of a finished run, split by role.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WelfareMetrics {
    pub total_welfare: f64,
    pub provider_welfare: f64,
    pub client_welfare: f64,
    pub challenger_welfare: f64,
    pub mean_provider_profit: f64,
    pub std_provider_profit: f64,
    /// Gini coefficient of provider profits.
    pub gini_coefficient: f64,
    pub fraud_rate: f64,
    pub mean_client_loss: f64,
}

impl WelfareMetrics {
    pub fn compute(
        provider_profits: &BTreeMap<AgentId, f64>,
        client_losses: &BTreeMap<AgentId, f64>,
        challenger_profits: &BTreeMap<AgentId, f64>,
        frauds: u64,
        jobs: u64,
    ) -> Self {
        let profits: Vec<f64> = provider_profits.values().copied().collect();
        let provider_welfare: f64 = profits.iter().sum();
        let client_welfare = -client_losses.values().sum::<f64>();
        let challenger_welfare: f64 = challenger_profits.values().sum();
        let (mean_provider_profit, std_provider_profit) = mean_std(&profits);
        let mean_client_loss = if client_losses.is_empty() {
            0.0
        } else {
            -client_welfare / client_losses.len() as f64
        };

        Self {
            total_welfare: provider_welfare + client_welfare + challenger_welfare,
            provider_welfare,
            client_welfare,
            challenger_welfare,
            mean_provider_profit,
            std_provider_profit,
            gini_coefficient: calculate_gini(&profits),
            fraud_rate: if jobs > 0 {
                frauds as f64 / jobs as f64
            } else {
                0.0
            },
            mean_client_loss,
        }
    }
}

/// Population mean and standard deviation; zeros for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Gini coefficient of a set of values.
///
/// Returns 0.0 for fewer than two values or a non-positive total, since the
/// coefficient is undefined once losses outweigh gains.
pub fn calculate_gini(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    // G = (2 * Σ(i * x_i) - (n + 1) * Σx_i) / (n * Σx_i)
    let sum_indexed: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, &x)| (i as f64 + 1.0) * x)
        .sum();

    let numerator = 2.0 * sum_indexed - (n as f64 + 1.0) * total;
    let denominator = n as f64 * total;

    (numerator / denominator).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equilibrium_reference_point() {
        let protocol = ProtocolParameters::default();
        let eq = compute_theoretical_equilibrium(&protocol, 50.0, 100.0, 50.0);

        assert!((eq.v_star - 0.03).abs() < 1e-12);
        assert!((eq.delta - 91.75).abs() < 1e-9);
        assert_eq!(format!("{:.4}", eq.q_star), "0.0564");
        assert_eq!(eq.theta, eq.v_star);
        assert!(eq.enforcement_viable);
        assert!(eq.incentive_compatible);
        assert_eq!(eq.expected_provider_utility, 45.0);
        assert_eq!(eq.expected_detection_rate, eq.v_star);
    }

    #[test]
    fn test_equilibrium_serializes_unenforceable_as_null() {
        let protocol = ProtocolParameters::default().with_enforcement_reliability(0.0);
        let eq = compute_theoretical_equilibrium(&protocol, 50.0, 100.0, 50.0);
        assert!(!eq.enforcement_viable);

        let json = serde_json::to_value(&eq).unwrap();
        assert!(json["minimum_viable_stake"].is_null());
    }

    #[test]
    fn test_sensitivity_tracks_parameter() {
        let protocol = ProtocolParameters::default();
        let values = linspace(0.5, 1.0, 6);
        let sweep = parameter_sensitivity(
            &protocol,
            ProtocolField::EnforcementReliability,
            &values,
            50.0,
            100.0,
            50.0,
        );

        assert_eq!(sweep.parameter, "enforcement_reliability");
        assert_eq!(sweep.q_star.len(), 6);
        // Better enforcement raises Δ and lowers q*.
        for pair in sweep.delta.windows(2) {
            assert!(pair[1] > pair[0], "delta not increasing: {:?}", sweep.delta);
        }
        for pair in sweep.q_star.windows(2) {
            assert!(pair[1] < pair[0], "q* not decreasing: {:?}", sweep.q_star);
        }
        // v* does not depend on p_w.
        assert!(sweep.v_star.iter().all(|v| (v - 0.03).abs() < 1e-12));
    }

    #[test]
    fn test_linspace_endpoints() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
        let v = linspace(0.0, 1.0, 5);
        assert_eq!(v.len(), 5);
        assert_eq!(v[0], 0.0);
        assert!((v[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_stake_thresholds_fall_with_payment() {
        let protocol = ProtocolParameters::default();
        let rows = stake_thresholds(&protocol, &[1.0, 5.0, 50.0], 50.0);

        let first = rows[0].minimum_viable_stake.as_f64();
        let second = rows[1].minimum_viable_stake.as_f64();
        assert!(first > second, "{} vs {}", first, second);
        assert!(rows[0].q_star_at_min > 0.0);

        // At P = 50 the payment share alone covers the dispute.
        assert_eq!(rows[2].minimum_viable_stake, StakeRequirement::Finite(0.0));
        assert_eq!(rows[2].q_star_at_min, 0.0);
    }

    #[test]
    fn test_farming_advantage_positive() {
        let protocol = ProtocolParameters::default();
        match attack_profitability(&protocol, 50.0, 100.0, 50.0, ProfitabilityModel::ReputationFarming) {
            AttackProfitability::ReputationFarming {
                attack_advantage,
                farming_cost,
                ..
            } => {
                // 4.5 saved minus 0.015 * 150 of expected slashing.
                assert!((attack_advantage - 2.25).abs() < 1e-9);
                assert_eq!(farming_cost, 100.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_stake_floor_unviable_dispute() {
        let protocol = ProtocolParameters::default();
        match attack_profitability(&protocol, 5.0, 100.0, 50.0, ProfitabilityModel::NoStakeFloor) {
            AttackProfitability::NoStakeFloor {
                cheat_profit,
                disputing_viable,
                ..
            } => {
                assert!(!disputing_viable);
                assert_eq!(cheat_profit, 4.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_censorship_raises_fraud() {
        let protocol = ProtocolParameters::default();
        match attack_profitability(&protocol, 50.0, 100.0, 50.0, ProfitabilityModel::Censorship) {
            AttackProfitability::Censorship {
                fraud_rate_increase,
                new_delta,
                original_delta,
                ..
            } => {
                assert!(fraud_rate_increase > 0.0);
                assert!(new_delta < original_delta);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_gini_bounds() {
        assert_eq!(calculate_gini(&[]), 0.0);
        assert_eq!(calculate_gini(&[5.0]), 0.0);
        assert!(calculate_gini(&[10.0, 10.0, 10.0]).abs() < 1e-12);
        let skewed = calculate_gini(&[0.0, 0.0, 0.0, 100.0]);
        assert!((skewed - 0.75).abs() < 1e-12, "gini {}", skewed);
        assert_eq!(calculate_gini(&[-10.0, 5.0]), 0.0);
    }

    #[test]
    fn test_welfare_sums_roles() {
        let providers: BTreeMap<AgentId, f64> =
            [(AgentId::from("P_H_0"), 30.0), (AgentId::from("P_H_1"), 10.0)].into();
        let clients: BTreeMap<AgentId, f64> = [(AgentId::from("C_MS_0"), 12.0)].into();
        let challengers: BTreeMap<AgentId, f64> = [(AgentId::from("CH_0"), -2.0)].into();

        let welfare = WelfareMetrics::compute(&providers, &clients, &challengers, 1, 4);
        assert_eq!(welfare.provider_welfare, 40.0);
        assert_eq!(welfare.client_welfare, -12.0);
        assert_eq!(welfare.total_welfare, 26.0);
        assert_eq!(welfare.mean_provider_profit, 20.0);
        assert_eq!(welfare.std_provider_profit, 10.0);
        assert_eq!(welfare.fraud_rate, 0.25);
        assert_eq!(welfare.mean_client_loss, 12.0);
    }
}
