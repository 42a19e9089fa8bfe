//! Engine-level properties checked over full runs.

use hfg_fraud_sim::{
    attacks::{AttackScenario, NoStakeFloor},
    compute_theoretical_equilibrium,
    config::{JobValueModel, ValueDistribution},
    experiments::{convergence_config, run_convergence, CONVERGENCE_TOLERANCE},
    simulation::{Agent, MAX_REPUTATION},
    ChallengerMix, ProtocolParameters, SimulationConfig, SimulationEngine,
};

fn small(config: SimulationConfig) -> SimulationConfig {
    config
        .with_population(20, 40, 6)
        .with_jobs_per_period(10)
        .with_periods(100)
}

#[test]
fn test_same_seed_same_result() {
    let config = small(SimulationConfig::adversarial_heavy()).with_seed(9);
    let a = SimulationEngine::new(config.clone()).unwrap().run();
    let b = SimulationEngine::new(config).unwrap().run();
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn test_different_seeds_diverge() {
    let config = small(SimulationConfig::baseline());
    let a = SimulationEngine::new(config.clone().with_seed(1)).unwrap().run();
    let b = SimulationEngine::new(config.with_seed(2)).unwrap().run();
    assert_ne!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn test_ledger_and_reputation_invariants_hold_every_period() {
    let mut config = small(SimulationConfig::adversarial_heavy()).with_watchers(true);
    config.challenger_mix = ChallengerMix {
        permissionless: 0.5,
        griefing: 0.5,
    };
    let mut engine = SimulationEngine::new(config).unwrap();

    for _ in 0..100 {
        let stats = engine.step();

        assert_eq!(
            stats.jobs_generated,
            stats.jobs_unmatched + stats.jobs_unexecuted + stats.jobs_executed
        );
        assert!(stats.frauds <= stats.jobs_executed);
        assert!(stats.frauds_detected <= stats.frauds);
        assert!(stats.disputes_successful <= stats.disputes);
        assert!(stats.stake_slashed <= stats.stake_volume + 1e-9);
        assert!((0.0..=1.0).contains(&stats.fraud_rate()));
        assert!((0.0..=1.0).contains(&stats.detection_rate()));

        for provider in engine.providers() {
            let state = provider.state();
            assert!(state.balance() >= 0.0, "{} overdrawn", provider.id());
            assert_eq!(state.locked_stake(), 0.0, "stake left locked after settlement");
            assert!((0.0..=MAX_REPUTATION).contains(&provider.reputation()));
        }
        for client in engine.clients() {
            assert!(client.balance() >= 0.0, "{} overdrawn", client.id());
        }
        for challenger in engine.challengers() {
            assert!(challenger.balance() >= 0.0, "{} overdrawn", challenger.id());
        }
        for (_, record) in engine.reputation_system().records() {
            assert!((0.0..=MAX_REPUTATION).contains(&record.score));
        }
    }

    for provider in engine.providers() {
        assert_eq!(provider.state().balance_history().len(), 100);
        assert_eq!(provider.state().reputation_history().len(), 100);
    }
}

#[test]
fn test_run_level_rates_are_probabilities() {
    let result = SimulationEngine::new(small(SimulationConfig::weak_enforcement()))
        .unwrap()
        .run();
    for rate in [result.fraud_rate, result.detection_rate, result.dispute_success_rate] {
        assert!((0.0..=1.0).contains(&rate), "rate {} out of range", rate);
    }
    assert_eq!(result.history.len(), 100);
    assert!(result
        .final_reputations
        .values()
        .all(|r| (0.0..=MAX_REPUTATION).contains(r)));
}

#[test]
fn test_no_fraud_means_full_detection() {
    let config = small(SimulationConfig::baseline()).with_provider_mix(
        hfg_fraud_sim::ProviderMix::only(hfg_fraud_sim::simulation::ProviderKind::Honest),
    );
    let result = SimulationEngine::new(config).unwrap().run();
    assert_eq!(result.totals.frauds, 0);
    assert_eq!(result.detection_rate, 1.0);
    assert!(result.history.detection_rate.iter().all(|d| *d == 1.0));
}

#[test]
fn test_reference_equilibrium() {
    let eq = compute_theoretical_equilibrium(&ProtocolParameters::default(), 50.0, 100.0, 50.0);
    assert!((eq.v_star - 0.03).abs() < 1e-12);
    assert!((eq.delta - 91.75).abs() < 1e-9);
    assert_eq!((eq.q_star * 10_000.0).round() / 10_000.0, 0.0564);
}

#[test]
fn test_rational_providers_stay_honest_without_reputation_discount() {
    // Every estimate sits exactly on the threshold, which is honest.
    let mut base = SimulationConfig::baseline();
    base.reputation.prior_sensitivity = 0.0;
    let report = run_convergence(&base, 2, CONVERGENCE_TOLERANCE).unwrap();

    assert_eq!(report.summary.fraud_rate.max, 0.0);
    assert_eq!(report.deviations.len(), 2);
    assert!(report.deviations.iter().all(|d| *d > 0.0));
}

#[test]
fn test_reputation_discount_drives_rational_cheating() {
    let discounted = SimulationEngine::new(convergence_config(&SimulationConfig::baseline()))
        .unwrap()
        .run();
    assert!(discounted.totals.frauds > 0);
    assert!(discounted.fraud_rate > 0.0);
    assert!(discounted.totals.frauds_detected <= discounted.totals.frauds);
}

#[test]
fn test_dropping_the_stake_floor_never_lowers_fraud() {
    // Cheap jobs, so that a stake of 1 is below the viable dispute stake.
    let mut base = small(SimulationConfig::baseline()).with_periods(200);
    base.job_values = JobValueModel {
        distribution: ValueDistribution::Uniform,
        mean: 5.0,
        std: 1.0,
    };
    assert!(base.protocol.minimum_viable_stake(5.0).as_f64() > 1.0);

    let result = NoStakeFloor::new(base).run(200).unwrap();
    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    assert!(
        mean(&result.attack.history.fraud_rate) >= mean(&result.baseline.history.fraud_rate),
        "attack {} < baseline {}",
        result.attack.fraud_rate,
        result.baseline.fraud_rate
    );
}
