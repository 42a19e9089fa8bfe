//! Multi-run experiments: seed batches, simulated parameter sweeps and the
//! equilibrium convergence study.
//!
//! Runs are independent, so batches fan out over rayon. Results always come
//! back in seed order.

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::analysis::mean_std;
use crate::config::{ClientMix, ConfigError, ProviderMix, SimulationConfig};
use crate::protocol::ProtocolField;
use crate::simulation::{ClientKind, ProviderKind, SimulationEngine, SimulationResult};

/// Default tolerance between simulated fraud and `q*`.
pub const CONVERGENCE_TOLERANCE: f64 = 0.05;

/// Run `config` once per seed. Output order follows `seeds`.
pub fn run_seeds(
    config: &SimulationConfig,
    seeds: &[u64],
) -> Result<Vec<SimulationResult>, ConfigError> {
    run_seeds_with(config, seeds, |_| {})
}

/// As [`run_seeds`], calling `on_done` as each run finishes. Completion
/// order is not seed order.
pub fn run_seeds_with<F>(
    config: &SimulationConfig,
    seeds: &[u64],
    on_done: F,
) -> Result<Vec<SimulationResult>, ConfigError>
where
    F: Fn(&SimulationResult) + Sync,
{
    seeds
        .par_iter()
        .map(|&seed| {
            let result = SimulationEngine::new(config.clone().with_seed(seed))?.run();
            on_done(&result);
            Ok(result)
        })
        .collect()
}

/// `n` consecutive seeds starting at `first`.
pub fn seed_range(first: u64, n: usize) -> Vec<u64> {
    (0..n as u64).map(|i| first.wrapping_add(i)).collect()
}

/// Summary statistics of one metric across runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Stat {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Stat {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let (mean, std) = mean_std(values);
        Self {
            mean,
            std,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Aggregate of a seed batch.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchSummary {
    pub runs: usize,
    pub seeds: Vec<u64>,
    pub fraud_rate: Stat,
    pub detection_rate: Stat,
    pub stake_slashed: Stat,
    pub social_welfare: Stat,
    /// Per-period fraud rate averaged over runs.
    pub fraud_rate_history: Vec<f64>,
    pub detection_rate_history: Vec<f64>,
    /// Mean closed-form `q*` across runs.
    pub q_star_theoretical: f64,
    pub v_star_theoretical: f64,
    /// `|mean fraud rate - q*|`.
    pub deviation: f64,
}

impl BatchSummary {
    pub fn from_results(results: &[SimulationResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }
        let collect = |f: fn(&SimulationResult) -> f64| results.iter().map(f).collect::<Vec<f64>>();

        let fraud_rate = Stat::from_values(&collect(|r| r.fraud_rate));
        let q_star_theoretical =
            results.iter().map(|r| r.theoretical.q_star).sum::<f64>() / results.len() as f64;
        let v_star_theoretical =
            results.iter().map(|r| r.theoretical.v_star).sum::<f64>() / results.len() as f64;

        Self {
            runs: results.len(),
            seeds: results.iter().map(|r| r.seed).collect(),
            detection_rate: Stat::from_values(&collect(|r| r.detection_rate)),
            stake_slashed: Stat::from_values(&collect(|r| r.totals.stake_slashed)),
            social_welfare: Stat::from_values(&collect(|r| r.social_welfare())),
            fraud_rate_history: average_series(results.iter().map(|r| &r.history.fraud_rate[..])),
            detection_rate_history: average_series(
                results.iter().map(|r| &r.history.detection_rate[..]),
            ),
            q_star_theoretical,
            v_star_theoretical,
            deviation: (fraud_rate.mean - q_star_theoretical).abs(),
            fraud_rate,
        }
    }
}

/// Element-wise mean, truncated to the shortest series.
fn average_series<'a>(series: impl Iterator<Item = &'a [f64]>) -> Vec<f64> {
    let series: Vec<&[f64]> = series.collect();
    let Some(len) = series.iter().map(|s| s.len()).min() else {
        return Vec::new();
    };
    (0..len)
        .map(|i| series.iter().map(|s| s[i]).sum::<f64>() / series.len() as f64)
        .collect()
}

/// Run `n_runs` seeds from `config.seed` and summarize them.
pub fn run_batch(config: &SimulationConfig, n_runs: usize) -> Result<BatchSummary, ConfigError> {
    let seeds = seed_range(config.seed, n_runs);
    info!("Running batch of {} seeds from {}", n_runs, config.seed);
    let results = run_seeds(config, &seeds)?;
    Ok(BatchSummary::from_results(&results))
}

/// Simulated outcome at one value of a swept parameter.
#[derive(Clone, Debug, Serialize)]
pub struct SweepPoint {
    pub value: f64,
    pub fraud_rate_mean: f64,
    pub fraud_rate_std: f64,
    pub detection_rate_mean: f64,
    pub welfare_mean: f64,
}

/// Sweep one protocol field, simulating `n_runs` seeds at each value.
pub fn run_parameter_sweep(
    base: &SimulationConfig,
    parameter: ProtocolField,
    values: &[f64],
    n_runs: usize,
) -> Result<Vec<SweepPoint>, ConfigError> {
    let seeds = seed_range(base.seed, n_runs);
    values
        .iter()
        .map(|&value| {
            let config = base
                .clone()
                .with_protocol(base.protocol.with_field(parameter, value));
            let summary = BatchSummary::from_results(&run_seeds(&config, &seeds)?);
            info!(
                "{}={:.3}: fraud rate {:.4}",
                parameter, value, summary.fraud_rate.mean
            );
            Ok(SweepPoint {
                value,
                fraud_rate_mean: summary.fraud_rate.mean,
                fraud_rate_std: summary.fraud_rate.std,
                detection_rate_mean: summary.detection_rate.mean,
                welfare_mean: summary.social_welfare.mean,
            })
        })
        .collect()
}

/// Rational providers against equilibrium-auditing clients, at least at the
/// scale where the mixed equilibrium is measurable.
pub fn convergence_config(base: &SimulationConfig) -> SimulationConfig {
    base.clone()
        .with_provider_mix(ProviderMix::only(ProviderKind::Rational))
        .with_client_mix(ClientMix::only(ClientKind::MixedEquilibrium))
        .with_population(
            base.n_providers.max(50),
            base.n_clients.max(100),
            base.n_challengers,
        )
        .with_periods(base.n_periods.max(500))
        .with_watchers(false)
}

#[derive(Clone, Debug, Serialize)]
pub struct ConvergenceReport {
    pub tolerance: f64,
    pub summary: BatchSummary,
    /// `|fraud rate - q*|` per run, in seed order.
    pub deviations: Vec<f64>,
    pub within_tolerance: usize,
}

impl ConvergenceReport {
    /// Every run landed within tolerance of its closed-form `q*`.
    pub fn converged(&self) -> bool {
        self.within_tolerance == self.deviations.len()
    }
}

/// Measure how closely the simulated fraud rate tracks `q*` across seeds.
pub fn run_convergence(
    base: &SimulationConfig,
    n_runs: usize,
    tolerance: f64,
) -> Result<ConvergenceReport, ConfigError> {
    let config = convergence_config(base);
    let results = run_seeds(&config, &seed_range(config.seed, n_runs))?;
    let deviations: Vec<f64> = results
        .iter()
        .map(|r| r.deviation_from_theory().abs())
        .collect();
    let within_tolerance = deviations.iter().filter(|d| **d <= tolerance).count();

    Ok(ConvergenceReport {
        tolerance,
        summary: BatchSummary::from_results(&results),
        deviations,
        within_tolerance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulationConfig {
        SimulationConfig::baseline()
            .with_population(10, 20, 2)
            .with_jobs_per_period(5)
            .with_periods(15)
    }

    #[test]
    fn test_stat_from_values() {
        let stat = Stat::from_values(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stat.mean, 2.5);
        assert_eq!(stat.min, 1.0);
        assert_eq!(stat.max, 4.0);
        assert!((stat.std - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(Stat::from_values(&[]), Stat::default());
    }

    #[test]
    fn test_average_series_truncates() {
        let a = [1.0, 2.0, 3.0];
        let b = [3.0, 4.0];
        assert_eq!(average_series([&a[..], &b[..]].into_iter()), vec![2.0, 3.0]);
        assert!(average_series(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_run_seeds_preserves_order() {
        let seeds = [7, 3, 11];
        let results = run_seeds(&small(), &seeds).unwrap();
        let got: Vec<u64> = results.iter().map(|r| r.seed).collect();
        assert_eq!(got, seeds.to_vec());
    }

    #[test]
    fn test_run_seeds_with_reports_every_run() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let done = AtomicUsize::new(0);
        let results = run_seeds_with(&small(), &[1, 2, 3, 4], |_| {
            done.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(done.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_batch_matches_sequential_runs() {
        let config = small().with_seed(100);
        let summary = run_batch(&config, 3).unwrap();
        assert_eq!(summary.seeds, vec![100, 101, 102]);

        let sequential: Vec<f64> = (100..103)
            .map(|seed| {
                SimulationEngine::new(config.clone().with_seed(seed))
                    .unwrap()
                    .run()
                    .fraud_rate
            })
            .collect();
        let (mean, _) = mean_std(&sequential);
        assert_eq!(summary.fraud_rate.mean, mean);
        assert_eq!(summary.fraud_rate_history.len(), 15);
    }

    #[test]
    fn test_convergence_config_scales_up() {
        let config = convergence_config(&small());
        assert_eq!(config.n_providers, 50);
        assert_eq!(config.n_clients, 100);
        assert_eq!(config.n_periods, 500);
        assert_eq!(config.provider_mix, ProviderMix::only(ProviderKind::Rational));
    }

    #[test]
    fn test_parameter_sweep_one_point_per_value() {
        let points =
            run_parameter_sweep(&small(), ProtocolField::ChallengeBond, &[1.0, 10.0], 2).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].value, 10.0);
        assert!(points.iter().all(|p| (0.0..=1.0).contains(&p.fraud_rate_mean)));
    }
}
