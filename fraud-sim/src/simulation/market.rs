//! Job generation and client/provider matching.

use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Exp, LogNormal, Normal, Uniform};
use serde::Serialize;

use crate::config::{ConfigError, JobValueModel, MatchingPolicy, ValueDistribution};
use crate::protocol::ProtocolParameters;

use super::agent::AgentId;
use super::job::{Job, JobId};

/// Softmax temperature for reputation-weighted matching.
pub const REPUTATION_TEMPERATURE: f64 = 20.0;

/// Smallest payment a job can carry.
pub const MIN_JOB_VALUE: f64 = 1.0;

/// A provider the market may pick for a job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Index of the provider in the engine's provider list.
    pub index: usize,
    pub reputation: f64,
    pub stake_capacity: f64,
}

/// A client that can post jobs this period.
#[derive(Clone, Debug)]
pub struct ClientSlot {
    pub index: usize,
    pub id: AgentId,
}

/// Counters kept by the market across a run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MarketState {
    pub period: u64,
    pub jobs_created: u64,
    pub jobs_matched: u64,
    pub jobs_unmatched: u64,
    pub jobs_per_period: Vec<usize>,
}

#[derive(Clone, Debug)]
enum ValueSampler {
    Constant(f64),
    LogNormal(LogNormal<f64>),
    Uniform(Uniform<f64>),
    Exponential(Exp<f64>),
}

impl ValueSampler {
    fn new(model: &JobValueModel) -> Result<Self, ConfigError> {
        let invalid = |e: rand_distr::NormalError| ConfigError::InvalidDistribution(e.to_string());
        match model.distribution {
            ValueDistribution::LogNormal => {
                let cv2 = (model.std / model.mean).powi(2);
                let sigma2 = (1.0 + cv2).ln();
                let mu = model.mean.ln() - 0.5 * sigma2;
                LogNormal::new(mu, sigma2.sqrt())
                    .map(ValueSampler::LogNormal)
                    .map_err(invalid)
            }
            ValueDistribution::Uniform if model.std > 0.0 => Ok(ValueSampler::Uniform(
                Uniform::new(model.mean - model.std, model.mean + model.std),
            )),
            ValueDistribution::Uniform => Ok(ValueSampler::Constant(model.mean)),
            ValueDistribution::Exponential => Exp::new(1.0 / model.mean)
                .map(ValueSampler::Exponential)
                .map_err(|e| ConfigError::InvalidDistribution(e.to_string())),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            ValueSampler::Constant(v) => *v,
            ValueSampler::LogNormal(d) => d.sample(rng),
            ValueSampler::Uniform(d) => d.sample(rng),
            ValueSampler::Exponential(d) => d.sample(rng),
        }
    }
}

/// Creates each period's jobs and assigns them to providers.
#[derive(Clone, Debug)]
pub struct Market {
    values: ValueSampler,
    base_loss: f64,
    loss_noise: Normal<f64>,
    matching: MatchingPolicy,
    next_job_id: u64,
    pub state: MarketState,
}

impl Market {
    pub fn new(
        protocol: &ProtocolParameters,
        values: &JobValueModel,
        matching: MatchingPolicy,
    ) -> Result<Self, ConfigError> {
        let loss_noise = Normal::new(0.0, protocol.loss_variance)
            .map_err(|e| ConfigError::InvalidDistribution(e.to_string()))?;
        Ok(Self {
            values: ValueSampler::new(values)?,
            base_loss: protocol.base_loss,
            loss_noise,
            matching,
            next_job_id: 0,
            state: MarketState::default(),
        })
    }

    pub fn matching(&self) -> &MatchingPolicy {
        &self.matching
    }

    /// Draw `n_jobs` jobs from uniformly chosen clients.
    ///
    /// Payments are floored at [`MIN_JOB_VALUE`]; the loss from an incorrect
    /// result is `L_base + N(0, L_variance)` but never less than half the
    /// payment.
    pub fn generate_jobs<R: Rng + ?Sized>(
        &mut self,
        period: u64,
        n_jobs: usize,
        clients: &[ClientSlot],
        rng: &mut R,
    ) -> Vec<Job> {
        if clients.is_empty() {
            return Vec::new();
        }
        let mut jobs = Vec::with_capacity(n_jobs);
        for _ in 0..n_jobs {
            let client = &clients[rng.gen_range(0..clients.len())];
            let value = self.values.sample(rng).max(MIN_JOB_VALUE);
            let loss = (self.base_loss + self.loss_noise.sample(rng)).max(0.5 * value);

            jobs.push(Job::new(
                JobId(self.next_job_id),
                period,
                client.index,
                client.id.clone(),
                value,
                loss,
            ));
            self.next_job_id += 1;
        }
        self.state.jobs_created += jobs.len() as u64;
        jobs
    }

    /// Pick a provider for a job, returning a position in `candidates`.
    pub fn match_provider<R: Rng + ?Sized>(
        &mut self,
        candidates: &[Candidate],
        rng: &mut R,
    ) -> Option<usize> {
        if candidates.is_empty() {
            self.state.jobs_unmatched += 1;
            return None;
        }
        let weights = match self.matching {
            MatchingPolicy::Random => None,
            MatchingPolicy::ReputationWeighted => Some(reputation_weights(candidates)),
            MatchingPolicy::StakeWeighted => stake_weights(candidates),
            MatchingPolicy::Mixed {
                reputation_weight,
                stake_weight,
            } => Some(mixed_weights(candidates, reputation_weight, stake_weight)),
        };
        let picked = match weights.and_then(|w| WeightedIndex::new(&w).ok()) {
            Some(dist) => dist.sample(rng),
            None => rng.gen_range(0..candidates.len()),
        };
        self.state.jobs_matched += 1;
        Some(picked)
    }

    pub fn record_period(&mut self, jobs: usize) {
        self.state.period += 1;
        self.state.jobs_per_period.push(jobs);
    }
}

/// Normalized softmax of reputation at temperature 20.
pub fn reputation_weights(candidates: &[Candidate]) -> Vec<f64> {
    let max = candidates
        .iter()
        .map(|c| c.reputation)
        .fold(f64::NEG_INFINITY, f64::max);
    let raw: Vec<f64> = candidates
        .iter()
        .map(|c| ((c.reputation - max) / REPUTATION_TEMPERATURE).exp())
        .collect();
    normalize(raw)
}

/// Normalized stake capacities, or `None` when every capacity is zero.
pub fn stake_weights(candidates: &[Candidate]) -> Option<Vec<f64>> {
    let raw: Vec<f64> = candidates.iter().map(|c| c.stake_capacity.max(0.0)).collect();
    if raw.iter().sum::<f64>() > 0.0 {
        Some(normalize(raw))
    } else {
        None
    }
}

/// `a·softmax(reputation) + b·(stake + 1)/Σ`, normalized.
pub fn mixed_weights(candidates: &[Candidate], reputation_weight: f64, stake_weight: f64) -> Vec<f64> {
    let reputation = reputation_weights(candidates);
    let stake = normalize(
        candidates
            .iter()
            .map(|c| c.stake_capacity.max(0.0) + 1.0)
            .collect(),
    );
    normalize(
        reputation
            .iter()
            .zip(&stake)
            .map(|(r, s)| reputation_weight * r + stake_weight * s)
            .collect(),
    )
}

fn normalize(mut weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 && total.is_finite() {
        for w in &mut weights {
            *w /= total;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn clients(n: usize) -> Vec<ClientSlot> {
        (0..n)
            .map(|i| ClientSlot {
                index: i,
                id: AgentId::new(format!("C_MS_{}", i)),
            })
            .collect()
    }

    fn candidates(reputations: &[f64]) -> Vec<Candidate> {
        reputations
            .iter()
            .enumerate()
            .map(|(index, &reputation)| Candidate {
                index,
                reputation,
                stake_capacity: 100.0,
            })
            .collect()
    }

    #[test]
    fn test_generated_jobs_respect_floors() {
        let protocol = ProtocolParameters::default();
        let model = JobValueModel {
            distribution: ValueDistribution::Exponential,
            mean: 2.0,
            std: 0.0,
        };
        let mut market = Market::new(&protocol, &model, MatchingPolicy::Random).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let jobs = market.generate_jobs(0, 500, &clients(5), &mut rng);

        assert_eq!(jobs.len(), 500);
        assert_eq!(market.state.jobs_created, 500);
        for job in &jobs {
            assert!(job.value >= MIN_JOB_VALUE);
            assert!(job.loss_if_incorrect >= 0.5 * job.value);
            assert!(job.client_index < 5);
        }
        let ids: std::collections::BTreeSet<_> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids.len(), 500, "job ids are unique");
    }

    #[test]
    fn test_lognormal_mean_matches() {
        let protocol = ProtocolParameters::default();
        let mut market =
            Market::new(&protocol, &JobValueModel::default(), MatchingPolicy::Random).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let jobs = market.generate_jobs(0, 20_000, &clients(3), &mut rng);
        let mean = jobs.iter().map(|j| j.value).sum::<f64>() / jobs.len() as f64;
        assert!((mean - 50.0).abs() < 1.5, "mean job value {}", mean);
    }

    #[test]
    fn test_no_clients_no_jobs() {
        let protocol = ProtocolParameters::default();
        let mut market =
            Market::new(&protocol, &JobValueModel::default(), MatchingPolicy::Random).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(market.generate_jobs(0, 10, &[], &mut rng).is_empty());
    }

    #[test]
    fn test_empty_candidates_unmatched() {
        let protocol = ProtocolParameters::default();
        let mut market =
            Market::new(&protocol, &JobValueModel::default(), MatchingPolicy::mixed()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert_eq!(market.match_provider(&[], &mut rng), None);
        assert_eq!(market.state.jobs_unmatched, 1);
    }

    #[test]
    fn test_reputation_weighting_prefers_reputable() {
        let protocol = ProtocolParameters::default();
        let mut market = Market::new(
            &protocol,
            &JobValueModel::default(),
            MatchingPolicy::ReputationWeighted,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let pool = candidates(&[10.0, 90.0]);
        let high = (0..5000)
            .filter(|_| market.match_provider(&pool, &mut rng) == Some(1))
            .count();
        // e^{80/20} : 1, so about 98% of jobs go to the reputable provider.
        assert!(high > 4700, "reputable provider won {} of 5000", high);
    }

    #[test]
    fn test_weights_are_normalized() {
        let pool = candidates(&[0.0, 50.0, 100.0]);
        for weights in [
            reputation_weights(&pool),
            mixed_weights(&pool, 0.5, 0.3),
            stake_weights(&pool).unwrap(),
        ] {
            let total: f64 = weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-12, "weights sum to {}", total);
            assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
        }
    }

    #[test]
    fn test_zero_stake_falls_back_to_uniform() {
        let pool: Vec<Candidate> = (0..4)
            .map(|index| Candidate {
                index,
                reputation: 50.0,
                stake_capacity: 0.0,
            })
            .collect();
        assert!(stake_weights(&pool).is_none());

        let protocol = ProtocolParameters::default();
        let mut market = Market::new(
            &protocol,
            &JobValueModel::default(),
            MatchingPolicy::StakeWeighted,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut seen = [false; 4];
        for _ in 0..200 {
            if let Some(i) = market.match_provider(&pool, &mut rng) {
                seen[i] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }
}
