//! On-chain reputation and the heuristics that watch it.
//!
//! A provider's score starts at 50 and lives in [0, 100]. Honest jobs earn a
//! stake-weighted gain, proven fraud costs a flat penalty, and every period
//! the score decays towards zero before a small seniority bonus is added.
//! Fraud that nobody proves is indistinguishable from honest work here.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::ReputationParameters;

use super::agent::{AgentId, INITIAL_REPUTATION, MAX_REPUTATION};

/// Prior that a provider cheats, `base·exp(-sensitivity·(ρ - 50))`.
///
/// Higher reputation lowers the prior. Any client that trusts this number
/// can be exploited by a provider that farms reputation first.
pub fn reputation_prior(reputation: f64, base: f64, sensitivity: f64) -> f64 {
    base * (-sensitivity * (reputation - INITIAL_REPUTATION)).exp()
}

/// One provider's reputation history.
#[derive(Clone, Debug, Serialize)]
pub struct ReputationRecord {
    pub score: f64,
    pub total_jobs: u64,
    pub honest_jobs: u64,
    pub detected_frauds: u64,
    /// Sum of `stake × job value`.
    pub stake_weighted_volume: f64,
    /// Sum of stakes, for the average-stake heuristic.
    pub total_stake: f64,
    pub time_in_system: u64,
    pub score_history: Vec<f64>,
}

impl Default for ReputationRecord {
    fn default() -> Self {
        Self {
            score: INITIAL_REPUTATION,
            total_jobs: 0,
            honest_jobs: 0,
            detected_frauds: 0,
            stake_weighted_volume: 0.0,
            total_stake: 0.0,
            time_in_system: 0,
            score_history: Vec::new(),
        }
    }
}

impl ReputationRecord {
    /// Share of jobs with proven fraud.
    pub fn fraud_rate(&self) -> f64 {
        if self.total_jobs == 0 {
            0.0
        } else {
            self.detected_frauds as f64 / self.total_jobs as f64
        }
    }

    pub fn average_stake(&self) -> f64 {
        if self.total_jobs == 0 {
            0.0
        } else {
            self.total_stake / self.total_jobs as f64
        }
    }
}

/// Aggregate view over all records.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReputationStatistics {
    pub n_providers: usize,
    pub mean_reputation: f64,
    pub std_reputation: f64,
    pub min_reputation: f64,
    pub max_reputation: f64,
    pub mean_fraud_rate: f64,
    pub total_jobs: u64,
    pub total_frauds: u64,
}

#[derive(Clone, Debug)]
pub struct ReputationSystem {
    params: ReputationParameters,
    records: BTreeMap<AgentId, ReputationRecord>,
}

impl ReputationSystem {
    pub fn new(params: ReputationParameters) -> Self {
        Self {
            params,
            records: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> &ReputationParameters {
        &self.params
    }

    pub fn register(&mut self, provider: &AgentId) {
        self.records.entry(provider.clone()).or_default();
    }

    /// Current score; unknown providers sit at the initial value.
    pub fn reputation(&self, provider: &AgentId) -> f64 {
        self.records
            .get(provider)
            .map_or(INITIAL_REPUTATION, |r| r.score)
    }

    pub fn record(&self, provider: &AgentId) -> Option<&ReputationRecord> {
        self.records.get(provider)
    }

    pub fn records(&self) -> impl Iterator<Item = (&AgentId, &ReputationRecord)> {
        self.records.iter()
    }

    /// Apply one job outcome. `honest` is false only for proven fraud.
    ///
    /// Returns the score before and after.
    pub fn record_job_outcome(
        &mut self,
        provider: &AgentId,
        honest: bool,
        stake: f64,
        job_value: f64,
    ) -> (f64, f64) {
        let params = &self.params;
        let record = self.records.entry(provider.clone()).or_default();
        let before = record.score;

        record.total_jobs += 1;
        if honest {
            record.honest_jobs += 1;
            let gain = if stake >= params.min_stake_for_reputation || !params.min_stake_enforcement {
                params.gain_honest + params.stake_weight * stake
            } else {
                0.1 * params.gain_honest
            };
            record.score = (record.score + gain).clamp(0.0, MAX_REPUTATION);
        } else {
            record.detected_frauds += 1;
            record.score = (record.score - params.loss_fraud).clamp(0.0, MAX_REPUTATION);
        }
        record.stake_weighted_volume += stake * job_value;
        record.total_stake += stake;
        record.score_history.push(record.score);

        (before, record.score)
    }

    /// Per-period decay followed by the capped seniority bonus.
    pub fn apply_time_decay(&mut self) {
        let params = &self.params;
        for record in self.records.values_mut() {
            record.score *= params.decay;
            record.time_in_system += 1;
            let bonus = params.time_weight * (record.time_in_system as f64).min(params.time_bonus_cap);
            record.score = (record.score + bonus).clamp(0.0, MAX_REPUTATION);
        }
    }

    /// Fraud prior implied by the provider's reputation.
    pub fn prior_from_reputation(&self, provider: &AgentId) -> f64 {
        reputation_prior(
            self.reputation(provider),
            self.params.prior_base,
            self.params.prior_sensitivity,
        )
    }

    /// The `n` best-reputed providers, best first. Ties keep id order.
    pub fn top_providers(&self, n: usize) -> Vec<(AgentId, f64)> {
        let mut ranked: Vec<(AgentId, f64)> = self
            .records
            .iter()
            .map(|(id, r)| (id.clone(), r.score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    /// High reputation earned on many jobs with little stake behind them.
    pub fn detect_reputation_farming(&self, provider: &AgentId) -> bool {
        let Some(record) = self.records.get(provider) else {
            return false;
        };
        record.total_jobs > self.params.farming_job_threshold
            && record.average_stake() < self.params.farming_stake_threshold
            && record.score > self.params.farming_reputation_floor
    }

    pub fn statistics(&self) -> ReputationStatistics {
        let n = self.records.len();
        if n == 0 {
            return ReputationStatistics::default();
        }
        let scores: Vec<f64> = self.records.values().map(|r| r.score).collect();
        let mean = scores.iter().sum::<f64>() / n as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;

        ReputationStatistics {
            n_providers: n,
            mean_reputation: mean,
            std_reputation: variance.sqrt(),
            min_reputation: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max_reputation: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_fraud_rate: self.records.values().map(|r| r.fraud_rate()).sum::<f64>() / n as f64,
            total_jobs: self.records.values().map(|r| r.total_jobs).sum(),
            total_frauds: self.records.values().map(|r| r.detected_frauds).sum(),
        }
    }
}

/// Evidence gathered by [`SelfBuyingDetector::detect`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SelfBuyReport {
    pub is_suspicious: bool,
    pub n_unique_clients: usize,
    pub total_jobs: u64,
    /// Share of jobs from the single most frequent client.
    pub concentration_ratio: f64,
    /// Share of jobs from clients whose id shares the provider's prefix.
    pub self_buy_ratio: f64,
}

/// Flags providers whose volume looks bought rather than earned.
#[derive(Clone, Debug)]
pub struct SelfBuyingDetector {
    min_unique_clients: usize,
    max_ratio: f64,
    prefix_len: usize,
    provider_clients: BTreeMap<AgentId, BTreeMap<AgentId, u64>>,
}

impl SelfBuyingDetector {
    pub fn new(min_unique_clients: usize, max_ratio: f64, prefix_len: usize) -> Self {
        Self {
            min_unique_clients,
            max_ratio,
            prefix_len,
            provider_clients: BTreeMap::new(),
        }
    }

    pub fn from_params(params: &ReputationParameters) -> Self {
        Self::new(
            params.self_buy_min_unique_clients,
            params.self_buy_max_ratio,
            params.self_buy_prefix_len,
        )
    }

    pub fn record_job(&mut self, provider: &AgentId, client: &AgentId) {
        *self
            .provider_clients
            .entry(provider.clone())
            .or_default()
            .entry(client.clone())
            .or_insert(0) += 1;
    }

    /// `None` for providers with no recorded jobs.
    pub fn detect(&self, provider: &AgentId) -> Option<SelfBuyReport> {
        let clients = self.provider_clients.get(provider)?;
        let total_jobs: u64 = clients.values().sum();
        if total_jobs == 0 {
            return None;
        }

        let max_jobs = clients.values().copied().max().unwrap_or(0);
        let concentration_ratio = max_jobs as f64 / total_jobs as f64;
        let related_jobs: u64 = clients
            .iter()
            .filter(|(client, _)| provider.shares_prefix(client, self.prefix_len))
            .map(|(_, &count)| count)
            .sum();
        let self_buy_ratio = related_jobs as f64 / total_jobs as f64;
        let n_unique_clients = clients.len();

        Some(SelfBuyReport {
            is_suspicious: n_unique_clients < self.min_unique_clients
                || concentration_ratio > self.max_ratio
                || self_buy_ratio > self.max_ratio,
            n_unique_clients,
            total_jobs,
            concentration_ratio,
            self_buy_ratio,
        })
    }

    pub fn providers(&self) -> impl Iterator<Item = &AgentId> {
        self.provider_clients.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AgentId {
        AgentId::new(s)
    }

    #[test]
    fn test_honest_gain_is_stake_weighted() {
        let mut system = ReputationSystem::new(ReputationParameters::default());
        let provider = id("P_H_0");
        let (before, after) = system.record_job_outcome(&provider, true, 100.0, 50.0);
        assert_eq!(before, 50.0);
        assert!((after - 52.0).abs() < 1e-12, "1 + 0.01 * 100, got {}", after);

        let (_, after_low) = system.record_job_outcome(&provider, true, 5.0, 50.0);
        assert!((after_low - 52.1).abs() < 1e-9, "low stake earns a tenth: {}", after_low);
    }

    #[test]
    fn test_unenforced_stake_floor_gives_full_gain() {
        let params = ReputationParameters {
            min_stake_enforcement: false,
            ..ReputationParameters::default()
        };
        let mut system = ReputationSystem::new(params);
        let (_, after) = system.record_job_outcome(&id("P_RF_0"), true, 5.0, 50.0);
        assert!((after - 51.05).abs() < 1e-9, "got {}", after);
    }

    #[test]
    fn test_fraud_penalty_and_bounds() {
        let mut system = ReputationSystem::new(ReputationParameters::default());
        let provider = id("P_A_0");
        let (_, after) = system.record_job_outcome(&provider, false, 100.0, 50.0);
        assert_eq!(after, 0.0);
        let (_, after) = system.record_job_outcome(&provider, false, 100.0, 50.0);
        assert_eq!(after, 0.0, "never below zero");

        for _ in 0..200 {
            system.record_job_outcome(&provider, true, 10_000.0, 50.0);
        }
        assert_eq!(system.reputation(&provider), 100.0, "never above 100");
        assert_eq!(system.record(&provider).map(|r| r.detected_frauds), Some(2));
    }

    #[test]
    fn test_time_decay() {
        let mut system = ReputationSystem::new(ReputationParameters::default());
        let provider = id("P_H_0");
        system.register(&provider);
        system.apply_time_decay();
        let expected = 50.0 * 0.99 + 0.001;
        assert!((system.reputation(&provider) - expected).abs() < 1e-12);

        for _ in 0..5000 {
            system.apply_time_decay();
        }
        let score = system.reputation(&provider);
        assert!((0.0..=100.0).contains(&score));
        // Fixed point of s = 0.99 s + 1.0 once the bonus is capped.
        assert!((score - 100.0).abs() < 1e-6, "got {}", score);
    }

    #[test]
    fn test_prior_falls_with_reputation() {
        let mut system = ReputationSystem::new(ReputationParameters::default());
        let provider = id("P_H_0");
        system.register(&provider);
        assert!((system.prior_from_reputation(&provider) - 0.1).abs() < 1e-12);
        system.record_job_outcome(&provider, true, 1000.0, 50.0);
        assert!(system.prior_from_reputation(&provider) < 0.1);
        assert!((reputation_prior(100.0, 0.1, 0.02) - 0.1 * (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_farming_detection() {
        let params = ReputationParameters {
            min_stake_enforcement: false,
            ..ReputationParameters::default()
        };
        let mut system = ReputationSystem::new(params);
        let farmer = id("P_RF_0");
        let staker = id("P_H_0");
        for _ in 0..30 {
            system.record_job_outcome(&farmer, true, 5.0, 50.0);
            system.record_job_outcome(&staker, true, 100.0, 50.0);
        }
        assert!(system.detect_reputation_farming(&farmer));
        assert!(!system.detect_reputation_farming(&staker));
        assert!(!system.detect_reputation_farming(&id("nobody")));
    }

    #[test]
    fn test_single_client_concentration() {
        let mut detector = SelfBuyingDetector::from_params(&ReputationParameters::default());
        let provider = id("P_R_0");
        let client = id("C_MS_0");
        for _ in 0..10 {
            detector.record_job(&provider, &client);
        }
        let report = detector.detect(&provider).unwrap();
        assert!(report.is_suspicious);
        assert_eq!(report.concentration_ratio, 1.0);
        assert_eq!(report.n_unique_clients, 1);
        assert_eq!(report.total_jobs, 10);
        assert_eq!(detector.detect(&id("P_R_9")), None);
    }

    #[test]
    fn test_prefix_sharing_flagged() {
        let mut detector = SelfBuyingDetector::new(3, 0.5, 4);
        let provider = id("X00_P");
        for i in 0..4 {
            detector.record_job(&provider, &id(&format!("C_MS_{}", i)));
        }
        let report = detector.detect(&provider).unwrap();
        assert!(!report.is_suspicious, "{:?}", report);

        for _ in 0..5 {
            detector.record_job(&provider, &id("X00_C"));
        }
        let report = detector.detect(&provider).unwrap();
        assert!(report.self_buy_ratio > 0.5);
        assert!(report.is_suspicious);
    }

    #[test]
    fn test_statistics() {
        let mut system = ReputationSystem::new(ReputationParameters::default());
        system.register(&id("a"));
        system.register(&id("b"));
        system.record_job_outcome(&id("a"), false, 100.0, 10.0);
        let stats = system.statistics();
        assert_eq!(stats.n_providers, 2);
        assert_eq!(stats.total_frauds, 1);
        assert_eq!(stats.min_reputation, 0.0);
        assert_eq!(stats.max_reputation, 50.0);
        assert!((stats.mean_reputation - 25.0).abs() < 1e-12);
    }
}
