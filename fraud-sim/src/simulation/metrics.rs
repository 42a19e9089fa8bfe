//! Per-period statistics and the aggregate result of a run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analysis::{TheoreticalEquilibrium, WelfareMetrics};

use super::agent::AgentId;
use super::agents::ProviderKind;
use super::reputation::{ReputationStatistics, SelfBuyReport};

/// Share of `part` in `whole`, or `empty` when `whole` is zero.
fn ratio(part: u64, whole: u64, empty: f64) -> f64 {
    if whole == 0 {
        empty
    } else {
        part as f64 / whole as f64
    }
}

/// Counters for a single period.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PeriodStats {
    pub period: u64,

    pub jobs_generated: u64,
    pub jobs_matched: u64,
    /// No eligible provider.
    pub jobs_unmatched: u64,
    /// Matched, but the stake could not be posted.
    pub jobs_unexecuted: u64,
    pub jobs_executed: u64,

    pub frauds: u64,
    /// Frauds caught by a client audit or a watcher.
    pub frauds_detected: u64,
    pub audits: u64,
    pub disputes: u64,
    pub disputes_successful: u64,
    pub disputes_lost: u64,

    pub stake_slashed: f64,
    pub client_losses: f64,
    /// Sum of stakes posted on executed jobs.
    pub stake_volume: f64,
    pub value_volume: f64,
    pub loss_volume: f64,

    pub mean_reputation: f64,
    /// Total welfare at the end of the period.
    pub welfare: f64,
}

impl PeriodStats {
    pub fn new(period: u64) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Frauds over executed jobs.
    pub fn fraud_rate(&self) -> f64 {
        ratio(self.frauds, self.jobs_executed, 0.0)
    }

    /// Detected over committed frauds; 1.0 when nothing was committed.
    pub fn detection_rate(&self) -> f64 {
        ratio(self.frauds_detected, self.frauds, 1.0)
    }

    pub fn mean_stake(&self) -> f64 {
        if self.jobs_executed == 0 {
            0.0
        } else {
            self.stake_volume / self.jobs_executed as f64
        }
    }
}

/// Run-wide totals.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunTotals {
    pub jobs_generated: u64,
    pub jobs_matched: u64,
    pub jobs_unmatched: u64,
    pub jobs_unexecuted: u64,
    pub jobs_executed: u64,
    pub frauds: u64,
    pub frauds_detected: u64,
    pub audits: u64,
    pub disputes: u64,
    pub disputes_successful: u64,
    pub disputes_lost: u64,
    pub stake_slashed: f64,
    pub client_losses: f64,
    pub stake_volume: f64,
    pub value_volume: f64,
    pub loss_volume: f64,
    /// Jobs whose challenge window closed during the run.
    pub jobs_finalized: u64,
}

impl RunTotals {
    pub fn absorb(&mut self, period: &PeriodStats) {
        self.jobs_generated += period.jobs_generated;
        self.jobs_matched += period.jobs_matched;
        self.jobs_unmatched += period.jobs_unmatched;
        self.jobs_unexecuted += period.jobs_unexecuted;
        self.jobs_executed += period.jobs_executed;
        self.frauds += period.frauds;
        self.frauds_detected += period.frauds_detected;
        self.audits += period.audits;
        self.disputes += period.disputes;
        self.disputes_successful += period.disputes_successful;
        self.disputes_lost += period.disputes_lost;
        self.stake_slashed += period.stake_slashed;
        self.client_losses += period.client_losses;
        self.stake_volume += period.stake_volume;
        self.value_volume += period.value_volume;
        self.loss_volume += period.loss_volume;
    }

    pub fn fraud_rate(&self) -> f64 {
        ratio(self.frauds, self.jobs_executed, 0.0)
    }

    pub fn detection_rate(&self) -> f64 {
        ratio(self.frauds_detected, self.frauds, 1.0)
    }

    pub fn dispute_success_rate(&self) -> f64 {
        ratio(self.disputes_successful, self.disputes, 0.0)
    }

    pub fn mean_stake(&self) -> f64 {
        self.per_executed(self.stake_volume)
    }

    pub fn mean_job_value(&self) -> f64 {
        self.per_executed(self.value_volume)
    }

    pub fn mean_loss(&self) -> f64 {
        self.per_executed(self.loss_volume)
    }

    fn per_executed(&self, volume: f64) -> f64 {
        if self.jobs_executed == 0 {
            0.0
        } else {
            volume / self.jobs_executed as f64
        }
    }
}

/// Per-period series, one entry per period.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PeriodHistory {
    pub fraud_rate: Vec<f64>,
    pub detection_rate: Vec<f64>,
    pub mean_reputation: Vec<f64>,
    pub mean_stake: Vec<f64>,
    pub welfare: Vec<f64>,
}

impl PeriodHistory {
    pub fn push(&mut self, period: &PeriodStats) {
        self.fraud_rate.push(period.fraud_rate());
        self.detection_rate.push(period.detection_rate());
        self.mean_reputation.push(period.mean_reputation);
        self.mean_stake.push(period.mean_stake());
        self.welfare.push(period.welfare);
    }

    pub fn len(&self) -> usize {
        self.fraud_rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fraud_rate.is_empty()
    }
}

/// Signals of adversarial behaviour collected over a run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AttackMetrics {
    pub farming_suspects: Vec<AgentId>,
    pub self_buy_suspects: BTreeMap<AgentId, SelfBuyReport>,

    /// Net profit of adversarial, farmer, sybil and colluding providers.
    pub attacker_total_profit: f64,
    pub attacker_mean_profit: f64,
    pub honest_mean_profit: f64,
    /// Attacker mean profit over honest mean profit; 0 when honest providers
    /// made nothing.
    pub attack_success_ratio: f64,
    pub attacker_frauds: u64,
    pub attacker_frauds_undetected: u64,

    pub sybil_creation_costs: f64,
    pub frivolous_disputes: u64,
    pub accidental_catches: u64,
    pub griefing_costs: f64,
}

/// Everything a run produced.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub n_periods: u64,

    pub totals: RunTotals,
    pub fraud_rate: f64,
    pub detection_rate: f64,
    pub dispute_success_rate: f64,

    pub history: PeriodHistory,

    pub provider_profits: BTreeMap<AgentId, f64>,
    pub provider_kinds: BTreeMap<AgentId, ProviderKind>,
    pub client_losses: BTreeMap<AgentId, f64>,
    pub challenger_profits: BTreeMap<AgentId, f64>,
    pub final_reputations: BTreeMap<AgentId, f64>,

    pub reputation: ReputationStatistics,
    pub welfare: WelfareMetrics,
    pub attack: AttackMetrics,

    pub mean_job_value: f64,
    pub mean_stake: f64,
    pub mean_loss: f64,
    /// Closed-form equilibrium at the run's mean value, stake and loss.
    pub theoretical: TheoreticalEquilibrium,
}

impl SimulationResult {
    pub fn fraud_rate(&self) -> f64 {
        self.fraud_rate
    }

    pub fn detection_rate(&self) -> f64 {
        self.detection_rate
    }

    pub fn social_welfare(&self) -> f64 {
        self.welfare.total_welfare
    }

    /// Mean profit of providers of one kind, if any exist.
    pub fn mean_profit_of(&self, kind: ProviderKind) -> Option<f64> {
        let profits: Vec<f64> = self
            .provider_kinds
            .iter()
            .filter(|(_, k)| **k == kind)
            .filter_map(|(id, _)| self.provider_profits.get(id).copied())
            .collect();
        if profits.is_empty() {
            None
        } else {
            Some(profits.iter().sum::<f64>() / profits.len() as f64)
        }
    }

    /// Simulated fraud rate minus the closed-form `q*`.
    pub fn deviation_from_theory(&self) -> f64 {
        self.fraud_rate - self.theoretical.q_star
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
