//! Jobs flowing through the market.

use serde::Serialize;

use super::agent::AgentId;

/// Sequential job identifier, unique within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

/// One unit of outsourced computation.
///
/// Created by the market each period and mutated only by the engine while it
/// walks the lifecycle.
#[derive(Clone, Debug, Serialize)]
pub struct Job {
    pub id: JobId,
    pub period: u64,

    /// Index of the client in the engine's client list.
    #[serde(skip)]
    pub client_index: usize,
    pub client_id: AgentId,

    /// Payment owed to the provider.
    pub value: f64,
    /// Loss the client suffers if an incorrect result goes unnoticed.
    pub loss_if_incorrect: f64,

    #[serde(skip)]
    pub provider_index: Option<usize>,
    pub provider_id: Option<AgentId>,
    pub stake: f64,

    pub executed_honestly: Option<bool>,
    pub audited: bool,
    pub fraud_detected: bool,
    pub dispute_initiated: bool,
    pub dispute_successful: bool,
}

impl Job {
    pub fn new(
        id: JobId,
        period: u64,
        client_index: usize,
        client_id: AgentId,
        value: f64,
        loss_if_incorrect: f64,
    ) -> Self {
        Self {
            id,
            period,
            client_index,
            client_id,
            value,
            loss_if_incorrect,
            provider_index: None,
            provider_id: None,
            stake: 0.0,
            executed_honestly: None,
            audited: false,
            fraud_detected: false,
            dispute_initiated: false,
            dispute_successful: false,
        }
    }

    pub fn assign(&mut self, provider_index: usize, provider_id: AgentId) {
        self.provider_index = Some(provider_index);
        self.provider_id = Some(provider_id);
    }

    pub fn is_fraudulent(&self) -> bool {
        self.executed_honestly == Some(false)
    }

    /// Fraud that was both detected and upheld by a dispute.
    pub fn is_proven_fraud(&self) -> bool {
        self.fraud_detected && self.dispute_successful
    }
}
