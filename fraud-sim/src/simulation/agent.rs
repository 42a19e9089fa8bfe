//! Core agent trait and the per-agent account.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Reputation every agent starts with.
pub const INITIAL_REPUTATION: f64 = 50.0;

/// Upper bound of the reputation scale.
pub const MAX_REPUTATION: f64 = 100.0;

/// Unique identifier for an agent in the simulation.
///
/// Identifiers are human readable (`P_H_3`, `C_MS_12`, `S1_4`); identities
/// controlled by the same party share a leading prefix, which the self-buying
/// detector inspects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether both ids agree on their first `min(len, self, other)` characters.
    pub fn shares_prefix(&self, other: &AgentId, len: usize) -> bool {
        let n = len.min(self.0.chars().count()).min(other.0.chars().count());
        n > 0 && self.0.chars().take(n).eq(other.0.chars().take(n))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Role an agent plays in the job lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Provider,
    Client,
    Challenger,
}

/// Failure of an account operation.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum AgentError {
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { available: f64, requested: f64 },

    #[error("invalid amount {0}")]
    InvalidAmount(f64),
}

/// Funds, counters and history owned by one agent.
///
/// The balance never goes negative and the locked stake never exceeds what
/// was locked and not yet released or slashed. `total_profit` tracks the
/// change in net worth: moving funds into or out of the stake lock does not
/// touch it, slashing does.
#[derive(Clone, Debug, Serialize)]
pub struct AgentState {
    balance: f64,
    initial_balance: f64,
    locked_stake: f64,
    total_profit: f64,

    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub disputes_initiated: u64,
    pub disputes_won: u64,
    pub disputes_lost: u64,

    reputation: f64,
    pub active: bool,

    balance_history: Vec<f64>,
    reputation_history: Vec<f64>,
}

impl AgentState {
    pub fn new(balance: f64) -> Self {
        let balance = balance.max(0.0);
        Self {
            balance,
            initial_balance: balance,
            locked_stake: 0.0,
            total_profit: 0.0,
            jobs_completed: 0,
            jobs_failed: 0,
            disputes_initiated: 0,
            disputes_won: 0,
            disputes_lost: 0,
            reputation: INITIAL_REPUTATION,
            active: true,
            balance_history: Vec::new(),
            reputation_history: Vec::new(),
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn locked_stake(&self) -> f64 {
        self.locked_stake
    }

    pub fn total_profit(&self) -> f64 {
        self.total_profit
    }

    pub fn reputation(&self) -> f64 {
        self.reputation
    }

    pub fn balance_history(&self) -> &[f64] {
        &self.balance_history
    }

    pub fn reputation_history(&self) -> &[f64] {
        &self.reputation_history
    }

    /// Add funds. Non-positive or non-finite amounts are ignored.
    pub fn credit(&mut self, amount: f64) {
        if amount > 0.0 && amount.is_finite() {
            self.balance += amount;
            self.total_profit += amount;
        }
    }

    /// Remove funds, failing without any change if the balance is short.
    pub fn try_debit(&mut self, amount: f64) -> Result<(), AgentError> {
        self.withdraw(amount)?;
        self.total_profit -= amount;
        Ok(())
    }

    pub fn debit(&mut self, amount: f64) -> bool {
        self.try_debit(amount).is_ok()
    }

    /// Move funds from the balance into the stake lock.
    pub fn lock_stake(&mut self, amount: f64) -> bool {
        if self.withdraw(amount).is_err() {
            return false;
        }
        self.locked_stake += amount;
        true
    }

    /// Release up to `amount` of locked stake back to the balance.
    pub fn unlock_stake(&mut self, amount: f64) -> f64 {
        let released = amount.max(0.0).min(self.locked_stake);
        self.locked_stake -= released;
        self.balance += released;
        released
    }

    /// Destroy up to `amount` of locked stake, returning what was taken.
    pub fn slash_stake(&mut self, amount: f64) -> f64 {
        let slashed = amount.max(0.0).min(self.locked_stake);
        self.locked_stake -= slashed;
        self.total_profit -= slashed;
        slashed
    }

    /// Shift the reputation score, keeping it within [0, 100].
    pub fn update_reputation(&mut self, delta: f64) {
        if delta.is_finite() {
            self.reputation = (self.reputation + delta).clamp(0.0, MAX_REPUTATION);
        }
    }

    /// Append one entry to each history.
    pub fn record_period(&mut self) {
        self.balance_history.push(self.balance);
        self.reputation_history.push(self.reputation);
    }

    fn withdraw(&mut self, amount: f64) -> Result<(), AgentError> {
        if !(amount >= 0.0) || !amount.is_finite() {
            return Err(AgentError::InvalidAmount(amount));
        }
        if amount > self.balance {
            return Err(AgentError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}

/// Behaviour shared by providers, clients and challengers.
pub trait Agent: fmt::Debug {
    fn id(&self) -> &AgentId;

    fn role(&self) -> Role;

    fn state(&self) -> &AgentState;

    fn state_mut(&mut self) -> &mut AgentState;

    /// Strategy name used in reports.
    fn agent_type(&self) -> &'static str;

    fn balance(&self) -> f64 {
        self.state().balance()
    }

    fn reputation(&self) -> f64 {
        self.state().reputation()
    }

    fn is_active(&self) -> bool {
        self.state().active
    }

    fn record_period(&mut self) {
        self.state_mut().record_period();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debit_never_overdraws() {
        let mut state = AgentState::new(10.0);
        assert!(state.debit(4.0));
        assert!(!state.debit(7.0), "overdraft must fail");
        assert_eq!(state.balance(), 6.0, "failed debit must not change balance");
        assert_eq!(
            state.try_debit(100.0),
            Err(AgentError::InsufficientBalance {
                available: 6.0,
                requested: 100.0
            })
        );
        assert!(!state.debit(-1.0));
        assert!(!state.debit(f64::NAN));
    }

    #[test]
    fn test_stake_lifecycle() {
        let mut state = AgentState::new(100.0);
        assert!(state.lock_stake(60.0));
        assert_eq!(state.balance(), 40.0);
        assert_eq!(state.locked_stake(), 60.0);
        assert_eq!(state.total_profit(), 0.0, "locking is not a loss");

        assert!(!state.lock_stake(50.0));
        assert_eq!(state.locked_stake(), 60.0);

        let slashed = state.slash_stake(25.0);
        assert_eq!(slashed, 25.0);
        assert_eq!(state.locked_stake(), 35.0);
        assert_eq!(state.total_profit(), -25.0);

        let slashed = state.slash_stake(1000.0);
        assert_eq!(slashed, 35.0, "slash is bounded by locked stake");
        assert_eq!(state.locked_stake(), 0.0);

        assert_eq!(state.unlock_stake(10.0), 0.0);
        assert_eq!(state.balance(), 40.0);
    }

    #[test]
    fn test_unlock_returns_funds() {
        let mut state = AgentState::new(50.0);
        state.lock_stake(30.0);
        assert_eq!(state.unlock_stake(30.0), 30.0);
        assert_eq!(state.balance(), 50.0);
        assert_eq!(state.total_profit(), 0.0);
    }

    #[test]
    fn test_reputation_clamped() {
        let mut state = AgentState::new(0.0);
        state.update_reputation(500.0);
        assert_eq!(state.reputation(), MAX_REPUTATION);
        state.update_reputation(-1000.0);
        assert_eq!(state.reputation(), 0.0);
    }

    #[test]
    fn test_record_period_grows_history() {
        let mut state = AgentState::new(5.0);
        for i in 1..=3 {
            state.record_period();
            assert_eq!(state.balance_history().len(), i);
            assert_eq!(state.reputation_history().len(), i);
        }
    }

    #[test]
    fn test_shares_prefix() {
        let a = AgentId::new("X03_P");
        let b = AgentId::new("X03_C");
        let c = AgentId::new("C_MS_3");
        assert!(a.shares_prefix(&b, 4));
        assert!(!a.shares_prefix(&b, 5));
        assert!(!a.shares_prefix(&c, 4));
        assert!(AgentId::new("ab").shares_prefix(&AgentId::new("abc"), 4));
    }
}
