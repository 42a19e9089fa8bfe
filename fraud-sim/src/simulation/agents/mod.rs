//! Strategy implementations for the three roles.

mod challenger;
mod client;
mod provider;

pub use challenger::{
    should_dispute, Challenger, ChallengerKind, ChallengerStats, ChallengerStrategy,
    DisputeContext, GriefOutcome, Griefing, Permissionless, WatchAction,
};
pub use client::{
    AlwaysAudit, AuditContext, BeliefThreshold, Client, ClientKind, ClientStats, ClientStrategy,
    Colluding, MixedEquilibrium, Naive, NeverAudit, ReputationWeighted,
};
pub use provider::{
    cheat_utility, honest_utility, standard_stake, AdversarialStrategy, ColludingStrategy,
    ExecutionContext, HonestStrategy, Provider, ProviderKind, ProviderStats, ProviderStrategy,
    RationalStrategy, ReputationFarmerStrategy, StakeContext, SybilStrategy,
};
