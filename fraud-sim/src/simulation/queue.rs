//! Challenge-window bookkeeping for executed jobs.

use std::collections::BTreeMap;

use super::job::JobId;

/// Executed jobs awaiting the end of their challenge window, keyed by
/// deadline.
///
/// Disputes are still resolved in the period a job executes; the queue only
/// tracks when a result becomes final.
#[derive(Clone, Debug)]
pub struct JobQueue {
    challenge_window: u64,
    pending: BTreeMap<u64, Vec<PendingJob>>,
    pending_len: usize,
    finalized: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingJob {
    pub job: JobId,
    pub deadline: u64,
    pub stake: f64,
}

impl JobQueue {
    pub fn new(challenge_window: u64) -> Self {
        Self {
            challenge_window,
            pending: BTreeMap::new(),
            pending_len: 0,
            finalized: 0,
        }
    }

    pub fn enqueue(&mut self, job: JobId, now: u64, stake: f64) {
        let deadline = now.saturating_add(self.challenge_window);
        self.pending
            .entry(deadline)
            .or_default()
            .push(PendingJob { job, deadline, stake });
        self.pending_len += 1;
    }

    /// Remove and return jobs whose window has closed by `now`, oldest
    /// deadline first.
    pub fn finalize_expired(&mut self, now: u64) -> Vec<PendingJob> {
        let open = match now.checked_add(1) {
            Some(first_open) => self.pending.split_off(&first_open),
            None => BTreeMap::new(),
        };
        let expired: Vec<PendingJob> = std::mem::replace(&mut self.pending, open)
            .into_values()
            .flatten()
            .collect();
        self.pending_len -= expired.len();
        self.finalized += expired.len() as u64;
        expired
    }

    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    /// Earliest deadline still pending.
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }

    pub fn finalized(&self) -> u64 {
        self.finalized
    }
}
