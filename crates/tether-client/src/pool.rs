//! Candidate selection over the configured gateway servers.
//!
//! The pool tracks per-server health and hands the state machine its next
//! connection candidate: fewest consecutive failures first, most recent
//! success breaking ties. A server past the failure threshold sits on a
//! cooldown and is skipped while any healthier candidate remains; when
//! every candidate is cooling the pool degrades to offering the best of
//! them rather than nothing.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Instant;

use crate::config::ServerAddr;

/// How a connection attempt against a candidate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The attempt reached a ready session.
    Success,
    /// The attempt failed at any stage, or an established session dropped.
    Failure,
}

#[derive(Debug, Clone)]
struct ServerEntry {
    addr: ServerAddr,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    consecutive_failures: u32,
}

impl ServerEntry {
    fn new(addr: ServerAddr) -> Self {
        Self {
            addr,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
        }
    }

    fn cooling(&self, threshold: u32, cooldown: std::time::Duration, now: Instant) -> bool {
        self.consecutive_failures >= threshold
            && self
                .last_failure
                .is_some_and(|at| now.duration_since(at) < cooldown)
    }
}

/// Health-ordered view of the configured servers.
#[derive(Debug)]
pub struct ServerPool {
    entries: Vec<ServerEntry>,
    failure_threshold: u32,
    cooldown: std::time::Duration,
}

impl ServerPool {
    /// A pool over the given servers, all initially untried.
    pub fn new(
        servers: impl IntoIterator<Item = ServerAddr>,
        failure_threshold: u32,
        cooldown: std::time::Duration,
    ) -> Self {
        Self {
            entries: servers.into_iter().map(ServerEntry::new).collect(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Number of configured servers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no servers are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the healthiest candidate not in `exclude`.
    ///
    /// Candidates on cooldown are skipped while a non-cooling one exists;
    /// with the whole remainder cooling, the best of it is offered anyway.
    /// `None` means every server has been excluded.
    pub fn next_candidate(&self, exclude: &HashSet<ServerAddr>) -> Option<ServerAddr> {
        let now = Instant::now();
        let available: Vec<&ServerEntry> = self
            .entries
            .iter()
            .filter(|e| !exclude.contains(&e.addr))
            .collect();

        let healthy: Vec<&ServerEntry> = available
            .iter()
            .copied()
            .filter(|e| !e.cooling(self.failure_threshold, self.cooldown, now))
            .collect();

        let candidates = if healthy.is_empty() { available } else { healthy };
        candidates
            .into_iter()
            .min_by_key(|e| (e.consecutive_failures, Reverse(e.last_success)))
            .map(|e| e.addr.clone())
    }

    /// Record how an attempt against `addr` ended.
    ///
    /// Success resets the failure streak; failure extends it and stamps the
    /// cooldown clock. Unknown addresses are ignored.
    pub fn record_outcome(&mut self, addr: &ServerAddr, outcome: Outcome) {
        let Some(entry) = self.entries.iter_mut().find(|e| &e.addr == addr) else {
            return;
        };
        let now = Instant::now();
        match outcome {
            Outcome::Success => {
                entry.last_success = Some(now);
                entry.consecutive_failures = 0;
            }
            Outcome::Failure => {
                entry.last_failure = Some(now);
                entry.consecutive_failures += 1;
            }
        }
    }

    /// Consecutive-failure count for `addr`, for logging and tests.
    pub fn failure_streak(&self, addr: &ServerAddr) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| &e.addr == addr)
            .map(|e| e.consecutive_failures)
    }
}
