//! Circuit breaker for the model endpoint.
//!
//! All state lives in one `CircuitCell` behind one mutex, and every change goes
//! through [`CircuitCell::apply`]. Admission and outcome recording are each a
//! single call to it, so concurrent callers can never observe a half-applied
//! transition.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use concierge_core::config::ResilienceConfig;
use concierge_core::errors::ModelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub endpoint: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

impl From<&ResilienceConfig> for BreakerPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    Admit,
    Succeeded { trial: bool },
    Failed { trial: bool },
    Abandoned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verdict {
    Admitted { trial: bool },
    Rejected,
    Recorded,
}

#[derive(Debug)]
struct CircuitCell {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    last_transition_at: DateTime<Utc>,
}

impl CircuitCell {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            last_transition_at: Utc::now(),
        }
    }

    fn transition(&mut self, status: CircuitStatus, now: Instant) {
        self.status = status;
        self.last_transition_at = Utc::now();
        self.opened_at = (status == CircuitStatus::Open).then_some(now);
    }

    fn apply(&mut self, event: Event, policy: &BreakerPolicy, now: Instant) -> Verdict {
        match (self.status, event) {
            (CircuitStatus::Closed, Event::Admit) => Verdict::Admitted { trial: false },
            (CircuitStatus::Open, Event::Admit) => {
                let cooled = self
                    .opened_at
                    .map_or(true, |opened| now.saturating_duration_since(opened) >= policy.cooldown);
                if cooled {
                    self.transition(CircuitStatus::HalfOpen, now);
                    self.trial_in_flight = true;
                    Verdict::Admitted { trial: true }
                } else {
                    Verdict::Rejected
                }
            }
            (CircuitStatus::HalfOpen, Event::Admit) if !self.trial_in_flight => {
                self.trial_in_flight = true;
                Verdict::Admitted { trial: true }
            }
            (CircuitStatus::HalfOpen, Event::Admit) => Verdict::Rejected,

            (CircuitStatus::Closed, Event::Succeeded { trial: false }) => {
                self.consecutive_failures = 0;
                Verdict::Recorded
            }
            (CircuitStatus::HalfOpen, Event::Succeeded { trial: true }) => {
                self.consecutive_failures = 0;
                self.trial_in_flight = false;
                self.transition(CircuitStatus::Closed, now);
                Verdict::Recorded
            }
            (CircuitStatus::Closed, Event::Failed { trial: false }) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= policy.failure_threshold {
                    self.transition(CircuitStatus::Open, now);
                }
                Verdict::Recorded
            }
            (CircuitStatus::HalfOpen, Event::Failed { trial: true }) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.trial_in_flight = false;
                self.transition(CircuitStatus::Open, now);
                Verdict::Recorded
            }
            (CircuitStatus::HalfOpen, Event::Abandoned) => {
                self.trial_in_flight = false;
                Verdict::Recorded
            }
            // Outcomes of calls admitted before the circuit opened do not move it.
            _ => Verdict::Recorded,
        }
    }
}

/// Breaker guarding one model endpoint. Shared as `Arc<CircuitBreaker>` by
/// every client talking to that endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    policy: BreakerPolicy,
    cell: Mutex<CircuitCell>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self { endpoint: endpoint.into(), policy, cell: Mutex::new(CircuitCell::new()) }
    }

    pub fn from_config(endpoint: impl Into<String>, config: &ResilienceConfig) -> Self {
        Self::new(endpoint, BreakerPolicy::from(config))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    /// Admits a call or rejects it with `CircuitOpen`. The returned permit must
    /// be settled with [`CallPermit::succeed`] or [`CallPermit::fail`].
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, ModelError> {
        match self.dispatch(Event::Admit) {
            Verdict::Admitted { trial } => Ok(CallPermit { breaker: self, trial, settled: false }),
            Verdict::Rejected | Verdict::Recorded => {
                Err(ModelError::CircuitOpen { endpoint: self.endpoint.clone() })
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let cell = self.lock();
        CircuitSnapshot {
            endpoint: self.endpoint.clone(),
            status: cell.status,
            consecutive_failures: cell.consecutive_failures,
            last_transition_at: cell.last_transition_at,
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.lock().status
    }

    fn lock(&self) -> MutexGuard<'_, CircuitCell> {
        match self.cell.lock() {
            Ok(cell) => cell,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn dispatch(&self, event: Event) -> Verdict {
        let mut cell = self.lock();
        let before = cell.status;
        let verdict = cell.apply(event, &self.policy, Instant::now());
        let after = cell.status;
        let failures = cell.consecutive_failures;
        drop(cell);

        if before != after {
            match after {
                CircuitStatus::Open => warn!(
                    event_name = "model.circuit.opened",
                    endpoint = %self.endpoint,
                    consecutive_failures = failures,
                    cooldown_secs = self.policy.cooldown.as_secs(),
                    "model endpoint circuit opened"
                ),
                CircuitStatus::HalfOpen => info!(
                    event_name = "model.circuit.half_open",
                    endpoint = %self.endpoint,
                    "cooldown elapsed, admitting trial call"
                ),
                CircuitStatus::Closed => info!(
                    event_name = "model.circuit.closed",
                    endpoint = %self.endpoint,
                    "trial call succeeded, circuit closed"
                ),
            }
        }
        verdict
    }
}

/// Admission ticket for one model call. Dropping an unsettled trial permit
/// (a cancelled request) frees the half-open slot without counting an outcome.
#[must_use = "a permit must be settled with succeed() or fail()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.dispatch(Event::Succeeded { trial: self.trial });
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.dispatch(Event::Failed { trial: self.trial });
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.dispatch(Event::Abandoned);
        }
    }
}
