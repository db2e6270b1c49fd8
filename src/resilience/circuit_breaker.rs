//! Circuit Breaker
//!
//! Per-provider failure isolation. A provider trips to `Open` after N
//! consecutive failures inside a rolling window, rejects calls while open, and
//! after a cooldown admits exactly one trial call (`HalfOpen`) whose outcome
//! decides whether the circuit closes or re-opens.

use crate::error::{NlqError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected
    Open,
    /// One trial request is allowed through
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward tripping
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Observability snapshot for one provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub total_trips: u64,
    pub total_rejected: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_trips: u64,
    total_rejected: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            first_failure_at: None,
            opened_at: None,
            trial_in_flight: false,
            total_trips: 0,
            total_rejected: 0,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
        self.total_trips += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.first_failure_at = None;
        self.opened_at = None;
        self.trial_in_flight = false;
    }
}

/// Process-wide registry of per-provider breakers
pub struct CircuitBreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<Mutex<BreakerState>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    fn breaker(&self, provider: &str) -> Arc<Mutex<BreakerState>> {
        let entry = self
            .breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerState::new())));
        Arc::clone(entry.value())
    }

    /// Ask permission to call `provider`.
    ///
    /// The returned permit must be resolved with `success()` or `failure()`;
    /// a permit dropped unresolved releases a half-open trial slot without
    /// changing state.
    pub fn try_acquire(&self, provider: &str) -> Result<BreakerPermit> {
        let breaker = self.breaker(provider);
        let mut state = breaker.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let mut trial = false;
        match state.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .map(|at| now.duration_since(at) >= self.settings.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!(provider, "Circuit cooldown elapsed, admitting trial call");
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    trial = true;
                } else {
                    state.total_rejected += 1;
                    return Err(NlqError::CircuitOpen(provider.to_string()));
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    state.total_rejected += 1;
                    return Err(NlqError::CircuitOpen(provider.to_string()));
                }
                state.trial_in_flight = true;
                trial = true;
            }
        }
        drop(state);

        Ok(BreakerPermit {
            breaker,
            settings: self.settings.clone(),
            provider: provider.to_string(),
            trial,
            resolved: false,
        })
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        self.stats(provider).state
    }

    pub fn stats(&self, provider: &str) -> BreakerStats {
        let breaker = self.breaker(provider);
        let state = breaker.lock().unwrap_or_else(|e| e.into_inner());
        BreakerStats {
            state: state.state,
            total_trips: state.total_trips,
            total_rejected: state.total_rejected,
            consecutive_failures: state.consecutive_failures,
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

/// Admission ticket for one provider call
pub struct BreakerPermit {
    breaker: Arc<Mutex<BreakerState>>,
    settings: BreakerSettings,
    provider: String,
    trial: bool,
    resolved: bool,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        let mut state = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        if state.state != CircuitState::Closed {
            info!(provider = %self.provider, "Trial call succeeded, closing circuit");
        }
        state.close();
    }

    pub fn failure(mut self) {
        self.resolved = true;
        let now = Instant::now();
        let mut state = self.breaker.lock().unwrap_or_else(|e| e.into_inner());

        if self.trial || state.state == CircuitState::HalfOpen {
            warn!(provider = %self.provider, "Trial call failed, re-opening circuit");
            state.open(now);
            return;
        }
        if state.state == CircuitState::Open {
            return;
        }

        let window_expired = state
            .first_failure_at
            .map(|at| now.duration_since(at) > self.settings.window)
            .unwrap_or(true);
        if window_expired {
            state.first_failure_at = Some(now);
            state.consecutive_failures = 0;
        }
        state.consecutive_failures += 1;

        if state.consecutive_failures >= self.settings.failure_threshold {
            warn!(
                provider = %self.provider,
                failures = state.consecutive_failures,
                "Failure threshold reached, opening circuit"
            );
            state.open(now);
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            let mut state = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
            state.trial_in_flight = false;
        }
    }
}
