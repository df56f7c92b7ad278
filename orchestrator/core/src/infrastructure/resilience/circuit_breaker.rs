// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-provider circuit breaker.
//!
//! - **Closed:** calls pass through; consecutive failures are counted.
//! - **Open:** calls fail fast with `CircuitOpen` until the cool-down elapses.
//! - **Half-open:** exactly one probe is admitted. Success closes the circuit
//!   and resets the cool-down; failure reopens it with a longer cool-down.
//!
//! Admission is handed out as a [`Permit`]. A permit dropped without an
//! outcome (timed out, aborted, cancelled) gives the probe slot back.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::engine_config::CircuitBreakerSettings;
use crate::domain::llm::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub cooldown_multiplier: f64,
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: settings.cooldown,
            cooldown_multiplier: settings.cooldown_multiplier.max(1.0),
            max_cooldown: settings.max_cooldown.max(settings.cooldown),
        }
    }
}

/// What the breaker granted a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The single half-open probe.
    Probe,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let cooldown = config.cooldown;
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Cool-down that applies the next time the circuit is open.
    pub fn current_cooldown(&self) -> Duration {
        self.inner.lock().cooldown
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Ask to place a call. The outcome is reported through the permit.
    pub fn try_acquire(&self) -> Result<Permit<'_>, ProviderError> {
        let mut inner = self.inner.lock();
        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed < inner.cooldown {
                    return Err(self.open_error(inner.cooldown - elapsed));
                }
                info!(provider = %self.name, "Circuit half-open, admitting probe");
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.open_error(Duration::ZERO));
                }
                inner.probe_in_flight = true;
                Admission::Probe
            }
        };
        Ok(Permit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(provider = %self.name, "Circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.cooldown = self.config.cooldown;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        provider = %self.name,
                        failures = inner.consecutive_failures,
                        cooldown = ?inner.cooldown,
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                let next = inner.cooldown.mul_f64(self.config.cooldown_multiplier);
                inner.cooldown = next.min(self.config.max_cooldown);
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(
                    provider = %self.name,
                    cooldown = ?inner.cooldown,
                    "Probe failed, circuit reopened"
                );
            }
            // Late result from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// The call finished without saying anything about availability
    /// (e.g. a permanent rejection). Frees the probe slot if it held it.
    pub fn record_neutral(&self, admission: Admission) {
        if admission == Admission::Probe {
            self.inner.lock().probe_in_flight = false;
        }
    }

    fn open_error(&self, retry_after: Duration) -> ProviderError {
        ProviderError::CircuitOpen {
            provider: self.name.clone(),
            retry_after,
        }
    }
}

/// One admitted call. Consumed by reporting its outcome.
#[derive(Debug)]
#[must_use = "an unreported permit only frees its slot when dropped"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    pub fn neutral(mut self) {
        self.settled = true;
        self.breaker.record_neutral(self.admission);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            debug!(provider = %self.breaker.name, "Probe abandoned, releasing slot");
            self.breaker.record_neutral(self.admission);
        }
    }
}
