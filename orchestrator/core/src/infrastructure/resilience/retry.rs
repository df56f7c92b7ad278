// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Retry policy: exponential backoff with symmetric jitter, bounded both by
//! attempt count and by total time spent sleeping.

use rand::Rng;
use std::time::Duration;

use crate::domain::engine_config::RetrySettings;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_total_wait: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            multiplier: settings.multiplier.max(1.0),
            max_total_wait: settings.max_total_wait,
            jitter: settings.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Retries immediately; used where wall-clock waits would only slow tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_total_wait: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Un-jittered delay after the `failed_attempts`-th failure (1-based).
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    pub fn jittered<R: Rng + ?Sized>(&self, failed_attempts: u32, rng: &mut R) -> Duration {
        let delay = self.backoff_for(failed_attempts);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        delay.mul_f64(factor)
    }
}
