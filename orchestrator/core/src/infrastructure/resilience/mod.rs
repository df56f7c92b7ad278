// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Resilience Layer
//
// Every call to an external reasoning provider goes through a ResilientProvider:
// retry with exponential backoff and jitter, guarded by one circuit breaker per
// provider name. Breakers are shared process-wide through the ResilienceLayer,
// so a provider that trips in one mission fails fast for all of them.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::engine_config::ResilienceSettings;
use crate::domain::llm::{GenerationOptions, ProviderError, ProviderResponse, ReasoningProvider};

/// A provider wrapped with retry and circuit breaking.
pub struct ResilientProvider {
    name: String,
    inner: Arc<dyn ReasoningProvider>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl ResilientProvider {
    pub fn new(
        name: impl Into<String>,
        inner: Arc<dyn ReasoningProvider>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            inner,
            breaker,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn call(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut waited = Duration::ZERO;
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.policy.max_attempts {
            let permit = self.breaker.try_acquire()?;
            attempts += 1;

            match self.inner.generate(prompt, options).await {
                Ok(response) => {
                    permit.succeeded();
                    if attempts > 1 {
                        debug!(provider = %self.name, attempts, "Provider call recovered");
                    }
                    return Ok(response);
                }
                Err(err) if !err.is_transient() => {
                    permit.neutral();
                    return Err(err);
                }
                Err(err) => {
                    permit.failed();
                    warn!(
                        provider = %self.name,
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        "Provider call failed"
                    );
                    last_error = Some(err);
                }
            }

            if attempts >= self.policy.max_attempts {
                break;
            }
            let delay = {
                let mut rng = rand::rng();
                self.policy.jittered(attempts, &mut rng)
            };
            if waited + delay > self.policy.max_total_wait && !delay.is_zero() {
                debug!(provider = %self.name, ?waited, "Retry wait budget exhausted");
                break;
            }
            tokio::time::sleep(delay).await;
            waited += delay;
        }

        Err(ProviderError::Unavailable {
            provider: self.name.clone(),
            attempts,
            last_error: last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }
}

#[async_trait]
impl ReasoningProvider for ResilientProvider {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        self.call(prompt, options).await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.inner.health_check().await
    }
}

/// Owns the breakers and hands out wrapped providers.
pub struct ResilienceLayer {
    policy: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl ResilienceLayer {
    pub fn new(policy: RetryPolicy, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            policy,
            breaker_config,
            breakers: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self::new(
            RetryPolicy::from(&settings.retry),
            CircuitBreakerConfig::from(&settings.circuit_breaker),
        )
    }

    pub fn wrap(&self, name: &str, inner: Arc<dyn ReasoningProvider>) -> Arc<ResilientProvider> {
        Arc::new(ResilientProvider::new(
            name,
            inner,
            self.breaker(name),
            self.policy.clone(),
        ))
    }

    /// Breaker for `name`, created on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.breaker_config.clone())))
            .clone()
    }

    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

impl Default for ResilienceLayer {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::TokenUsage;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Sequenced {
        replies: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: Mutex<u32>,
    }

    impl Sequenced {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl ReasoningProvider for Sequenced {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<ProviderResponse, ProviderError> {
            *self.calls.lock() += 1;
            let reply = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("default".to_string()))?;
            Ok(ProviderResponse {
                text: reply,
                usage: TokenUsage::default(),
                provider: "sequenced".to_string(),
                model: "test".to_string(),
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn layer() -> ResilienceLayer {
        ResilienceLayer::new(
            RetryPolicy::immediate(3),
            CircuitBreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(30),
                cooldown_multiplier: 2.0,
                max_cooldown: Duration::from_secs(600),
            },
        )
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let inner = Sequenced::new(vec![
            Err(ProviderError::RateLimit),
            Err(ProviderError::Timeout),
            Ok("answer".into()),
        ]);
        let provider = layer().wrap("primary", inner.clone());

        let response = provider
            .generate("q", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(response.text, "answer");
        assert_eq!(inner.calls(), 3);
        assert_eq!(provider.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_unavailable_and_open_circuit() {
        let inner = Sequenced::new(vec![
            Err(ProviderError::Network("reset".into())),
            Err(ProviderError::Network("reset".into())),
            Err(ProviderError::Network("reset".into())),
        ]);
        let layer = layer();
        let provider = layer.wrap("flaky", inner.clone());

        let err = provider
            .generate("q", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { attempts: 3, .. }));
        assert_eq!(layer.breaker("flaky").state(), CircuitState::Open);

        // Fails fast without touching the provider
        let err = provider
            .generate("q", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::CircuitOpen { .. }));
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let inner = Sequenced::new(vec![Err(ProviderError::Authentication("bad key".into()))]);
        let provider = layer().wrap("primary", inner.clone());

        let err = provider
            .generate("q", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert_eq!(inner.calls(), 1);
        assert_eq!(provider.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_wait_bound_stops_retries_early() {
        let inner = Sequenced::new(vec![
            Err(ProviderError::Timeout),
            Err(ProviderError::Timeout),
            Err(ProviderError::Timeout),
        ]);
        let layer = ResilienceLayer::new(
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(400),
                max_delay: Duration::from_secs(5),
                multiplier: 2.0,
                max_total_wait: Duration::from_millis(1000),
                jitter: 0.0,
            },
            CircuitBreakerConfig {
                failure_threshold: 10,
                ..CircuitBreakerConfig::default()
            },
        );
        let provider = layer.wrap("slow", inner.clone());

        let err = provider
            .generate("q", &GenerationOptions::default())
            .await
            .unwrap_err();
        // 400ms + 800ms would exceed the 1s wait budget after the second failure
        assert!(matches!(err, ProviderError::Unavailable { attempts: 2, .. }));
        assert_eq!(inner.calls(), 2);
    }

    struct Hanging;

    #[async_trait]
    impl ReasoningProvider for Hanging {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<ProviderResponse, ProviderError> {
            std::future::pending().await
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_probe_does_not_wedge_breaker() {
        let layer = layer();
        let breaker = layer.breaker("hang");
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let provider = layer.wrap("hang", Arc::new(Hanging));
        let options = GenerationOptions::default();
        let outcome =
            tokio::time::timeout(Duration::from_secs(5), provider.generate("q", &options)).await;
        assert!(outcome.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The abandoned probe released its slot, so the next call is admitted
        let healthy = layer.wrap("hang", Sequenced::new(vec![Ok("back".into())]));
        let response = healthy.generate("q", &options).await.unwrap();
        assert_eq!(response.text, "back");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_breakers_shared_by_name() {
        let layer = layer();
        let a = layer.breaker("primary");
        let b = layer.breaker("primary");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(layer.states(), vec![("primary".to_string(), CircuitState::Closed)]);
    }
}
