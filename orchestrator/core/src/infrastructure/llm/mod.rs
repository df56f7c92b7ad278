// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Reasoning Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates between the domain ReasoningProvider contract and an
// external text-generation API. The registry wraps every adapter with the
// resilience layer before handing it to the engine.

pub mod openai;
pub mod ollama;
pub mod registry;

pub use registry::ProviderRegistry;

/// Budget-unit cost of a call from its token count.
pub(crate) fn token_cost(total_tokens: u32, cost_per_1k_tokens: f64) -> f64 {
    (total_tokens as f64 / 1000.0) * cost_per_1k_tokens
}
