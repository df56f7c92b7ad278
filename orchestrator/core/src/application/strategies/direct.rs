// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;

use super::{ReasoningStrategy, StrategyContext, StrategyError, StrategyInput, StrategyOutcome};
use crate::domain::llm::TokenUsage;
use crate::domain::plan::TraceEntry;

/// Single generation; the provider's answer is taken at face value.
pub struct DirectStrategy;

#[async_trait]
impl ReasoningStrategy for DirectStrategy {
    fn name(&self) -> &str {
        "direct"
    }

    async fn run(
        &self,
        input: &StrategyInput,
        context: &StrategyContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let mut usage = TokenUsage::default();
        let result = context.generate(&input.prompt, None, &mut usage).await?;
        Ok(StrategyOutcome {
            result,
            confidence: 1.0,
            trace: vec![TraceEntry::new("generate", context.provider_name.clone())],
            usage,
        })
    }
}
