// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod event_bus;
pub mod llm;
pub mod repositories;
pub mod resilience;

pub use event_bus::{EventBusError, MissionEventBus, MissionEventStream};
pub use llm::ProviderRegistry;
pub use resilience::{ResilienceLayer, ResilientProvider};
