// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod checkpoint_gate;
pub mod ledger;
pub mod mission_engine;
pub mod planner;
pub mod repository_factory;
pub mod step_executor;
pub mod strategies;
pub mod team;

// Re-export services for convenience
pub use checkpoint_gate::{CheckpointGate, RaiseCheckpoint};
pub use ledger::MissionLedger;
pub use mission_engine::{MissionEngine, SubmitRequest};
pub use planner::{GeneratedPlan, PlanConstraints, PlanError, PlanGenerator, PlanSource};
pub use repository_factory::{create_mission_stores, storage_backend, MissionStores};
pub use step_executor::{StepExecution, StepExecutionError, StepExecutor};
pub use strategies::{ReasoningStrategy, StrategyContext, StrategyError, StrategyInput, StrategyOutcome, StrategyRegistry};
pub use team::{TeamAssembler, TeamAssignment};
