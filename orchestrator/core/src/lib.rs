// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mission Orchestration Core
//!
//! Drives long-running, multi-step, multi-agent missions from goal intake
//! through plan generation, stepwise execution, human approval gates and
//! final artifact delivery.
//!
//! # Architecture
//!
//! | Layer | Contents |
//! |-------|----------|
//! | `domain` | Mission aggregate, event log and projection fold, repository and provider traits |
//! | `application` | `MissionEngine`, `CheckpointGate`, plan generation, team assembly, strategy library |
//! | `infrastructure` | Resilience layer, provider adapters, event stream, in-memory and PostgreSQL stores |

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
