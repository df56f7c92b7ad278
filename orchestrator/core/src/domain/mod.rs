// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: the mission aggregate, its event log, and the contracts the
//! application layer depends on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entities, value objects, events, repository and provider traits

pub mod agent;
pub mod artifact;
pub mod checkpoint;
pub mod engine_config;
pub mod error;
pub mod events;
pub mod llm;
pub mod mission;
pub mod plan;
pub mod projection;
pub mod repository;
