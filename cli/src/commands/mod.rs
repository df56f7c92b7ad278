// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for missionctl

pub mod config;
pub mod migrate;
pub mod mission;

pub use self::config::ConfigCommand;
pub use self::migrate::MigrateCommand;
pub use self::mission::MissionCommand;
