// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod acl;
pub mod config;
pub mod run;

pub use acl::AclCommand;
pub use config::ConfigCommand;
