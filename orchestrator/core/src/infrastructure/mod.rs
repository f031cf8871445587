// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod command;
pub mod iptables;
pub mod dns;
pub mod node_repository;

pub use command::{CommandExecutor, ProcessCommandExecutor};
pub use dns::DnsAddressResolver;
pub use iptables::IptablesRuleTable;
pub use node_repository::FileNodeRepository;
