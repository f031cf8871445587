// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model of the host agent: hosts, ACLs, rule tables, line editing and
//! the contracts of external collaborators.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and traits shared by the application and infrastructure layers

pub mod acl;
pub mod config;
pub mod host;
pub mod line_edit;
pub mod network;
pub mod node_agent;
pub mod node_repository;
pub mod rule_table;
