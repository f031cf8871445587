// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `aegis-host-core`: Host Agent Core
//!
//! Keeps a machine's node agents and firewall tables converged to an
//! externally supplied desired state.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `HostSpec`, `Acl`, line editors, collaborator traits |
//! | [`application`] | Application | `NodeAdmin`, rule reconciler, ACL maintainer, node agent |
//! | [`infrastructure`] | Infrastructure | iptables, command execution, DNS, file repository |

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
