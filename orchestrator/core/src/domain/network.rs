// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::net::IpAddr;

use crate::domain::host::{Hostname, IpVersion};

/// Resolves the address a host is reachable on for a given protocol version.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, hostname: &Hostname, ip_version: IpVersion) -> Option<IpAddr>;
}
