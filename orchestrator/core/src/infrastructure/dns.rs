// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::net::IpAddr;
use tracing::debug;

use crate::domain::host::{Hostname, IpVersion};
use crate::domain::network::AddressResolver;

/// Resolves host addresses through the system resolver.
#[derive(Debug, Clone, Default)]
pub struct DnsAddressResolver;

impl DnsAddressResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AddressResolver for DnsAddressResolver {
    async fn resolve(&self, hostname: &Hostname, ip_version: IpVersion) -> Option<IpAddr> {
        match tokio::net::lookup_host((hostname.as_str(), 0)).await {
            Ok(addresses) => addresses
                .map(|socket| socket.ip())
                .find(|address| ip_version.matches(address)),
            Err(e) => {
                debug!(hostname = %hostname, error = %e, "Address lookup failed");
                None
            }
        }
    }
}
