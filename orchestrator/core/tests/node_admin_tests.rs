// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the fleet orchestrator driving real ACL node agents
//! against in-memory rule tables.

mod common;

use aegis_host_core::application::acl_maintainer::AclMaintainer;
use aegis_host_core::application::node_admin::{NodeAdmin, NodeAdminConfig};
use aegis_host_core::application::node_agent::AclNodeAgentFactory;
use aegis_host_core::domain::acl::Acl;
use aegis_host_core::domain::host::{HostSpec, Hostname, IpVersion};
use aegis_host_core::domain::rule_table::TableId;
use common::{MemoryRuleTable, StaticResolver};
use std::sync::Arc;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(20);

fn fleet() -> (Arc<MemoryRuleTable>, NodeAdmin) {
    let tables = Arc::new(MemoryRuleTable::default());
    let resolver = Arc::new(
        StaticResolver::default()
            .with("host1", "10.0.0.1")
            .with("host2", "10.0.0.2"),
    );
    let maintainer = Arc::new(AclMaintainer::new(tables.clone(), resolver));
    let factory = Arc::new(AclNodeAgentFactory::new(maintainer, TICK_INTERVAL));
    let config = NodeAdminConfig {
        freeze_timeout: Duration::from_secs(2),
        ..NodeAdminConfig::default()
    };
    (tables, NodeAdmin::new(factory, config))
}

fn host(hostname: &str, port: u16) -> HostSpec {
    HostSpec::new(hostname, Acl::new(vec![port], vec![]))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_agents_converge_their_hosts() {
    let (tables, admin) = fleet();
    admin.set_frozen(false).await;

    admin.refresh(vec![host("host1", 22), host("host2", 4443)]).await;

    let wanted = Acl::new(vec![4443], vec![]).to_rules(IpVersion::V4);
    wait_until(|| tables.rules("host2", &TableId::filter(IpVersion::V4)) == wanted).await;
    wait_until(|| !tables.rules("host1", &TableId::nat(IpVersion::V4)).is_empty()).await;

    admin.stop().await;
}

#[tokio::test]
async fn test_new_context_reaches_running_agent() {
    let (tables, admin) = fleet();
    admin.set_frozen(false).await;
    admin.refresh(vec![host("host1", 22)]).await;
    wait_until(|| tables.replace_count() > 0).await;

    admin.refresh(vec![host("host1", 8080)]).await;

    let wanted = Acl::new(vec![8080], vec![]).to_rules(IpVersion::V6);
    wait_until(|| tables.rules("host1", &TableId::filter(IpVersion::V6)) == wanted).await;
    assert_eq!(admin.managed_hostnames(), vec![Hostname::new("host1")]);

    admin.stop().await;
}

#[tokio::test]
async fn test_frozen_fleet_stops_converging() {
    let (tables, admin) = fleet();
    admin.set_frozen(false).await;
    admin.refresh(vec![host("host1", 22), host("host2", 22)]).await;
    wait_until(|| tables.replace_count() >= 6).await;

    assert!(admin.set_frozen(true).await);
    assert!(admin.is_frozen());

    // Drifted tables stay drifted while frozen
    tables.set("host1", TableId::filter(IpVersion::V4), &["-A INPUT -j DROP"]);
    tokio::time::sleep(TICK_INTERVAL * 5).await;
    assert_eq!(
        tables.rules("host1", &TableId::filter(IpVersion::V4)),
        vec!["-A INPUT -j DROP"]
    );

    assert!(admin.set_frozen(false).await);
    let wanted = Acl::new(vec![22], vec![]).to_rules(IpVersion::V4);
    wait_until(|| tables.rules("host1", &TableId::filter(IpVersion::V4)) == wanted).await;

    admin.stop().await;
}

#[tokio::test]
async fn test_removed_host_is_stopped() {
    let (_, admin) = fleet();
    admin.refresh(vec![host("host1", 22), host("host2", 22)]).await;

    let summary = admin.refresh(vec![host("host2", 22)]).await;

    assert_eq!(summary.stopped, vec![Hostname::new("host1")]);
    assert!(summary.started.is_empty());
    assert_eq!(admin.managed_hostnames(), vec![Hostname::new("host2")]);
    admin.stop().await;
}

#[tokio::test]
async fn test_stop_hosts_ignores_unknown_hostnames() {
    let (_, admin) = fleet();
    admin.refresh(vec![host("host1", 22)]).await;

    admin
        .stop_hosts(&[Hostname::new("host1"), Hostname::new("unknown")])
        .await;

    assert_eq!(admin.managed_hostnames(), vec![Hostname::new("host1")]);
    admin.stop().await;
}
