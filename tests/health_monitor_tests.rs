/// Health monitor tests
///
/// Background probing, recovery and shutdown
/// Run with: cargo test --test health_monitor_tests
mod common;

use common::*;
use rideshard::{Coordinator, NewRide, RegionHealth};
use std::time::Duration;
use uuid::Uuid;

async fn wait_for_health(coordinator: &Coordinator, region: &str, expected: RegionHealth) {
    for _ in 0..200 {
        let status = coordinator.connection_status().await;
        if status
            .iter()
            .any(|s| s.region == region && s.health == expected)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("region {region} never became {expected}");
}

#[tokio::test]
async fn test_monitor_tracks_outage_and_recovery() {
    let connector = connector();
    let config = test_config().health_check_interval(Duration::from_millis(20));
    let coordinator = start(config, &connector).await;
    assert!(coordinator.is_monitoring().await);

    let west = store(&connector, "us-west");
    west.set_reachable(false);
    wait_for_health(&coordinator, "us-west", RegionHealth::Unhealthy).await;

    let status = coordinator.connection_status().await;
    assert!(
        status
            .iter()
            .filter(|s| s.region != "us-west")
            .all(|s| s.health == RegionHealth::Healthy)
    );

    west.set_reachable(true);
    wait_for_health(&coordinator, "us-west", RegionHealth::Healthy).await;
    assert!(west.connect_count() >= 2);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_health_check() {
    let (coordinator, connector) = coordinator().await;
    store(&connector, "eu-central").set_reachable(false);

    let reports = coordinator.check_health().await;
    assert_eq!(reports.len(), 4);
    let eu = reports.iter().find(|r| r.region == "eu-central").unwrap();
    assert_eq!(eu.health, RegionHealth::Unhealthy);

    let status = coordinator.connection_status().await;
    let eu = status.iter().find(|s| s.region == "eu-central").unwrap();
    assert_eq!(eu.health, RegionHealth::Unhealthy);
    assert!(eu.last_checked.is_some());
}

#[tokio::test]
async fn test_unhealthy_region_recovers_on_demand() {
    let (coordinator, connector) = coordinator().await;
    let east = store(&connector, "us-east");
    east.set_reachable(false);
    coordinator.check_health().await;

    let fallback = coordinator
        .create(NewRide::new(Uuid::new_v4(), NEW_YORK, NEW_YORK))
        .await
        .unwrap();
    assert_eq!(fallback.region, "us-west");

    east.set_reachable(true);
    let home = coordinator
        .create(NewRide::new(Uuid::new_v4(), NEW_YORK, NEW_YORK))
        .await
        .unwrap();
    assert_eq!(home.region, "us-east");

    let status = coordinator.connection_status().await;
    assert_eq!(status[0].health, RegionHealth::Healthy);
}

#[tokio::test]
async fn test_shutdown_stops_monitor_and_closes_connections() {
    let connector = connector();
    let config = test_config().health_check_interval(Duration::from_millis(10));
    let coordinator = start(config, &connector).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    coordinator.shutdown().await.unwrap();
    assert!(!coordinator.is_monitoring().await);
    for region in REGIONS {
        assert_eq!(store(&connector, region).close_count(), 1);
    }

    // nothing reconnects after shutdown
    tokio::time::sleep(Duration::from_millis(30)).await;
    let status = coordinator.connection_status().await;
    assert!(status.iter().all(|s| s.health == RegionHealth::Disconnected));
}
