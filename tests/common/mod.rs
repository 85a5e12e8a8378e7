#![allow(dead_code)]

use rideshard::{Coordinator, CoordinatorConfig, MemoryConnector, MemoryRegionStore, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

pub const REGIONS: [&str; 4] = ["us-east", "us-west", "eu-central", "ap-south"];

pub const NEW_YORK: (f64, f64) = (40.0, -74.0);
pub const LOS_ANGELES: (f64, f64) = (34.0, -118.0);
pub const FRANKFURT: (f64, f64) = (50.1, 8.7);
pub const MUMBAI: (f64, f64) = (19.0, 72.8);
pub const SYDNEY: (f64, f64) = (-33.9, 151.2);

/// Built-in four-region layout, no retry delay, monitor effectively idle.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .retry(RetryPolicy::immediate(3))
        .health_check_interval(Duration::from_secs(3600))
}

pub fn connector() -> MemoryConnector {
    MemoryConnector::with_regions(REGIONS)
}

pub async fn start(config: CoordinatorConfig, connector: &MemoryConnector) -> Coordinator {
    Coordinator::connect(config, Arc::new(connector.clone()))
        .await
        .unwrap()
}

pub async fn coordinator() -> (Coordinator, MemoryConnector) {
    let connector = connector();
    let coordinator = start(test_config(), &connector).await;
    (coordinator, connector)
}

pub fn store(connector: &MemoryConnector, region: &str) -> Arc<MemoryRegionStore> {
    connector.store(region).unwrap()
}

pub async fn total_rows(connector: &MemoryConnector) -> usize {
    let mut total = 0;
    for region in REGIONS {
        total += store(connector, region).len().await;
    }
    total
}
