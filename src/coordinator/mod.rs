//! Region-aware ride coordination.
//!
//! The [`Coordinator`] owns the connection registry and the health monitor
//! for its whole lifetime. Every ride operation resolves its shard here.

pub mod config;
pub mod health;
mod migration;
pub mod retry;
mod rides;

use crate::connection::RegionHandle;
use crate::connection::registry::ConnectionRegistry;
use crate::core::{CoordinatorError, RegionStatus, Result, Ride};
use crate::geo::{GeoHasher, RegionMap};
use crate::interface::RegionConnector;
use crate::storage::statement::{RideStatement, StatementOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub use config::CoordinatorConfig;
pub use health::{HealthMonitor, ProbeReport, run_health_tick};
pub use retry::RetryPolicy;

pub struct Coordinator {
    regions: Arc<RegionMap>,
    registry: Arc<ConnectionRegistry>,
    monitor: Mutex<Option<HealthMonitor>>,
    retry: RetryPolicy,
    hasher: GeoHasher,
    operation_timeout: Option<Duration>,
    probe_timeout: Duration,
}

impl Coordinator {
    /// Validates `config`, connects to every region and starts the health
    /// monitor.
    ///
    /// Regions that cannot be reached at startup are logged and stay
    /// disconnected until an operation or a later reconnect needs them.
    pub async fn connect(
        config: CoordinatorConfig,
        connector: Arc<dyn RegionConnector>,
    ) -> Result<Self> {
        let coordinator = Self::connect_without_monitor(config.clone(), connector).await?;
        let monitor = HealthMonitor::spawn(
            coordinator.registry.clone(),
            config.health_check_interval_duration(),
            coordinator.probe_timeout,
        );
        *coordinator.monitor.lock().await = Some(monitor);
        Ok(coordinator)
    }

    /// Like [`Coordinator::connect`] but health is only checked on demand
    /// through [`Coordinator::check_health`].
    pub async fn connect_without_monitor(
        config: CoordinatorConfig,
        connector: Arc<dyn RegionConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let regions = Arc::new(config.region_map()?);
        let hasher = GeoHasher::new(config.geohash_precision)?;
        let registry = Arc::new(ConnectionRegistry::new(regions.clone(), connector));

        let connected = registry.connect_all().await;
        info!(
            connected,
            configured = regions.descriptors().len(),
            "coordinator started"
        );

        Ok(Self {
            regions,
            registry,
            monitor: Mutex::new(None),
            retry: config.retry.clone(),
            hasher,
            operation_timeout: config.operation_timeout_duration(),
            probe_timeout: config.probe_timeout_duration(),
        })
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn geohasher(&self) -> &GeoHasher {
        &self.hasher
    }

    /// Region that owns a pickup point.
    pub fn resolve_region(&self, lat: f64, lon: f64) -> &str {
        self.regions.resolve(lat, lon)
    }

    /// Health of every configured region. Read-only.
    pub async fn connection_status(&self) -> Vec<RegionStatus> {
        self.registry.status().await
    }

    /// Runs one health tick immediately.
    pub async fn check_health(&self) -> Vec<ProbeReport> {
        run_health_tick(&self.registry, self.probe_timeout).await
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(HealthMonitor::is_running)
    }

    /// Stops the health monitor and closes every connection.
    pub async fn shutdown(&self) -> Result<()> {
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.stop().await?;
        }
        self.registry.close_all().await;
        info!("coordinator shut down");
        Ok(())
    }

    /// Executes on `handle`, invalidating its connection on a
    /// connection-level failure so the next attempt reconnects.
    async fn execute(
        &self,
        handle: &RegionHandle,
        statement: &RideStatement,
    ) -> Result<StatementOutcome> {
        let outcome = handle.execute(statement).await;
        if let Err(err) = &outcome {
            if err.is_transient() {
                self.registry
                    .invalidate(handle.region(), handle.generation())
                    .await;
            }
        }
        outcome
    }

    /// Preferred region if reachable, else the first reachable fallback.
    async fn available_region(&self, preferred: &str, operation: &str) -> Result<RegionHandle> {
        let preferred_err = match self.registry.get(preferred).await {
            Ok(handle) => return Ok(handle),
            Err(err) => err,
        };

        for fallback in self.regions.fallbacks_for(preferred) {
            if let Ok(handle) = self.registry.get(fallback).await {
                warn!(
                    preferred = %preferred,
                    fallback = %fallback,
                    error = %preferred_err,
                    "preferred region unavailable, using fallback"
                );
                return Ok(handle);
            }
        }

        Err(CoordinatorError::NoRegionsAvailable(format!(
            "{} (preferred region '{}': {})",
            operation, preferred, preferred_err
        )))
    }

    /// Probes every region in configuration order for `ride_id`.
    ///
    /// Returns the shard that answered with the row. How regions that could
    /// not be searched affect an absent result depends on `lookup`.
    async fn find(&self, ride_id: Uuid, lookup: Lookup) -> Result<Option<(String, Ride)>> {
        let statement = RideStatement::SelectById(ride_id);
        let mut answered = false;
        let mut first_err = None;

        for region in self.regions.ids() {
            let outcome = match self.registry.get(region).await {
                Ok(handle) => self.execute(&handle, &statement).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(outcome) => {
                    answered = true;
                    if let Some(ride) = outcome.into_first() {
                        return Ok(Some((region.to_string(), ride)));
                    }
                }
                Err(err) => {
                    warn!(region = %region, ride_id = %ride_id, error = %err, "lookup skipped region");
                    first_err.get_or_insert(err);
                }
            }
        }

        match (first_err, answered, lookup) {
            (None, _, _) | (Some(_), true, Lookup::BestEffort) => Ok(None),
            (Some(err), true, Lookup::Exhaustive) => Err(err),
            (Some(err), false, _) => Err(CoordinatorError::NoRegionsAvailable(format!(
                "lookup of ride {} ({})",
                ride_id, err
            ))),
        }
    }
}

/// How [`Coordinator::find`] reports a ride it did not see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    /// Absent as soon as one region answered. Used by reads.
    BestEffort,
    /// Absent only when every region answered; otherwise the first region
    /// failure is returned so a retry can search it again. Used before
    /// writes.
    Exhaustive,
}
