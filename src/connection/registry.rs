use super::RegionHandle;
use crate::core::{CoordinatorError, RegionHealth, RegionStatus, Result};
use crate::geo::RegionMap;
use crate::interface::{RegionConnection, RegionConnector};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Mutable per-region connection record.
///
/// `generation` identifies the connection installed by one successful
/// connect; every reconnect installs a new generation.
#[derive(Clone)]
pub struct ConnectionState {
    pub handle: Option<Arc<dyn RegionConnection>>,
    pub health: RegionHealth,
    pub last_checked: Option<DateTime<Utc>>,
    pub generation: u64,
}

impl ConnectionState {
    pub fn healthy(handle: Arc<dyn RegionConnection>, generation: u64) -> Self {
        Self {
            handle: Some(handle),
            health: RegionHealth::Healthy,
            last_checked: Some(Utc::now()),
            generation,
        }
    }

    pub fn unhealthy(generation: u64) -> Self {
        Self {
            handle: None,
            health: RegionHealth::Unhealthy,
            last_checked: Some(Utc::now()),
            generation,
        }
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("connected", &self.handle.is_some())
            .field("health", &self.health)
            .field("last_checked", &self.last_checked)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Snapshot of one registered region, taken for a health probe.
pub(crate) struct ProbeTarget {
    pub region: String,
    pub handle: Option<RegionHandle>,
    pub generation: u64,
}

/// What a failed health probe did to the registry.
pub(crate) enum FailedProbe {
    /// A newer connection was installed while the probe ran; nothing changed.
    Superseded,
    /// The probed connection was marked unhealthy. Its handle, if still
    /// attached, is returned for closing.
    Recorded(Option<Arc<dyn RegionConnection>>),
}

/// Owns one logical connection per region and its health.
///
/// The whole region map sits behind a single mutex that is only held for
/// map reads and writes, never across connect, probe or close calls.
/// A region missing from the map has never connected; a region marked
/// `Unhealthy` worked once and then failed.
pub struct ConnectionRegistry {
    regions: Arc<RegionMap>,
    connector: Arc<dyn RegionConnector>,
    states: Mutex<HashMap<String, ConnectionState>>,
    next_generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(regions: Arc<RegionMap>, connector: Arc<dyn RegionConnector>) -> Self {
        Self {
            regions,
            connector,
            states: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Opens a connection to every configured region.
    ///
    /// Failures are logged and leave the region absent. Returns the number
    /// of regions that connected.
    pub async fn connect_all(&self) -> usize {
        let ids: Vec<String> = self.regions.ids().map(str::to_string).collect();
        let attempts = ids.iter().map(|id| self.reconnect(id));
        futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|outcome| outcome.is_ok())
            .count()
    }

    /// Returns a handle believed healthy, reconnecting first when the stored
    /// connection is absent or marked unhealthy.
    pub async fn get(&self, region: &str) -> Result<RegionHandle> {
        {
            let states = self.states.lock().await;
            if let Some(state) = states.get(region) {
                if let (RegionHealth::Healthy, Some(handle)) = (state.health, &state.handle) {
                    return Ok(RegionHandle::new(region, state.generation, handle.clone()));
                }
            }
        }
        self.reconnect(region).await
    }

    /// Opens a fresh connection for `region` and installs it, closing the
    /// connection it replaces.
    ///
    /// When a concurrent caller already installed a newer healthy
    /// connection, that one is kept and the fresh one is closed.
    pub async fn reconnect(&self, region: &str) -> Result<RegionHandle> {
        let descriptor = self
            .regions
            .get(region)
            .ok_or_else(|| CoordinatorError::UnknownRegion(region.to_string()))?;

        let observed = self.states.lock().await.get(region).map(|s| s.generation);

        match self.connector.connect(region, &descriptor.store).await {
            Ok(connection) => {
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                let (handle, stale) = {
                    let mut states = self.states.lock().await;
                    match states.get(region) {
                        Some(current)
                            if Some(current.generation) != observed
                                && current.health == RegionHealth::Healthy
                                && current.handle.is_some() =>
                        {
                            let winner = current.handle.clone().map(|h| {
                                RegionHandle::new(region, current.generation, h)
                            });
                            (winner, Some(connection))
                        }
                        _ => {
                            let previous = states.insert(
                                region.to_string(),
                                ConnectionState::healthy(connection.clone(), generation),
                            );
                            (
                                Some(RegionHandle::new(region, generation, connection)),
                                previous.and_then(|state| state.handle),
                            )
                        }
                    }
                };

                if let Some(stale) = stale {
                    close_quietly(region, stale).await;
                }
                let handle = handle.ok_or_else(|| CoordinatorError::RegionUnavailable {
                    region: region.to_string(),
                    reason: "connection replaced concurrently".to_string(),
                })?;
                info!(region = %region, generation = handle.generation(), "region connected");
                Ok(handle)
            }
            Err(err) => {
                let previous = {
                    let mut states = self.states.lock().await;
                    states.get_mut(region).and_then(|state| {
                        state.health = RegionHealth::Unhealthy;
                        state.last_checked = Some(Utc::now());
                        state.handle.take()
                    })
                };
                if let Some(previous) = previous {
                    close_quietly(region, previous).await;
                }
                warn!(region = %region, error = %err, "region connection failed");
                Err(CoordinatorError::RegionUnavailable {
                    region: region.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Replaces the state of `region` atomically, closing the connection it
    /// displaces.
    pub async fn set(&self, region: &str, state: ConnectionState) {
        let new_generation = state.generation;
        let previous = self.states.lock().await.insert(region.to_string(), state);
        if let Some(previous) = previous {
            if previous.generation != new_generation {
                if let Some(handle) = previous.handle {
                    close_quietly(region, handle).await;
                }
            }
        }
    }

    /// Forgets `region` entirely, closing its connection.
    pub async fn remove(&self, region: &str) -> Option<ConnectionState> {
        let mut removed = self.states.lock().await.remove(region)?;
        if let Some(handle) = removed.handle.take() {
            close_quietly(region, handle).await;
        }
        Some(removed)
    }

    /// Marks a connection unhealthy after a connection-level failure so the
    /// next `get` reconnects. Ignored if the connection was already replaced.
    pub async fn invalidate(&self, region: &str, generation: u64) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(region) {
            if state.generation == generation && state.health == RegionHealth::Healthy {
                state.health = RegionHealth::Unhealthy;
                debug!(region = %region, generation, "connection invalidated");
            }
        }
    }

    pub async fn state(&self, region: &str) -> Option<ConnectionState> {
        self.states.lock().await.get(region).cloned()
    }

    pub async fn health(&self, region: &str) -> RegionHealth {
        self.states
            .lock()
            .await
            .get(region)
            .map(|state| state.health)
            .unwrap_or(RegionHealth::Disconnected)
    }

    /// Health of every configured region, in configuration order.
    pub async fn status(&self) -> Vec<RegionStatus> {
        let states = self.states.lock().await;
        self.regions
            .ids()
            .map(|id| match states.get(id) {
                Some(state) => RegionStatus {
                    region: id.to_string(),
                    health: state.health,
                    last_checked: state.last_checked,
                },
                None => RegionStatus {
                    region: id.to_string(),
                    health: RegionHealth::Disconnected,
                    last_checked: None,
                },
            })
            .collect()
    }

    pub(crate) async fn probe_targets(&self) -> Vec<ProbeTarget> {
        let states = self.states.lock().await;
        let mut targets: Vec<ProbeTarget> = states
            .iter()
            .map(|(region, state)| ProbeTarget {
                region: region.clone(),
                handle: state
                    .handle
                    .clone()
                    .map(|h| RegionHandle::new(region.as_str(), state.generation, h)),
                generation: state.generation,
            })
            .collect();
        targets.sort_by(|a, b| a.region.cmp(&b.region));
        targets
    }

    pub(crate) async fn record_healthy(&self, region: &str, generation: u64) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(region) {
            if state.generation == generation && state.handle.is_some() {
                if state.health != RegionHealth::Healthy {
                    info!(region = %region, "region recovered");
                }
                state.health = RegionHealth::Healthy;
                state.last_checked = Some(Utc::now());
            }
        }
    }

    /// Marks `region` unhealthy and detaches its connection for closing,
    /// unless a newer connection was installed since the probe started.
    pub(crate) async fn record_failed(&self, region: &str, generation: u64) -> FailedProbe {
        let mut states = self.states.lock().await;
        let Some(state) = states.get_mut(region) else {
            return FailedProbe::Superseded;
        };
        if state.generation != generation {
            return FailedProbe::Superseded;
        }
        state.health = RegionHealth::Unhealthy;
        state.last_checked = Some(Utc::now());
        FailedProbe::Recorded(state.handle.take())
    }

    /// Closes every connection. Regions stay registered as `Disconnected`.
    pub async fn close_all(&self) {
        let handles: Vec<(String, Arc<dyn RegionConnection>)> = {
            let mut states = self.states.lock().await;
            states
                .iter_mut()
                .filter_map(|(region, state)| {
                    state.health = RegionHealth::Disconnected;
                    state.handle.take().map(|h| (region.clone(), h))
                })
                .collect()
        };
        for (region, handle) in handles {
            close_quietly(&region, handle).await;
        }
    }
}

async fn close_quietly(region: &str, handle: Arc<dyn RegionConnection>) {
    if let Err(err) = handle.close().await {
        debug!(region = %region, error = %err, "ignoring error while closing connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::StoreParams;
    use crate::geo::{RegionBounds, RegionDescriptor};
    use crate::storage::MemoryConnector;

    fn registry() -> (ConnectionRegistry, MemoryConnector) {
        let regions = RegionMap::new(vec![
            RegionDescriptor::new(
                "us-east",
                "US East",
                RegionBounds::new((25.0, 45.0), (-80.0, -65.0)),
                StoreParams::default(),
            ),
            RegionDescriptor::new(
                "us-west",
                "US West",
                RegionBounds::new((30.0, 50.0), (-125.0, -110.0)),
                StoreParams::default(),
            ),
        ])
        .unwrap();
        let connector = MemoryConnector::with_regions(["us-east", "us-west"]);
        let registry = ConnectionRegistry::new(Arc::new(regions), Arc::new(connector.clone()));
        (registry, connector)
    }

    #[tokio::test]
    async fn test_absent_region_connects_on_demand() {
        let (registry, connector) = registry();
        assert_eq!(registry.health("us-east").await, RegionHealth::Disconnected);

        let handle = registry.get("us-east").await.unwrap();
        assert_eq!(handle.region(), "us-east");
        assert_eq!(registry.health("us-east").await, RegionHealth::Healthy);

        // healthy connections are reused
        registry.get("us-east").await.unwrap();
        assert_eq!(connector.store("us-east").unwrap().connect_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_first_connect_leaves_region_absent() {
        let (registry, connector) = registry();
        connector.store("us-west").unwrap().set_reachable(false);

        let err = registry.get("us-west").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::RegionUnavailable { .. }));
        assert!(registry.state("us-west").await.is_none());
        assert_eq!(registry.health("us-west").await, RegionHealth::Disconnected);
    }

    #[tokio::test]
    async fn test_unhealthy_region_reconnects_and_closes_old_handle() {
        let (registry, connector) = registry();
        let store = connector.store("us-east").unwrap();
        let first = registry.get("us-east").await.unwrap();

        registry.invalidate("us-east", first.generation()).await;
        assert_eq!(registry.health("us-east").await, RegionHealth::Unhealthy);

        let second = registry.get("us-east").await.unwrap();
        assert_ne!(first.generation(), second.generation());
        assert_eq!(store.connect_count(), 2);
        assert_eq!(store.close_count(), 1);
        assert!(first.ping().await.is_err());
        assert!(second.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_reconnect_marks_previously_working_region_unhealthy() {
        let (registry, connector) = registry();
        let store = connector.store("us-east").unwrap();
        let handle = registry.get("us-east").await.unwrap();

        store.set_reachable(false);
        registry.invalidate("us-east", handle.generation()).await;
        assert!(registry.get("us-east").await.is_err());

        let state = registry.state("us-east").await.unwrap();
        assert_eq!(state.health, RegionHealth::Unhealthy);
        assert!(state.handle.is_none());
    }

    #[tokio::test]
    async fn test_stale_invalidate_is_ignored() {
        let (registry, _) = registry();
        let first = registry.get("us-east").await.unwrap();
        registry.invalidate("us-east", first.generation()).await;
        let second = registry.get("us-east").await.unwrap();

        registry.invalidate("us-east", first.generation()).await;
        assert_eq!(registry.health("us-east").await, RegionHealth::Healthy);
        assert_eq!(
            registry.get("us-east").await.unwrap().generation(),
            second.generation()
        );
    }

    #[tokio::test]
    async fn test_set_remove_and_close_all() {
        let (registry, connector) = registry();
        let store = connector.store("us-east").unwrap();
        assert_eq!(registry.connect_all().await, 2);

        registry.set("us-east", ConnectionState::unhealthy(999)).await;
        assert_eq!(store.close_count(), 1);
        assert_eq!(registry.health("us-east").await, RegionHealth::Unhealthy);

        assert!(registry.remove("us-east").await.is_some());
        assert!(registry.remove("us-east").await.is_none());

        registry.close_all().await;
        let status = registry.status().await;
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.health == RegionHealth::Disconnected));
        assert_eq!(connector.store("us-west").unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_region() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.get("mars").await,
            Err(CoordinatorError::UnknownRegion(_))
        ));
    }
}
