use crate::connection::registry::{ConnectionRegistry, FailedProbe, ProbeTarget};
use crate::core::{CoordinatorError, RegionHealth, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, error, info, warn};

/// Outcome of probing one region during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub region: String,
    pub health: RegionHealth,
    pub reconnected: bool,
}

/// Probes every registered region once.
///
/// Probes run concurrently and each is bounded by `probe_timeout`, so a
/// slow store never delays another region's classification. A failed
/// probe closes the connection and makes a single reconnect attempt.
pub async fn run_health_tick(
    registry: &ConnectionRegistry,
    probe_timeout: Duration,
) -> Vec<ProbeReport> {
    let targets = registry.probe_targets().await;
    let probes = targets
        .into_iter()
        .map(|target| probe_region(registry, target, probe_timeout));
    futures::future::join_all(probes).await
}

async fn probe_region(
    registry: &ConnectionRegistry,
    target: ProbeTarget,
    probe_timeout: Duration,
) -> ProbeReport {
    let ProbeTarget {
        region,
        handle,
        generation,
    } = target;

    let failure = match handle {
        Some(handle) => match timeout(probe_timeout, handle.ping()).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("probe timed out after {:?}", probe_timeout)),
        },
        None => Some("no open connection".to_string()),
    };

    if failure.is_none() {
        registry.record_healthy(&region, generation).await;
        debug!(region = %region, "probe ok");
        return ProbeReport {
            region,
            health: RegionHealth::Healthy,
            reconnected: false,
        };
    }

    if let Some(reason) = &failure {
        warn!(region = %region, reason = %reason, "health probe failed");
    }
    match registry.record_failed(&region, generation).await {
        FailedProbe::Superseded => {
            debug!(region = %region, generation, "connection replaced during probe");
            return ProbeReport {
                health: registry.health(&region).await,
                region,
                reconnected: false,
            };
        }
        FailedProbe::Recorded(Some(stale)) => {
            if let Err(err) = stale.close().await {
                debug!(region = %region, error = %err, "ignoring error while closing connection");
            }
        }
        FailedProbe::Recorded(None) => {}
    }

    match registry.reconnect(&region).await {
        Ok(_) => ProbeReport {
            region,
            health: RegionHealth::Healthy,
            reconnected: true,
        },
        Err(err) => {
            warn!(region = %region, error = %err, "reconnect after failed probe did not succeed");
            ProbeReport {
                region,
                health: RegionHealth::Unhealthy,
                reconnected: false,
            }
        }
    }
}

/// Background task that periodically health-checks every region.
///
/// Stopped with [`HealthMonitor::stop`]; dropping a running monitor aborts
/// the task.
pub struct HealthMonitor {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn spawn(
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let interval = interval.max(Duration::from_millis(10));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "health monitor started");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        let reports = run_health_tick(&registry, probe_timeout).await;
                        let unhealthy = reports
                            .iter()
                            .filter(|r| r.health != RegionHealth::Healthy)
                            .count();
                        debug!(regions = reports.len(), unhealthy, "health tick complete");
                    }
                }
            }
            info!("health monitor stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the monitor to stop and waits for the current tick to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await.map_err(|err| {
                error!(error = %err, "health monitor task failed");
                CoordinatorError::BackgroundTask(format!("health monitor join: {}", err))
            })?;
        }
        Ok(())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
