use super::{Coordinator, Lookup};
use super::retry::with_timeout;
use crate::core::{CoordinatorError, NewRide, Ride, RideFilter, Result};
use crate::storage::statement::RideStatement;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl Coordinator {
    /// Inserts a new ride into the region owning its pickup point, or into
    /// the first reachable fallback when that region is down.
    ///
    /// The stored `region` is where the row actually landed. Once an insert
    /// fails with a connection error its outcome is unknown, so later
    /// attempts stay on that region and check for the row before inserting
    /// again. They never fall back elsewhere.
    pub async fn create(&self, request: NewRide) -> Result<Ride> {
        request.validate()?;
        let mut request = request;
        if request.pickup_geohash.is_none() {
            request.pickup_geohash =
                Some(self.hasher.encode(request.pickup_lat, request.pickup_lon));
        }

        let preferred = self
            .regions
            .resolve(request.pickup_lat, request.pickup_lon)
            .to_string();
        let ride_id = Uuid::new_v4();
        let timestamp = Utc::now();
        let uncertain: Mutex<Option<String>> = Mutex::new(None);

        let call = self.retry.run("create", |_| {
            let request = request.clone();
            let preferred = preferred.as_str();
            let uncertain = &uncertain;
            async move {
                let pinned = uncertain.lock().await.clone();
                let handle = match pinned {
                    Some(region) => {
                        let handle = self.registry.get(&region).await?;
                        let existing = self
                            .execute(&handle, &RideStatement::SelectById(ride_id))
                            .await?
                            .into_first();
                        if let Some(existing) = existing {
                            debug!(
                                ride_id = %ride_id,
                                region = %region,
                                "earlier insert was committed"
                            );
                            return Ok(existing);
                        }
                        handle
                    }
                    None => self.available_region(preferred, "create").await?,
                };

                let ride = request.into_ride(ride_id, handle.region(), timestamp);
                match self
                    .execute(&handle, &RideStatement::Insert(ride.clone()))
                    .await
                {
                    Ok(outcome) => Ok(outcome.into_first().unwrap_or(ride)),
                    Err(err) => {
                        if err.is_transient() {
                            *uncertain.lock().await = Some(handle.region().to_string());
                        }
                        Err(err)
                    }
                }
            }
        });
        let ride = with_timeout("create", self.operation_timeout, call).await?;

        info!(ride_id = %ride.ride_id, region = %ride.region, "ride created");
        Ok(ride)
    }

    /// Looks a ride up in every region. `Ok(None)` when no region holds it.
    pub async fn get(&self, ride_id: Uuid) -> Result<Option<Ride>> {
        let found = with_timeout(
            "get",
            self.operation_timeout,
            self.find(ride_id, Lookup::BestEffort),
        )
        .await?;
        Ok(found.map(|(_, ride)| ride))
    }

    /// Lists rides matching `filter`, newest first.
    ///
    /// Without a region filter every region is queried concurrently and the
    /// merged result is truncated to `filter.limit`. Regions that fail
    /// contribute no rows.
    pub async fn list(&self, filter: RideFilter) -> Result<Vec<Ride>> {
        with_timeout("list", self.operation_timeout, self.list_rides(filter)).await
    }

    async fn list_rides(&self, filter: RideFilter) -> Result<Vec<Ride>> {
        let targets: Vec<&str> = match &filter.region {
            Some(region) if !self.regions.contains(region) => {
                debug!(region = %region, "list filter names an unknown region");
                return Ok(Vec::new());
            }
            Some(region) => vec![region.as_str()],
            None => self.regions.ids().collect(),
        };

        let statement = RideStatement::Select(filter.clone());
        let shards = join_all(targets.iter().map(|region| self.select_shard(region, &statement)));
        let mut rides: Vec<Ride> = shards.await.into_iter().flatten().collect();

        rides.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rides.truncate(filter.limit);
        Ok(rides)
    }

    async fn select_shard(&self, region: &str, statement: &RideStatement) -> Vec<Ride> {
        let outcome = match self.registry.get(region).await {
            Ok(handle) => self.execute(&handle, statement).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(outcome) => outcome.into_rows(),
            Err(err) => {
                warn!(region = %region, error = %err, "region skipped while listing rides");
                Vec::new()
            }
        }
    }

    /// Deletes a ride from whichever region holds it. Returns whether a row
    /// was removed.
    pub async fn delete(&self, ride_id: Uuid) -> Result<bool> {
        let call = self.retry.run("delete", |_| async move {
            let Some((region, _)) = self.find(ride_id, Lookup::Exhaustive).await? else {
                return Ok(false);
            };
            let handle = self.registry.get(&region).await?;
            let removed = self
                .execute(&handle, &RideStatement::Delete(ride_id))
                .await?
                .affected();
            Ok(removed > 0)
        });
        let removed = with_timeout("delete", self.operation_timeout, call).await?;
        if removed {
            info!(ride_id = %ride_id, "ride deleted");
        }
        Ok(removed)
    }

    /// Fails with `UnknownRegion` if `region` is not configured.
    pub fn ensure_region(&self, region: &str) -> Result<()> {
        if self.regions.contains(region) {
            Ok(())
        } else {
            Err(CoordinatorError::UnknownRegion(region.to_string()))
        }
    }
}
