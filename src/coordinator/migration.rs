use super::{Coordinator, Lookup};
use super::retry::with_timeout;
use crate::core::{CoordinatorError, Result, Ride, RidePatch};
use crate::storage::statement::RideStatement;
use tracing::{error, info};
use uuid::Uuid;

impl Coordinator {
    /// Applies `patch` to a ride.
    ///
    /// When the effective pickup point falls in a different region the ride
    /// is moved: deleted from its current region, then inserted into the new
    /// one. The two steps are not atomic. If the insert fails after the
    /// delete, the call fails with `MigrationPartialFailure` carrying the row
    /// that must be restored by hand.
    ///
    /// Returns `Ok(None)` when the ride does not exist.
    pub async fn update(&self, ride_id: Uuid, patch: RidePatch) -> Result<Option<Ride>> {
        patch.validate()?;

        let call = self.retry.run("update", |_| {
            let patch = &patch;
            async move { self.update_once(ride_id, patch).await }
        });
        with_timeout("update", self.operation_timeout, call).await
    }

    async fn update_once(&self, ride_id: Uuid, patch: &RidePatch) -> Result<Option<Ride>> {
        let Some((current_region, current)) = self.find(ride_id, Lookup::Exhaustive).await?
        else {
            return Ok(None);
        };

        let (lat, lon) = patch.effective_pickup(&current);
        let target_region = self.regions.resolve(lat, lon).to_string();

        let mut patch = patch.clone();
        if patch.touches_pickup() && patch.pickup_geohash.is_none() {
            patch.pickup_geohash = Some(self.hasher.encode(lat, lon));
        }

        if target_region != current_region {
            return self
                .migrate(ride_id, &current_region, &target_region, &patch)
                .await;
        }

        let Some(statement) =
            RideStatement::update_from_patch(ride_id, &patch, Some(&target_region))
        else {
            return Ok(Some(current));
        };
        let handle = self.registry.get(&current_region).await?;
        let updated = self.execute(&handle, &statement).await?.into_first();
        Ok(updated)
    }

    /// Moves a ride between regions with delete-then-insert.
    ///
    /// Both connections are acquired and the target is probed before
    /// anything is deleted, so an unreachable target leaves the source row
    /// untouched.
    async fn migrate(
        &self,
        ride_id: Uuid,
        from: &str,
        to: &str,
        patch: &RidePatch,
    ) -> Result<Option<Ride>> {
        let source = self.registry.get(from).await?;
        let target = self.registry.get(to).await?;
        if let Err(err) = target.ping().await {
            self.registry.invalidate(to, target.generation()).await;
            return Err(err);
        }

        let Some(mut ride) = self
            .execute(&source, &RideStatement::SelectById(ride_id))
            .await?
            .into_first()
        else {
            return Ok(None);
        };
        patch.apply_to(&mut ride);
        ride.region = to.to_string();

        info!(ride_id = %ride_id, from = %from, to = %to, "migrating ride");

        let removed = self
            .execute(&source, &RideStatement::Delete(ride_id))
            .await?
            .affected();
        if removed == 0 {
            return Ok(None);
        }

        match self
            .execute(&target, &RideStatement::Insert(ride.clone()))
            .await
        {
            Ok(outcome) => {
                info!(ride_id = %ride_id, from = %from, to = %to, "ride migrated");
                Ok(Some(outcome.into_first().unwrap_or(ride)))
            }
            Err(err) => {
                error!(
                    ride_id = %ride_id,
                    from = %from,
                    to = %to,
                    error = %err,
                    "ride deleted from source but insert into target failed; manual reconciliation required"
                );
                Err(CoordinatorError::MigrationPartialFailure {
                    from: from.to_string(),
                    to: to.to_string(),
                    message: err.to_string(),
                    ride: Box::new(ride),
                })
            }
        }
    }
}
