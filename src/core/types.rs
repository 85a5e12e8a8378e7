use super::{CoordinatorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a ride. Transitions are caller-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    #[default]
    Requested,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = CoordinatorError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "requested" => Ok(Self::Requested),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoordinatorError::InvalidInput(format!(
                "unknown ride status '{}'",
                other
            ))),
        }
    }
}

/// A persisted ride row.
///
/// `region` always names the shard currently holding the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub ride_id: Uuid,
    pub user_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub region: String,
    pub pickup_geohash: Option<String>,
    pub status: RideStatus,
    pub price: f64,
    pub distance_km: f64,
    pub duration_minutes: i32,
    pub timestamp: DateTime<Utc>,
}

/// Fields supplied by a caller when requesting a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRide {
    pub user_id: Uuid,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    #[serde(default)]
    pub driver_id: Option<Uuid>,
    #[serde(default)]
    pub status: RideStatus,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub distance_km: f64,
    #[serde(default)]
    pub duration_minutes: i32,
    #[serde(default)]
    pub pickup_geohash: Option<String>,
}

impl NewRide {
    /// Creates a request with zeroed metrics and `requested` status.
    pub fn new(
        user_id: Uuid,
        pickup: (f64, f64),
        dropoff: (f64, f64),
    ) -> Self {
        Self {
            user_id,
            pickup_lat: pickup.0,
            pickup_lon: pickup.1,
            dropoff_lat: dropoff.0,
            dropoff_lon: dropoff.1,
            driver_id: None,
            status: RideStatus::Requested,
            price: 0.0,
            distance_km: 0.0,
            duration_minutes: 0,
            pickup_geohash: None,
        }
    }

    pub fn driver(mut self, driver_id: Uuid) -> Self {
        self.driver_id = Some(driver_id);
        self
    }

    pub fn status(mut self, status: RideStatus) -> Self {
        self.status = status;
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_point("pickup", self.pickup_lat, self.pickup_lon)?;
        validate_point("dropoff", self.dropoff_lat, self.dropoff_lon)?;
        validate_metric("price", self.price)?;
        validate_metric("distance_km", self.distance_km)?;
        if self.duration_minutes < 0 {
            return Err(CoordinatorError::InvalidInput(
                "duration_minutes must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Materializes the row that will be inserted into `region`.
    pub fn into_ride(
        self,
        ride_id: Uuid,
        region: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Ride {
        Ride {
            ride_id,
            user_id: self.user_id,
            driver_id: self.driver_id,
            pickup_lat: self.pickup_lat,
            pickup_lon: self.pickup_lon,
            dropoff_lat: self.dropoff_lat,
            dropoff_lon: self.dropoff_lon,
            region: region.into(),
            pickup_geohash: self.pickup_geohash,
            status: self.status,
            price: self.price,
            distance_km: self.distance_km,
            duration_minutes: self.duration_minutes,
            timestamp,
        }
    }
}

/// Partial update of a ride.
///
/// Only the mutable columns are representable; unknown fields in a
/// deserialized payload are ignored. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RidePatch {
    #[serde(default)]
    pub driver_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<RideStatus>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub pickup_lat: Option<f64>,
    #[serde(default)]
    pub pickup_lon: Option<f64>,
    #[serde(default)]
    pub dropoff_lat: Option<f64>,
    #[serde(default)]
    pub dropoff_lon: Option<f64>,
    #[serde(default)]
    pub pickup_geohash: Option<String>,
}

impl RidePatch {
    pub fn pickup(mut self, lat: f64, lon: f64) -> Self {
        self.pickup_lat = Some(lat);
        self.pickup_lon = Some(lon);
        self
    }

    pub fn dropoff(mut self, lat: f64, lon: f64) -> Self {
        self.dropoff_lat = Some(lat);
        self.dropoff_lon = Some(lon);
        self
    }

    pub fn driver(mut self, driver_id: Uuid) -> Self {
        self.driver_id = Some(driver_id);
        self
    }

    pub fn status(mut self, status: RideStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_pickup(&self) -> bool {
        self.pickup_lat.is_some() || self.pickup_lon.is_some()
    }

    /// Pickup point after the patch is applied on top of `ride`.
    pub fn effective_pickup(&self, ride: &Ride) -> (f64, f64) {
        (
            self.pickup_lat.unwrap_or(ride.pickup_lat),
            self.pickup_lon.unwrap_or(ride.pickup_lon),
        )
    }

    pub fn validate(&self) -> Result<()> {
        for (name, lat) in [("pickup_lat", self.pickup_lat), ("dropoff_lat", self.dropoff_lat)] {
            if let Some(lat) = lat {
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                    return Err(CoordinatorError::InvalidInput(format!(
                        "{} {} is outside [-90, 90]",
                        name, lat
                    )));
                }
            }
        }
        for (name, lon) in [("pickup_lon", self.pickup_lon), ("dropoff_lon", self.dropoff_lon)] {
            if let Some(lon) = lon {
                if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                    return Err(CoordinatorError::InvalidInput(format!(
                        "{} {} is outside [-180, 180]",
                        name, lon
                    )));
                }
            }
        }
        if let Some(price) = self.price {
            validate_metric("price", price)?;
        }
        if let Some(distance) = self.distance_km {
            validate_metric("distance_km", distance)?;
        }
        if matches!(self.duration_minutes, Some(minutes) if minutes < 0) {
            return Err(CoordinatorError::InvalidInput(
                "duration_minutes must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies every supplied field to an in-memory copy of a ride.
    pub fn apply_to(&self, ride: &mut Ride) {
        if let Some(driver_id) = self.driver_id {
            ride.driver_id = Some(driver_id);
        }
        if let Some(status) = self.status {
            ride.status = status;
        }
        if let Some(price) = self.price {
            ride.price = price;
        }
        if let Some(distance) = self.distance_km {
            ride.distance_km = distance;
        }
        if let Some(minutes) = self.duration_minutes {
            ride.duration_minutes = minutes;
        }
        if let Some(lat) = self.pickup_lat {
            ride.pickup_lat = lat;
        }
        if let Some(lon) = self.pickup_lon {
            ride.pickup_lon = lon;
        }
        if let Some(lat) = self.dropoff_lat {
            ride.dropoff_lat = lat;
        }
        if let Some(lon) = self.dropoff_lon {
            ride.dropoff_lon = lon;
        }
        if let Some(hash) = &self.pickup_geohash {
            ride.pickup_geohash = Some(hash.clone());
        }
    }
}

/// Listing filters. A `region` restricts the query to that shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideFilter {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub driver_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<RideStatus>,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

pub const DEFAULT_LIST_LIMIT: usize = 100;

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

impl Default for RideFilter {
    fn default() -> Self {
        Self {
            region: None,
            user_id: None,
            driver_id: None,
            status: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl RideFilter {
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn driver(mut self, driver_id: Uuid) -> Self {
        self.driver_id = Some(driver_id);
        self
    }

    pub fn status(mut self, status: RideStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Checks a row against every filter, including the region column.
    pub fn matches(&self, ride: &Ride) -> bool {
        self.region.as_deref().is_none_or(|r| ride.region == r)
            && self.user_id.is_none_or(|id| ride.user_id == id)
            && self.driver_id.is_none_or(|id| ride.driver_id == Some(id))
            && self.status.is_none_or(|s| ride.status == s)
    }
}

/// Health classification of a region's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionHealth {
    Healthy,
    Unhealthy,
    Disconnected,
}

impl fmt::Display for RegionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Unhealthy => f.write_str("unhealthy"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Point-in-time view of one region for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStatus {
    pub region: String,
    pub health: RegionHealth,
    pub last_checked: Option<DateTime<Utc>>,
}

fn validate_point(name: &str, lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(CoordinatorError::InvalidInput(format!(
            "{} latitude {} is outside [-90, 90]",
            name, lat
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(CoordinatorError::InvalidInput(format!(
            "{} longitude {} is outside [-180, 180]",
            name, lon
        )));
    }
    Ok(())
}

fn validate_metric(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(CoordinatorError::InvalidInput(format!(
            "{} must be a non-negative number, got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ride() -> Ride {
        NewRide::new(Uuid::new_v4(), (40.0, -74.0), (40.7, -73.9)).into_ride(
            Uuid::new_v4(),
            "us-east",
            Utc::now(),
        )
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            RideStatus::Requested,
            RideStatus::InProgress,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RideStatus>().unwrap(), status);
        }
        assert!("finished".parse::<RideStatus>().is_err());
    }

    #[test]
    fn test_new_ride_validation() {
        let ok = NewRide::new(Uuid::new_v4(), (40.0, -74.0), (41.0, -73.0));
        assert!(ok.validate().is_ok());

        let bad_lat = NewRide::new(Uuid::new_v4(), (91.0, -74.0), (41.0, -73.0));
        assert!(matches!(bad_lat.validate(), Err(CoordinatorError::InvalidInput(_))));

        let bad_price = ok.clone().price(-1.0);
        assert!(bad_price.validate().is_err());

        let nan = NewRide::new(Uuid::new_v4(), (f64::NAN, 0.0), (0.0, 0.0));
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_patch_apply_and_effective_pickup() {
        let mut ride = sample_ride();
        let driver = Uuid::new_v4();
        let patch = RidePatch::default()
            .driver(driver)
            .status(RideStatus::InProgress)
            .pickup(34.0, -118.0);

        assert_eq!(patch.effective_pickup(&ride), (34.0, -118.0));
        assert!(patch.touches_pickup());

        patch.apply_to(&mut ride);
        assert_eq!(ride.driver_id, Some(driver));
        assert_eq!(ride.status, RideStatus::InProgress);
        assert_eq!(ride.pickup_lat, 34.0);
        // region is owned by the coordinator, never by the patch
        assert_eq!(ride.region, "us-east");
    }

    #[test]
    fn test_patch_ignores_unknown_fields() {
        let patch: RidePatch = serde_json::from_str(
            r#"{"status":"completed","region":"ap-south","user_id":"not-allowed","price":12.5}"#,
        )
        .unwrap();
        assert_eq!(patch.status, Some(RideStatus::Completed));
        assert_eq!(patch.price, Some(12.5));
        assert!(!patch.touches_pickup());
    }

    #[test]
    fn test_filter_matches() {
        let ride = sample_ride();
        assert!(RideFilter::default().matches(&ride));
        assert!(RideFilter::default().region("us-east").matches(&ride));
        assert!(!RideFilter::default().region("us-west").matches(&ride));
        assert!(RideFilter::default().user(ride.user_id).matches(&ride));
        assert!(!RideFilter::default().driver(Uuid::new_v4()).matches(&ride));
        assert!(!RideFilter::default().status(RideStatus::Completed).matches(&ride));
    }
}
