use crate::core::{Ride, RideFilter, RidePatch, Value};
use std::fmt;
use uuid::Uuid;

/// Columns returned by every row-producing statement, in order.
pub const RIDE_COLUMNS: &str = "ride_id, user_id, driver_id, pickup_lat, pickup_lon, \
dropoff_lat, dropoff_lon, region, pickup_geohash, status, price, distance_km, \
duration_minutes, timestamp";

/// Columns a caller may change on an existing ride, plus `region`
/// which the coordinator rewrites when pickup coordinates move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RideColumn {
    DriverId,
    Status,
    Price,
    DistanceKm,
    DurationMinutes,
    PickupLat,
    PickupLon,
    DropoffLat,
    DropoffLon,
    PickupGeohash,
    Region,
}

impl RideColumn {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DriverId => "driver_id",
            Self::Status => "status",
            Self::Price => "price",
            Self::DistanceKm => "distance_km",
            Self::DurationMinutes => "duration_minutes",
            Self::PickupLat => "pickup_lat",
            Self::PickupLon => "pickup_lon",
            Self::DropoffLat => "dropoff_lat",
            Self::DropoffLon => "dropoff_lon",
            Self::PickupGeohash => "pickup_geohash",
            Self::Region => "region",
        }
    }
}

/// One `column = value` pair of an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: RideColumn,
    pub value: Value,
}

impl Assignment {
    pub fn new(column: RideColumn, value: impl Into<Value>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }

    /// Writes the assignment into an in-memory row. Mismatched value types
    /// leave the row untouched.
    pub fn apply_to(&self, ride: &mut Ride) {
        match self.column {
            RideColumn::DriverId => {
                if let Value::Uuid(id) = &self.value {
                    ride.driver_id = *id;
                }
            }
            RideColumn::Status => {
                if let Some(status) = self.value.as_str().and_then(|s| s.parse().ok()) {
                    ride.status = status;
                }
            }
            RideColumn::Price => {
                if let Some(v) = self.value.as_f64() {
                    ride.price = v;
                }
            }
            RideColumn::DistanceKm => {
                if let Some(v) = self.value.as_f64() {
                    ride.distance_km = v;
                }
            }
            RideColumn::DurationMinutes => {
                if let Some(v) = self.value.as_i64().and_then(|v| i32::try_from(v).ok()) {
                    ride.duration_minutes = v;
                }
            }
            RideColumn::PickupLat => {
                if let Some(v) = self.value.as_f64() {
                    ride.pickup_lat = v;
                }
            }
            RideColumn::PickupLon => {
                if let Some(v) = self.value.as_f64() {
                    ride.pickup_lon = v;
                }
            }
            RideColumn::DropoffLat => {
                if let Some(v) = self.value.as_f64() {
                    ride.dropoff_lat = v;
                }
            }
            RideColumn::DropoffLon => {
                if let Some(v) = self.value.as_f64() {
                    ride.dropoff_lon = v;
                }
            }
            RideColumn::PickupGeohash => {
                if let Value::Text(hash) = &self.value {
                    ride.pickup_geohash = hash.clone();
                }
            }
            RideColumn::Region => {
                if let Some(region) = self.value.as_str() {
                    ride.region = region.to_string();
                }
            }
        }
    }
}

/// Coarse statement classification, used for logging and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Select,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("INSERT"),
            Self::Select => f.write_str("SELECT"),
            Self::Update => f.write_str("UPDATE"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

/// The fixed set of statements the coordinator issues against a shard.
#[derive(Debug, Clone, PartialEq)]
pub enum RideStatement {
    Insert(Ride),
    SelectById(Uuid),
    Select(RideFilter),
    Update {
        ride_id: Uuid,
        assignments: Vec<Assignment>,
    },
    Delete(Uuid),
}

/// What a store returns for a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    Rows(Vec<Ride>),
    Affected(u64),
}

impl StatementOutcome {
    pub fn into_rows(self) -> Vec<Ride> {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected(_) => Vec::new(),
        }
    }

    pub fn into_first(self) -> Option<Ride> {
        self.into_rows().into_iter().next()
    }

    pub fn affected(&self) -> u64 {
        match self {
            Self::Rows(rows) => rows.len() as u64,
            Self::Affected(n) => *n,
        }
    }
}

impl RideStatement {
    /// Builds an UPDATE restricted to the mutable columns present in `patch`.
    ///
    /// `region` is rewritten only when the patch moves the pickup point.
    /// Returns `None` when nothing would change.
    pub fn update_from_patch(
        ride_id: Uuid,
        patch: &RidePatch,
        region: Option<&str>,
    ) -> Option<Self> {
        let mut assignments = Vec::new();
        if let Some(id) = patch.driver_id {
            assignments.push(Assignment::new(RideColumn::DriverId, id));
        }
        if let Some(status) = patch.status {
            assignments.push(Assignment::new(RideColumn::Status, status.as_str()));
        }
        if let Some(v) = patch.price {
            assignments.push(Assignment::new(RideColumn::Price, v));
        }
        if let Some(v) = patch.distance_km {
            assignments.push(Assignment::new(RideColumn::DistanceKm, v));
        }
        if let Some(v) = patch.duration_minutes {
            assignments.push(Assignment::new(RideColumn::DurationMinutes, v));
        }
        if let Some(v) = patch.pickup_lat {
            assignments.push(Assignment::new(RideColumn::PickupLat, v));
        }
        if let Some(v) = patch.pickup_lon {
            assignments.push(Assignment::new(RideColumn::PickupLon, v));
        }
        if let Some(v) = patch.dropoff_lat {
            assignments.push(Assignment::new(RideColumn::DropoffLat, v));
        }
        if let Some(v) = patch.dropoff_lon {
            assignments.push(Assignment::new(RideColumn::DropoffLon, v));
        }
        if let Some(hash) = &patch.pickup_geohash {
            assignments.push(Assignment::new(RideColumn::PickupGeohash, hash.clone()));
        }
        if let (true, Some(region)) = (patch.touches_pickup(), region) {
            assignments.push(Assignment::new(RideColumn::Region, region));
        }

        if assignments.is_empty() {
            None
        } else {
            Some(Self::Update {
                ride_id,
                assignments,
            })
        }
    }

    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Insert(_) => StatementKind::Insert,
            Self::SelectById(_) | Self::Select(_) => StatementKind::Select,
            Self::Update { .. } => StatementKind::Update,
            Self::Delete(_) => StatementKind::Delete,
        }
    }

    /// Renders SQL with `$n` placeholders matching [`RideStatement::params`].
    pub fn sql(&self) -> String {
        let params = self.params();
        let ph = |idx: usize| format!("${}{}", idx + 1, params[idx].placeholder_cast());

        match self {
            Self::Insert(_) => {
                let placeholders = (0..params.len()).map(ph).collect::<Vec<_>>().join(", ");
                format!(
                    "INSERT INTO rides ({}) VALUES ({}) RETURNING {}",
                    RIDE_COLUMNS, placeholders, RIDE_COLUMNS
                )
            }
            Self::SelectById(_) => {
                format!("SELECT {} FROM rides WHERE ride_id = {}", RIDE_COLUMNS, ph(0))
            }
            Self::Select(filter) => {
                let mut sql = format!("SELECT {} FROM rides WHERE 1=1", RIDE_COLUMNS);
                let mut idx = 0;
                for (column, present) in [
                    ("region", filter.region.is_some()),
                    ("user_id", filter.user_id.is_some()),
                    ("driver_id", filter.driver_id.is_some()),
                    ("status", filter.status.is_some()),
                ] {
                    if present {
                        sql.push_str(&format!(" AND {} = {}", column, ph(idx)));
                        idx += 1;
                    }
                }
                sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {}", filter.limit));
                sql
            }
            Self::Update { assignments, .. } => {
                let sets = assignments
                    .iter()
                    .enumerate()
                    .map(|(idx, a)| format!("{} = {}", a.column.name(), ph(idx)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE rides SET {} WHERE ride_id = {} RETURNING {}",
                    sets,
                    ph(assignments.len()),
                    RIDE_COLUMNS
                )
            }
            Self::Delete(_) => format!("DELETE FROM rides WHERE ride_id = {}", ph(0)),
        }
    }

    /// Positional parameters in placeholder order.
    pub fn params(&self) -> Vec<Value> {
        match self {
            Self::Insert(ride) => vec![
                ride.ride_id.into(),
                ride.user_id.into(),
                ride.driver_id.into(),
                ride.pickup_lat.into(),
                ride.pickup_lon.into(),
                ride.dropoff_lat.into(),
                ride.dropoff_lon.into(),
                ride.region.clone().into(),
                ride.pickup_geohash.clone().into(),
                ride.status.as_str().into(),
                ride.price.into(),
                ride.distance_km.into(),
                ride.duration_minutes.into(),
                ride.timestamp.into(),
            ],
            Self::SelectById(id) | Self::Delete(id) => vec![(*id).into()],
            Self::Select(filter) => {
                let mut params = Vec::new();
                if let Some(region) = &filter.region {
                    params.push(region.clone().into());
                }
                if let Some(user) = filter.user_id {
                    params.push(user.into());
                }
                if let Some(driver) = filter.driver_id {
                    params.push(driver.into());
                }
                if let Some(status) = filter.status {
                    params.push(status.as_str().into());
                }
                params
            }
            Self::Update {
                ride_id,
                assignments,
            } => {
                let mut params: Vec<Value> =
                    assignments.iter().map(|a| a.value.clone()).collect();
                params.push((*ride_id).into());
                params
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NewRide, RideStatus};
    use chrono::Utc;

    fn sample_ride() -> Ride {
        NewRide::new(Uuid::new_v4(), (40.0, -74.0), (40.7, -73.9)).into_ride(
            Uuid::new_v4(),
            "us-east",
            Utc::now(),
        )
    }

    #[test]
    fn test_insert_binds_every_column() {
        let ride = sample_ride();
        let stmt = RideStatement::Insert(ride.clone());
        let sql = stmt.sql();
        let params = stmt.params();

        assert_eq!(params.len(), 14);
        assert!(sql.starts_with("INSERT INTO rides ("));
        assert!(sql.contains("$13::INT8"));
        assert!(sql.contains("$14::TIMESTAMPTZ"));
        assert!(sql.contains("RETURNING ride_id"));
        assert_eq!(params[0].as_uuid(), Some(ride.ride_id));
        assert!(params[2].is_null());
        assert_eq!(params[7].as_str(), Some("us-east"));
    }

    #[test]
    fn test_select_with_filters_numbers_placeholders() {
        let user = Uuid::new_v4();
        let stmt = RideStatement::Select(
            RideFilter::default()
                .region("us-west")
                .user(user)
                .status(RideStatus::Completed)
                .limit(25),
        );
        let sql = stmt.sql();

        assert!(sql.contains("AND region = $1"));
        assert!(sql.contains("AND user_id = $2"));
        assert!(sql.contains("AND status = $3"));
        assert!(!sql.contains("driver_id = $"));
        assert!(sql.ends_with("ORDER BY timestamp DESC LIMIT 25"));
        assert_eq!(stmt.params().len(), 3);
    }

    #[test]
    fn test_update_from_patch_restricts_columns() {
        let id = Uuid::new_v4();
        let patch = RidePatch::default().status(RideStatus::InProgress).price(9.5);
        let stmt = RideStatement::update_from_patch(id, &patch, Some("us-east")).unwrap();
        let sql = stmt.sql();

        assert_eq!(
            sql,
            format!(
                "UPDATE rides SET status = $1, price = $2 WHERE ride_id = $3 RETURNING {}",
                RIDE_COLUMNS
            )
        );
        assert_eq!(stmt.params().last().and_then(Value::as_uuid), Some(id));
    }

    #[test]
    fn test_update_rewrites_region_only_for_pickup_changes() {
        let id = Uuid::new_v4();
        let moved = RidePatch::default().pickup(41.0, -73.0);
        let RideStatement::Update { assignments, .. } =
            RideStatement::update_from_patch(id, &moved, Some("us-east")).unwrap()
        else {
            panic!("expected update");
        };
        assert!(assignments.iter().any(|a| a.column == RideColumn::Region));

        let dropoff_only = RidePatch::default().dropoff(41.0, -73.0);
        let RideStatement::Update { assignments, .. } =
            RideStatement::update_from_patch(id, &dropoff_only, Some("us-east")).unwrap()
        else {
            panic!("expected update");
        };
        assert!(assignments.iter().all(|a| a.column != RideColumn::Region));
    }

    #[test]
    fn test_empty_patch_produces_no_statement() {
        assert!(RideStatement::update_from_patch(Uuid::new_v4(), &RidePatch::default(), None)
            .is_none());
    }

    #[test]
    fn test_assignment_apply_to_row() {
        let mut ride = sample_ride();
        let driver = Uuid::new_v4();
        Assignment::new(RideColumn::DriverId, driver).apply_to(&mut ride);
        Assignment::new(RideColumn::Status, "completed").apply_to(&mut ride);
        Assignment::new(RideColumn::DurationMinutes, 42).apply_to(&mut ride);
        Assignment::new(RideColumn::Region, "us-west").apply_to(&mut ride);

        assert_eq!(ride.driver_id, Some(driver));
        assert_eq!(ride.status, RideStatus::Completed);
        assert_eq!(ride.duration_minutes, 42);
        assert_eq!(ride.region, "us-west");
    }

    #[test]
    fn test_statement_kinds() {
        let id = Uuid::new_v4();
        assert_eq!(RideStatement::Delete(id).kind(), StatementKind::Delete);
        assert_eq!(RideStatement::SelectById(id).kind(), StatementKind::Select);
        assert_eq!(
            RideStatement::Select(RideFilter::default()).kind(),
            StatementKind::Select
        );
        assert_eq!(RideStatement::Delete(id).sql(), "DELETE FROM rides WHERE ride_id = $1");
    }
}
