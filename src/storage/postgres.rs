use super::statement::{RideStatement, StatementOutcome};
use crate::connection::config::StoreParams;
use crate::core::{Ride, StoreError, StoreResult, Value};
use crate::interface::{RegionConnection, RegionConnector};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};

/// Connects to PostgreSQL-wire regional stores (PostgreSQL or CockroachDB).
#[derive(Debug, Clone)]
pub struct PgConnector {
    connect_timeout: Duration,
}

impl Default for PgConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PgConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl RegionConnector for PgConnector {
    async fn connect(
        &self,
        region: &str,
        params: &StoreParams,
    ) -> StoreResult<Arc<dyn RegionConnection>> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .dbname(&params.database)
            .user(&params.user)
            .connect_timeout(self.connect_timeout)
            .application_name("rideshard");
        if !params.password.is_empty() {
            config.password(&params.password);
        }

        let (client, connection) = config.connect(NoTls).await.map_err(classify)?;

        let region_name = region.to_string();
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(region = %region_name, error = %err, "store connection terminated");
            }
        });
        debug!(region = %region, url = %params.to_url(), "store connection opened");

        Ok(Arc::new(PgRegionConnection {
            client,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

/// One `tokio-postgres` client plus the task driving its socket.
pub struct PgRegionConnection {
    client: Client,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl RegionConnection for PgRegionConnection {
    async fn execute(&self, statement: &RideStatement) -> StoreResult<StatementOutcome> {
        if self.client.is_closed() {
            return Err(StoreError::Closed);
        }

        let sql = statement.sql();
        let params = statement.params();
        let bound: Vec<&(dyn ToSql + Sync)> = params.iter().map(as_sql).collect();

        match statement {
            RideStatement::Delete(_) => {
                let affected = self
                    .client
                    .execute(sql.as_str(), &bound)
                    .await
                    .map_err(classify)?;
                Ok(StatementOutcome::Affected(affected))
            }
            _ => {
                let rows = self
                    .client
                    .query(sql.as_str(), &bound)
                    .await
                    .map_err(classify)?;
                let rides = rows.iter().map(ride_from_row).collect::<StoreResult<Vec<_>>>()?;
                Ok(StatementOutcome::Rows(rides))
            }
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.client.is_closed() {
            return Err(StoreError::Closed);
        }
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn close(&self) -> StoreResult<()> {
        if let Some(driver) = self.driver.lock().await.take() {
            driver.abort();
        }
        Ok(())
    }
}

impl Drop for PgRegionConnection {
    fn drop(&mut self) {
        if let Ok(mut driver) = self.driver.try_lock() {
            if let Some(driver) = driver.take() {
                driver.abort();
            }
        }
    }
}

/// Errors reported by the server (constraint violations, syntax) are
/// statement errors; anything else is treated as connection-level.
fn classify(err: tokio_postgres::Error) -> StoreError {
    if err.is_closed() {
        return StoreError::Closed;
    }
    match err.as_db_error() {
        Some(db) => StoreError::Statement(format!("{} ({})", db.message(), db.code().code())),
        None => StoreError::Connection(err.to_string()),
    }
}

fn as_sql(value: &Value) -> &(dyn ToSql + Sync) {
    match value {
        Value::Uuid(v) => v,
        Value::Text(v) => v,
        Value::Float(v) => v,
        Value::Integer(v) => v,
        Value::Timestamp(v) => v,
    }
}

fn ride_from_row(row: &Row) -> StoreResult<Ride> {
    let status: String = get(row, "status")?;
    let region: String = get(row, "region")?;

    Ok(Ride {
        ride_id: get(row, "ride_id")?,
        user_id: get(row, "user_id")?,
        driver_id: get(row, "driver_id")?,
        pickup_lat: get(row, "pickup_lat")?,
        pickup_lon: get(row, "pickup_lon")?,
        dropoff_lat: get(row, "dropoff_lat")?,
        dropoff_lon: get(row, "dropoff_lon")?,
        region,
        pickup_geohash: get(row, "pickup_geohash")?,
        status: status
            .parse()
            .map_err(|err: crate::core::CoordinatorError| StoreError::Decode(err.to_string()))?,
        price: get::<Option<f64>>(row, "price")?.unwrap_or_default(),
        distance_km: get::<Option<f64>>(row, "distance_km")?.unwrap_or_default(),
        duration_minutes: duration_minutes(row)?,
        timestamp: timestamp(row)?,
    })
}

fn get<'a, T>(row: &'a Row, column: &str) -> StoreResult<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(column)
        .map_err(|err| StoreError::Decode(format!("column '{}': {}", column, err)))
}

// INT is INT8 on CockroachDB and INT4 on PostgreSQL.
fn duration_minutes(row: &Row) -> StoreResult<i32> {
    if let Ok(value) = row.try_get::<_, Option<i64>>("duration_minutes") {
        let value = value.unwrap_or_default();
        return i32::try_from(value)
            .map_err(|_| StoreError::Decode(format!("duration_minutes {} overflows", value)));
    }
    Ok(get::<Option<i32>>(row, "duration_minutes")?.unwrap_or_default())
}

fn timestamp(row: &Row) -> StoreResult<DateTime<Utc>> {
    if let Ok(naive) = row.try_get::<_, NaiveDateTime>("timestamp") {
        return Ok(naive.and_utc());
    }
    get(row, "timestamp")
}
