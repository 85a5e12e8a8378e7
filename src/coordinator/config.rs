use super::retry::RetryPolicy;
use crate::connection::config::StoreParams;
use crate::core::{CoordinatorError, Result};
use crate::geo::{DEFAULT_GEOHASH_PRECISION, GeoHasher, RegionBounds, RegionDescriptor, RegionMap};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Built-in region table: (id, name, lat range, lon range, env prefix, port).
const BUILTIN_REGIONS: [(&str, &str, (f64, f64), (f64, f64), &str, u16); 4] = [
    ("us-east", "US East", (25.0, 45.0), (-80.0, -65.0), "US_EAST", 26201),
    ("us-west", "US West", (30.0, 50.0), (-125.0, -110.0), "US_WEST", 26204),
    ("eu-central", "EU Central", (45.0, 55.0), (5.0, 15.0), "EU_CENTRAL", 26207),
    ("ap-south", "AP South", (10.0, 25.0), (70.0, 90.0), "AP_SOUTH", 26210),
];

fn default_health_check_interval_ms() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_MS
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_geohash_precision() -> usize {
    DEFAULT_GEOHASH_PRECISION
}

/// Coordinator configuration.
///
/// `default_region` and `fallback_order` are optional; when absent the
/// first configured region is the default and configuration order is the
/// fallback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub regions: Vec<RegionDescriptor>,
    #[serde(default)]
    pub default_region: Option<String>,
    #[serde(default)]
    pub fallback_order: Option<Vec<String>>,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_geohash_precision")]
    pub geohash_precision: usize,
    /// Upper bound for one whole coordinator call, retries included.
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
            .unwrap_or_else(|_| Self::with_regions(Vec::new()))
    }
}

impl CoordinatorConfig {
    pub fn with_regions(regions: Vec<RegionDescriptor>) -> Self {
        Self {
            regions,
            default_region: None,
            fallback_order: None,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            geohash_precision: DEFAULT_GEOHASH_PRECISION,
            operation_timeout_ms: None,
        }
    }

    pub fn default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = Some(region.into());
        self
    }

    pub fn fallback_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Reads a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            CoordinatorError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|err| {
            CoordinatorError::Config(format!("cannot parse {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the built-in four-region deployment from the environment,
    /// loading a `.env` file first when one exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CoordinatorConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = lookup("DATABASE_NAME").unwrap_or_else(|| "rideshare".to_string());
        let user = lookup("DB_USER").unwrap_or_else(|| "root".to_string());
        let password = lookup("DB_PASSWORD").unwrap_or_default();

        let mut regions = Vec::with_capacity(BUILTIN_REGIONS.len());
        for (id, name, lat, lon, prefix, default_port) in BUILTIN_REGIONS {
            let host = lookup(&format!("{prefix}_HOST")).unwrap_or_else(|| "localhost".to_string());
            let port = parse_var(&lookup, &format!("{prefix}_PORT"), default_port)?;
            let store = StoreParams::new(&host, port)
                .database(&database)
                .user(&user)
                .password(&password);
            regions.push(RegionDescriptor::new(id, name, RegionBounds::new(lat, lon), store));
        }

        let mut config = Self::with_regions(regions);
        config.health_check_interval_ms = parse_var(
            &lookup,
            "HEALTH_CHECK_INTERVAL_MS",
            DEFAULT_HEALTH_CHECK_INTERVAL_MS,
        )?;
        config.retry.max_attempts =
            parse_var(&lookup, "RETRY_MAX_ATTEMPTS", config.retry.max_attempts)?;
        config.retry.initial_backoff_ms =
            parse_var(&lookup, "RETRY_BASE_BACKOFF_MS", config.retry.initial_backoff_ms)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.region_map()?;
        for region in &self.regions {
            region.store.validate().map_err(|msg| {
                CoordinatorError::Config(format!("region '{}': {}", region.id, msg))
            })?;
        }
        self.retry.validate().map_err(CoordinatorError::Config)?;
        GeoHasher::new(self.geohash_precision)
            .map_err(|err| CoordinatorError::Config(err.to_string()))?;
        if self.health_check_interval_ms == 0 {
            return Err(CoordinatorError::Config(
                "health_check_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolution table with the configured default and fallback policy.
    pub fn region_map(&self) -> Result<RegionMap> {
        let default_region = match &self.default_region {
            Some(id) => id.clone(),
            None => self
                .regions
                .first()
                .map(|r| r.id.clone())
                .ok_or_else(|| CoordinatorError::Config("at least one region is required".into()))?,
        };
        let fallback_order = match &self.fallback_order {
            Some(order) => order.clone(),
            None => self.regions.iter().map(|r| r.id.clone()).collect(),
        };
        RegionMap::with_policy(self.regions.clone(), default_region, fallback_order)
    }

    pub fn health_check_interval_duration(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn operation_timeout_duration(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoordinatorError::Config(format!("invalid {key}='{raw}'"))),
        None => Ok(default),
    }
}
