use crate::connection::config::StoreParams;
use crate::core::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Inclusive latitude/longitude rectangle owned by one region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl RegionBounds {
    pub fn new(lat: (f64, f64), lon: (f64, f64)) -> Self {
        Self {
            lat_min: lat.0,
            lat_max: lat.1,
            lon_min: lon.0,
            lon_max: lon.1,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.lat_min <= lat && lat <= self.lat_max && self.lon_min <= lon && lon <= self.lon_max
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let finite = [self.lat_min, self.lat_max, self.lon_min, self.lon_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err("bounds must be finite".to_string());
        }
        if self.lat_min > self.lat_max || self.lon_min > self.lon_max {
            return Err("bounds minimum exceeds maximum".to_string());
        }
        if self.lat_min < -90.0 || self.lat_max > 90.0 {
            return Err("latitude bounds must be within [-90, 90]".to_string());
        }
        if self.lon_min < -180.0 || self.lon_max > 180.0 {
            return Err("longitude bounds must be within [-180, 180]".to_string());
        }
        Ok(())
    }
}

/// Static description of one region: where it is and how to reach its store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub id: String,
    pub name: String,
    pub bounds: RegionBounds,
    pub store: StoreParams,
}

impl RegionDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        bounds: RegionBounds,
        store: StoreParams,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            bounds,
            store,
        }
    }
}

/// Ordered, immutable region table used for ownership decisions.
///
/// Resolution scans in configuration order and returns the first box that
/// contains the point; points outside every box go to the default region.
#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: Vec<RegionDescriptor>,
    default_region: String,
    fallback_order: Vec<String>,
}

impl RegionMap {
    /// Builds a map with the first region as default and configuration
    /// order as fallback order.
    pub fn new(regions: Vec<RegionDescriptor>) -> Result<Self> {
        let first = regions
            .first()
            .map(|r| r.id.clone())
            .ok_or_else(|| CoordinatorError::Config("at least one region is required".into()))?;
        let order = regions.iter().map(|r| r.id.clone()).collect();
        Self::with_policy(regions, first, order)
    }

    pub fn with_policy(
        regions: Vec<RegionDescriptor>,
        default_region: impl Into<String>,
        fallback_order: Vec<String>,
    ) -> Result<Self> {
        if regions.is_empty() {
            return Err(CoordinatorError::Config(
                "at least one region is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for region in &regions {
            if region.id.trim().is_empty() {
                return Err(CoordinatorError::Config(
                    "region id must not be empty".to_string(),
                ));
            }
            if !seen.insert(region.id.as_str()) {
                return Err(CoordinatorError::Config(format!(
                    "region '{}' appears more than once",
                    region.id
                )));
            }
            region.bounds.validate().map_err(|msg| {
                CoordinatorError::Config(format!("region '{}': {}", region.id, msg))
            })?;
        }

        let default_region = default_region.into();
        if !seen.contains(default_region.as_str()) {
            return Err(CoordinatorError::Config(format!(
                "default region '{}' is not configured",
                default_region
            )));
        }

        let mut fallback_seen = HashSet::new();
        for id in &fallback_order {
            if !seen.contains(id.as_str()) {
                return Err(CoordinatorError::Config(format!(
                    "fallback region '{}' is not configured",
                    id
                )));
            }
            if !fallback_seen.insert(id.as_str()) {
                return Err(CoordinatorError::Config(format!(
                    "fallback region '{}' appears more than once",
                    id
                )));
            }
        }

        Ok(Self {
            regions,
            default_region,
            fallback_order,
        })
    }

    /// Returns the owning region for a point. Never fails.
    pub fn resolve(&self, lat: f64, lon: f64) -> &str {
        self.regions
            .iter()
            .find(|r| r.bounds.contains(lat, lon))
            .map(|r| r.id.as_str())
            .unwrap_or(self.default_region.as_str())
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    pub fn get(&self, id: &str) -> Option<&RegionDescriptor> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn descriptors(&self) -> &[RegionDescriptor] {
        &self.regions
    }

    /// Region ids in configuration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.id.as_str())
    }

    /// Alternates for `preferred`, in fallback order, excluding it.
    pub fn fallbacks_for<'a>(&'a self, preferred: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fallback_order
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != preferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str, lat: (f64, f64), lon: (f64, f64)) -> RegionDescriptor {
        RegionDescriptor::new(id, id, RegionBounds::new(lat, lon), StoreParams::default())
    }

    fn sample_map() -> RegionMap {
        RegionMap::new(vec![
            region("us-east", (25.0, 45.0), (-80.0, -65.0)),
            region("us-west", (30.0, 50.0), (-125.0, -110.0)),
            region("eu-central", (45.0, 55.0), (5.0, 15.0)),
            region("ap-south", (10.0, 25.0), (70.0, 90.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_inside_boxes() {
        let map = sample_map();
        assert_eq!(map.resolve(40.0, -74.0), "us-east");
        assert_eq!(map.resolve(34.0, -118.0), "us-west");
        assert_eq!(map.resolve(50.1, 8.7), "eu-central");
        assert_eq!(map.resolve(19.0, 72.8), "ap-south");
    }

    #[test]
    fn test_resolve_boundaries_are_inclusive() {
        let map = sample_map();
        assert_eq!(map.resolve(25.0, -80.0), "us-east");
        assert_eq!(map.resolve(55.0, 15.0), "eu-central");
    }

    #[test]
    fn test_resolve_outside_all_boxes_uses_default() {
        let map = sample_map();
        for _ in 0..3 {
            assert_eq!(map.resolve(-33.9, 151.2), "us-east");
            assert_eq!(map.resolve(0.0, 0.0), "us-east");
        }
    }

    #[test]
    fn test_overlapping_boxes_resolve_in_configuration_order() {
        let map = RegionMap::new(vec![
            region("a", (0.0, 10.0), (0.0, 10.0)),
            region("b", (5.0, 15.0), (5.0, 15.0)),
        ])
        .unwrap();
        assert_eq!(map.resolve(7.0, 7.0), "a");
        assert_eq!(map.resolve(12.0, 12.0), "b");
    }

    #[test]
    fn test_custom_default_and_fallback_order() {
        let regions = sample_map().descriptors().to_vec();
        let map = RegionMap::with_policy(
            regions,
            "eu-central",
            vec!["ap-south".into(), "us-west".into(), "us-east".into()],
        )
        .unwrap();
        assert_eq!(map.resolve(-60.0, -60.0), "eu-central");
        let fallbacks: Vec<_> = map.fallbacks_for("us-west").collect();
        assert_eq!(fallbacks, vec!["ap-south", "us-east"]);
    }

    #[test]
    fn test_invalid_maps_rejected() {
        assert!(RegionMap::new(Vec::new()).is_err());
        assert!(RegionMap::new(vec![
            region("a", (0.0, 1.0), (0.0, 1.0)),
            region("a", (2.0, 3.0), (2.0, 3.0)),
        ])
        .is_err());
        assert!(RegionMap::new(vec![region("a", (10.0, 1.0), (0.0, 1.0))]).is_err());
        assert!(RegionMap::new(vec![region("a", (0.0, 95.0), (0.0, 1.0))]).is_err());
        assert!(RegionMap::with_policy(
            vec![region("a", (0.0, 1.0), (0.0, 1.0))],
            "missing",
            Vec::new()
        )
        .is_err());
        assert!(RegionMap::with_policy(
            vec![region("a", (0.0, 1.0), (0.0, 1.0))],
            "a",
            vec!["zz".into()]
        )
        .is_err());
    }
}
