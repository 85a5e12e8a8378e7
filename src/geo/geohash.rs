use crate::core::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};

const BASE32_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

pub const DEFAULT_GEOHASH_PRECISION: usize = 6;
pub const MAX_GEOHASH_PRECISION: usize = 12;

/// Rectangular cell covered by a geohash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCell {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl GeoCell {
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }
}

/// The eight cells surrounding a geohash cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoNeighbors {
    pub n: String,
    pub ne: String,
    pub e: String,
    pub se: String,
    pub s: String,
    pub sw: String,
    pub w: String,
    pub nw: String,
}

/// Base-32 geohash encoder with a fixed output precision.
///
/// Nearby points share prefixes; each extra character narrows the cell
/// (4 chars ~ 39 km, 6 chars ~ 1.2 km, 8 chars ~ 38 m). Hashes tag rides
/// for locality lookups and never influence routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoHasher {
    precision: usize,
}

impl Default for GeoHasher {
    fn default() -> Self {
        Self {
            precision: DEFAULT_GEOHASH_PRECISION,
        }
    }
}

impl GeoHasher {
    pub fn new(precision: usize) -> Result<Self> {
        if precision == 0 || precision > MAX_GEOHASH_PRECISION {
            return Err(CoordinatorError::InvalidInput(format!(
                "geohash precision must be in 1..={}, got {}",
                MAX_GEOHASH_PRECISION, precision
            )));
        }
        Ok(Self { precision })
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    /// Encodes a point, interleaving longitude and latitude bits (longitude first).
    pub fn encode(&self, latitude: f64, longitude: f64) -> String {
        let mut lat_range = (-90.0_f64, 90.0_f64);
        let mut lon_range = (-180.0_f64, 180.0_f64);
        let mut hash = String::with_capacity(self.precision);
        let mut bits = 0;
        let mut current = 0usize;
        let mut is_longitude = true;

        while hash.len() < self.precision {
            let (range, value) = if is_longitude {
                (&mut lon_range, longitude)
            } else {
                (&mut lat_range, latitude)
            };
            let mid = (range.0 + range.1) / 2.0;
            if value >= mid {
                current = (current << 1) | 1;
                range.0 = mid;
            } else {
                current <<= 1;
                range.1 = mid;
            }

            is_longitude = !is_longitude;
            bits += 1;
            if bits == 5 {
                hash.push(BASE32_ALPHABET[current] as char);
                bits = 0;
                current = 0;
            }
        }

        hash
    }

    /// Returns the cell a geohash denotes. Works for any hash length.
    pub fn bounds(&self, hash: &str) -> Result<GeoCell> {
        let mut lat_range = (-90.0_f64, 90.0_f64);
        let mut lon_range = (-180.0_f64, 180.0_f64);
        let mut is_longitude = true;

        for ch in hash.chars() {
            let value = decode_char(ch)?;
            for shift in (0..5).rev() {
                let bit = (value >> shift) & 1;
                let range = if is_longitude {
                    &mut lon_range
                } else {
                    &mut lat_range
                };
                let mid = (range.0 + range.1) / 2.0;
                if bit == 1 {
                    range.0 = mid;
                } else {
                    range.1 = mid;
                }
                is_longitude = !is_longitude;
            }
        }

        Ok(GeoCell {
            lat_min: lat_range.0,
            lat_max: lat_range.1,
            lon_min: lon_range.0,
            lon_max: lon_range.1,
        })
    }

    /// Decodes a geohash to the centre of its cell.
    pub fn decode(&self, hash: &str) -> Result<(f64, f64)> {
        Ok(self.bounds(hash)?.center())
    }

    /// Returns the eight adjacent cells at the same length as `hash`.
    pub fn neighbors(&self, hash: &str) -> Result<GeoNeighbors> {
        let cell = self.bounds(hash)?;
        let (lat, lon) = cell.center();
        let dlat = cell.lat_max - cell.lat_min;
        let dlon = cell.lon_max - cell.lon_min;
        let hasher = Self {
            precision: hash.len().max(1),
        };
        let at = |lat_step: f64, lon_step: f64| {
            let lat = (lat + lat_step * dlat).clamp(-90.0, 90.0);
            let lon = wrap_longitude(lon + lon_step * dlon);
            hasher.encode(lat, lon)
        };

        Ok(GeoNeighbors {
            n: at(1.0, 0.0),
            ne: at(1.0, 1.0),
            e: at(0.0, 1.0),
            se: at(-1.0, 1.0),
            s: at(-1.0, 0.0),
            sw: at(-1.0, -1.0),
            w: at(0.0, -1.0),
            nw: at(1.0, -1.0),
        })
    }
}

fn decode_char(ch: char) -> Result<usize> {
    BASE32_ALPHABET
        .iter()
        .position(|b| *b as char == ch)
        .ok_or_else(|| {
            CoordinatorError::InvalidInput(format!("'{}' is not a geohash character", ch))
        })
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_vectors() {
        let hasher = GeoHasher::new(11).unwrap();
        assert_eq!(hasher.encode(57.64911, 10.40744), "u4pruydqqvj");

        let hasher = GeoHasher::new(5).unwrap();
        assert_eq!(hasher.encode(42.6, -5.6), "ezs42");
    }

    #[test]
    fn test_precision_controls_length_and_prefix() {
        let short = GeoHasher::new(4).unwrap().encode(40.7128, -74.0060);
        let long = GeoHasher::default().encode(40.7128, -74.0060);
        assert_eq!(short.len(), 4);
        assert_eq!(long.len(), DEFAULT_GEOHASH_PRECISION);
        assert!(long.starts_with(&short));
        assert_eq!(short, "dr5r");
    }

    #[test]
    fn test_invalid_precision_rejected() {
        assert!(GeoHasher::new(0).is_err());
        assert!(GeoHasher::new(13).is_err());
    }

    #[test]
    fn test_decode_lands_inside_cell() {
        let hasher = GeoHasher::new(8).unwrap();
        let hash = hasher.encode(48.1374, 11.5755);
        let cell = hasher.bounds(&hash).unwrap();
        assert!(cell.lat_min <= 48.1374 && 48.1374 <= cell.lat_max);
        assert!(cell.lon_min <= 11.5755 && 11.5755 <= cell.lon_max);

        let (lat, lon) = hasher.decode(&hash).unwrap();
        assert!((lat - 48.1374).abs() < 0.001);
        assert!((lon - 11.5755).abs() < 0.001);
        assert_eq!(hasher.encode(lat, lon), hash);
    }

    #[test]
    fn test_decode_rejects_bad_characters() {
        // 'a' is excluded from the alphabet
        assert!(GeoHasher::default().decode("dr5ra").is_err());
    }

    #[test]
    fn test_neighbors_are_adjacent_and_distinct() {
        let hasher = GeoHasher::default();
        let hash = hasher.encode(40.7128, -74.0060);
        let neighbors = hasher.neighbors(&hash).unwrap();

        let all = [
            &neighbors.n,
            &neighbors.ne,
            &neighbors.e,
            &neighbors.se,
            &neighbors.s,
            &neighbors.sw,
            &neighbors.w,
            &neighbors.nw,
        ];
        for cell in all {
            assert_eq!(cell.len(), hash.len());
            assert_ne!(cell, &hash);
        }

        let centre = hasher.bounds(&hash).unwrap();
        let north = hasher.bounds(&neighbors.n).unwrap();
        assert!((north.lat_min - centre.lat_max).abs() < 1e-9);
        let east = hasher.bounds(&neighbors.e).unwrap();
        assert!((east.lon_min - centre.lon_max).abs() < 1e-9);
    }
}
