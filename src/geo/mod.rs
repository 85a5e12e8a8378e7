pub mod geohash;
pub mod region;

pub use geohash::{DEFAULT_GEOHASH_PRECISION, GeoCell, GeoHasher, GeoNeighbors};
pub use region::{RegionBounds, RegionDescriptor, RegionMap};
