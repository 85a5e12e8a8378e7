pub mod error;
pub mod types;
pub mod value;

pub use error::{CoordinatorError, Result, StoreError, StoreResult};
pub use types::{
    DEFAULT_LIST_LIMIT, NewRide, RegionHealth, RegionStatus, Ride, RideFilter, RidePatch,
    RideStatus,
};
pub use value::Value;
