// ============================================================================
// rideshard Library
// ============================================================================

pub mod connection;
pub mod coordinator;
pub mod core;
pub mod geo;
pub mod interface;
pub mod storage;

// Re-export main types for convenience
pub use crate::core::{
    CoordinatorError, DEFAULT_LIST_LIMIT, NewRide, RegionHealth, RegionStatus, Result, Ride,
    RideFilter, RidePatch, RideStatus, StoreError, StoreResult, Value,
};

// Re-export connection API
pub use crate::connection::{
    RegionHandle,
    config::StoreParams,
    registry::{ConnectionRegistry, ConnectionState},
};

// Re-export coordination API
pub use crate::coordinator::{
    Coordinator, CoordinatorConfig, HealthMonitor, ProbeReport, RetryPolicy, run_health_tick,
};
pub use crate::geo::{GeoCell, GeoHasher, GeoNeighbors, RegionBounds, RegionDescriptor, RegionMap};
pub use crate::interface::{RegionConnection, RegionConnector};
pub use crate::storage::{
    MemoryConnector, MemoryRegionStore, PgConnector, RideStatement, StatementKind,
    StatementOutcome,
};
