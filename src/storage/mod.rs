pub mod memory;
pub mod postgres;
pub mod statement;

pub use memory::{MemoryConnection, MemoryConnector, MemoryRegionStore};
pub use postgres::{PgConnector, PgRegionConnection};
pub use statement::{
    Assignment, RIDE_COLUMNS, RideColumn, RideStatement, StatementKind, StatementOutcome,
};
