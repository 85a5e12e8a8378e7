use crate::connection::config::StoreParams;
use crate::core::StoreResult;
use crate::storage::statement::{RideStatement, StatementOutcome};
use async_trait::async_trait;
use std::sync::Arc;

/// An open connection to one regional store.
///
/// The coordinator only needs three things from a store: run one of the
/// fixed ride statements, answer a trivial liveness probe, and close.
/// Wrap a real driver (PostgreSQL, CockroachDB) or use the in-memory
/// backend for tests.
#[async_trait]
pub trait RegionConnection: Send + Sync {
    /// Execute a parameterized statement, returning rows or an affected-row count.
    async fn execute(&self, statement: &RideStatement) -> StoreResult<StatementOutcome>;

    /// Trivial round-trip used by health checks.
    async fn ping(&self) -> StoreResult<()>;

    /// Release the connection. Statements issued afterwards fail with `Closed`.
    async fn close(&self) -> StoreResult<()>;
}

/// A factory for regional store connections.
#[async_trait]
pub trait RegionConnector: Send + Sync {
    /// Open a fresh connection to `region` using its static parameters.
    async fn connect(
        &self,
        region: &str,
        params: &StoreParams,
    ) -> StoreResult<Arc<dyn RegionConnection>>;
}
