pub mod config;
pub mod registry;

use crate::core::{CoordinatorError, Result};
use crate::interface::RegionConnection;
use crate::storage::statement::{RideStatement, StatementOutcome};
use std::sync::Arc;

/// Connection handle lent out by the registry for a single operation
///
/// Callers must not keep it beyond the operation; the registry may replace
/// the underlying connection at any time.
#[derive(Clone)]
pub struct RegionHandle {
    region: String,
    generation: u64,
    connection: Arc<dyn RegionConnection>,
}

impl RegionHandle {
    pub(crate) fn new(
        region: impl Into<String>,
        generation: u64,
        connection: Arc<dyn RegionConnection>,
    ) -> Self {
        Self {
            region: region.into(),
            generation,
            connection,
        }
    }

    /// Region this handle is connected to
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Registry generation of the underlying connection
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Execute one statement, mapping store failures into the coordinator taxonomy
    pub async fn execute(&self, statement: &RideStatement) -> Result<StatementOutcome> {
        self.connection
            .execute(statement)
            .await
            .map_err(|err| CoordinatorError::from_store(&self.region, err))
    }

    /// Liveness probe
    pub async fn ping(&self) -> Result<()> {
        self.connection
            .ping()
            .await
            .map_err(|err| CoordinatorError::from_store(&self.region, err))
    }
}

impl std::fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionHandle")
            .field("region", &self.region)
            .field("generation", &self.generation)
            .finish()
    }
}
