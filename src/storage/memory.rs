use super::statement::{RideStatement, StatementKind, StatementOutcome};
use crate::connection::config::StoreParams;
use crate::core::{Ride, StoreError, StoreResult};
use crate::interface::{RegionConnection, RegionConnector};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A simulated regional store.
///
/// Rows live in memory; reachability and failures can be toggled at runtime
/// to exercise fallback, retry and migration paths.
pub struct MemoryRegionStore {
    region: String,
    rows: RwLock<BTreeMap<Uuid, Ride>>,
    reachable: AtomicBool,
    /// Number of upcoming statements that fail with a connection error
    transient_failures: AtomicUsize,
    /// Number of upcoming statements that commit but lose their reply
    lost_replies: AtomicUsize,
    /// Statement kinds that fail with a non-transient error
    rejected: RwLock<HashSet<StatementKind>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    statements: AtomicUsize,
}

impl MemoryRegionStore {
    pub fn new(region: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            region: region.into(),
            rows: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            transient_failures: AtomicUsize::new(0),
            lost_replies: AtomicUsize::new(0),
            rejected: RwLock::new(HashSet::new()),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            statements: AtomicUsize::new(0),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Make the next `count` statements fail with a connection error.
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` statements take effect and then fail with a
    /// connection error, as if the reply was lost in transit.
    pub fn lose_next_reply(&self, count: usize) {
        self.lost_replies.store(count, Ordering::SeqCst);
    }

    /// Make every statement of `kind` fail with a statement error.
    pub async fn reject(&self, kind: StatementKind) {
        self.rejected.write().await.insert(kind);
    }

    pub async fn allow(&self, kind: StatementKind) {
        self.rejected.write().await.remove(&kind);
    }

    /// Insert a row directly, bypassing the coordinator.
    pub async fn seed(&self, ride: Ride) {
        self.rows.write().await.insert(ride.ride_id, ride);
    }

    pub async fn get(&self, ride_id: Uuid) -> Option<Ride> {
        self.rows.read().await.get(&ride_id).cloned()
    }

    pub async fn contains(&self, ride_id: Uuid) -> bool {
        self.rows.read().await.contains_key(&ride_id)
    }

    pub async fn rows(&self) -> Vec<Ride> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(StoreError::Connection(format!(
                "region '{}' is unreachable",
                self.region
            )))
        }
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn connection_reset(&self) -> StoreError {
        StoreError::Connection(format!(
            "connection to region '{}' reset by peer",
            self.region
        ))
    }

    async fn apply(&self, statement: &RideStatement) -> StoreResult<StatementOutcome> {
        self.check_reachable()?;
        self.statements.fetch_add(1, Ordering::SeqCst);

        if Self::take_one(&self.transient_failures) {
            return Err(self.connection_reset());
        }

        let outcome = self.run(statement).await?;
        if Self::take_one(&self.lost_replies) {
            return Err(self.connection_reset());
        }
        Ok(outcome)
    }

    async fn run(&self, statement: &RideStatement) -> StoreResult<StatementOutcome> {
        let kind = statement.kind();
        if self.rejected.read().await.contains(&kind) {
            return Err(StoreError::Statement(format!(
                "{} rejected by region '{}'",
                kind, self.region
            )));
        }

        match statement {
            RideStatement::Insert(ride) => {
                let mut rows = self.rows.write().await;
                if rows.contains_key(&ride.ride_id) {
                    return Err(StoreError::Statement(format!(
                        "duplicate key value violates unique constraint \"rides_pkey\": {}",
                        ride.ride_id
                    )));
                }
                rows.insert(ride.ride_id, ride.clone());
                Ok(StatementOutcome::Rows(vec![ride.clone()]))
            }
            RideStatement::SelectById(id) => {
                let rows = self.rows.read().await;
                Ok(StatementOutcome::Rows(rows.get(id).cloned().into_iter().collect()))
            }
            RideStatement::Select(filter) => {
                let rows = self.rows.read().await;
                let mut matched: Vec<Ride> = rows
                    .values()
                    .filter(|ride| filter.matches(ride))
                    .cloned()
                    .collect();
                matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                matched.truncate(filter.limit);
                Ok(StatementOutcome::Rows(matched))
            }
            RideStatement::Update {
                ride_id,
                assignments,
            } => {
                let mut rows = self.rows.write().await;
                match rows.get_mut(ride_id) {
                    Some(ride) => {
                        for assignment in assignments {
                            assignment.apply_to(ride);
                        }
                        Ok(StatementOutcome::Rows(vec![ride.clone()]))
                    }
                    None => Ok(StatementOutcome::Rows(Vec::new())),
                }
            }
            RideStatement::Delete(id) => {
                let mut rows = self.rows.write().await;
                let removed = rows.remove(id).map(|_| 1).unwrap_or(0);
                Ok(StatementOutcome::Affected(removed))
            }
        }
    }
}

/// A connection handle onto a [`MemoryRegionStore`].
pub struct MemoryConnection {
    store: Arc<MemoryRegionStore>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegionConnection for MemoryConnection {
    async fn execute(&self, statement: &RideStatement) -> StoreResult<StatementOutcome> {
        self.check_open()?;
        self.store.apply(statement).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_open()?;
        self.store.check_reachable()
    }

    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.store.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Connector over a fixed set of in-memory regional stores.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    stores: HashMap<String, Arc<MemoryRegionStore>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates one empty store per region id.
    pub fn with_regions<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut connector = Self::new();
        for region in regions {
            connector.add_store(MemoryRegionStore::new(region));
        }
        connector
    }

    pub fn add_store(&mut self, store: Arc<MemoryRegionStore>) {
        self.stores.insert(store.region().to_string(), store);
    }

    pub fn store(&self, region: &str) -> Option<Arc<MemoryRegionStore>> {
        self.stores.get(region).cloned()
    }
}

#[async_trait]
impl RegionConnector for MemoryConnector {
    async fn connect(
        &self,
        region: &str,
        _params: &StoreParams,
    ) -> StoreResult<Arc<dyn RegionConnection>> {
        let store = self.store(region).ok_or_else(|| {
            StoreError::Connection(format!("no store is listening for region '{}'", region))
        })?;
        store.check_reachable()?;
        store.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryConnection {
            store,
            closed: AtomicBool::new(false),
        }))
    }
}
