use crate::framework::criteria::compare_values;
use crate::framework::resource::{attribute, to_value};
use crate::framework::{
    ChangeSet, EntityId, LoadStatement, LockMode, Resource, Storage, StorageError, Transaction,
    TransactionOptions,
};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

type TxId = u64;
type RowKey<K> = (K, EntityId);

#[derive(Debug, Default)]
struct RowLock {
    shared: HashSet<TxId>,
    exclusive: Option<TxId>,
}

impl RowLock {
    /// The transaction blocking `tx` from taking `lock`, if any.
    fn conflict(&self, tx: TxId, lock: LockMode) -> Option<TxId> {
        if let Some(holder) = self.exclusive.filter(|holder| *holder != tx) {
            return Some(holder);
        }
        if lock.is_exclusive() {
            return self.shared.iter().copied().find(|holder| *holder != tx);
        }
        None
    }

    fn grant(&mut self, tx: TxId, lock: LockMode) {
        if lock.is_exclusive() {
            self.exclusive = Some(tx);
        } else {
            self.shared.insert(tx);
        }
    }

    fn release(&mut self, tx: TxId) {
        self.shared.remove(&tx);
        if self.exclusive == Some(tx) {
            self.exclusive = None;
        }
    }

    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }
}

struct StoreState<R: Resource> {
    tables: HashMap<R::Kind, BTreeMap<EntityId, R>>,
    locks: HashMap<RowKey<R::Kind>, RowLock>,
}

struct Inner<R: Resource> {
    state: Mutex<StoreState<R>>,
    released: Notify,
    next_tx: AtomicU64,
}

impl<R: Resource> Inner<R> {
    fn lock(&self) -> MutexGuard<'_, StoreState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_all(&self, tx: TxId, held: &mut Vec<RowKey<R::Kind>>) {
        if held.is_empty() {
            return;
        }
        let mut state = self.lock();
        for key in held.drain(..) {
            if let Some(row) = state.locks.get_mut(&key) {
                row.release(tx);
                if row.is_free() {
                    state.locks.remove(&key);
                }
            }
        }
        drop(state);
        self.released.notify_waiters();
    }
}

/// In-process storage with row-level shared and exclusive locks.
///
/// Rows are kept per kind, ordered by entity id. Locks belong to transactions and are
/// held until commit, rollback or drop. Writes are staged by `persist` and become
/// visible to other transactions only on commit. Loads read committed rows.
pub struct MemoryStore<R: Resource> {
    inner: Arc<Inner<R>>,
}

impl<R: Resource> Clone for MemoryStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState {
                    tables: HashMap::new(),
                    locks: HashMap::new(),
                }),
                released: Notify::new(),
                next_tx: AtomicU64::new(1),
            }),
        }
    }

    /// Inserts committed rows directly, replacing rows with the same id.
    pub fn seed(&self, rows: impl IntoIterator<Item = R>) {
        let mut state = self.inner.lock();
        for row in rows {
            state
                .tables
                .entry(row.kind())
                .or_default()
                .insert(row.entity_id().clone(), row);
        }
    }

    /// Committed rows of `kind`, ordered by id.
    pub fn rows(&self, kind: R::Kind) -> Vec<R> {
        self.inner
            .lock()
            .tables
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, kind: R::Kind, entity_id: &str) -> Option<R> {
        self.inner
            .lock()
            .tables
            .get(&kind)
            .and_then(|table| table.get(entity_id).cloned())
    }

    /// Number of rows currently locked by any transaction.
    pub fn locked_rows(&self) -> usize {
        self.inner.lock().locks.len()
    }
}

#[async_trait]
impl<R: Resource> Storage<R> for MemoryStore<R> {
    async fn begin(
        &self,
        options: &TransactionOptions,
    ) -> Result<Box<dyn Transaction<R>>, StorageError> {
        let id = self.inner.next_tx.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(tx = id, read_only = options.read_only, "Transaction started");
        Ok(Box::new(MemoryTransaction {
            id,
            inner: self.inner.clone(),
            wait_timeout: options.wait_timeout,
            held: Vec::new(),
            staged: Vec::new(),
            closed: false,
        }))
    }
}

enum Write<R: Resource> {
    Upsert(R),
    Delete(R::Kind, EntityId),
}

enum Attempt<R> {
    Loaded(Vec<R>),
    Blocked(TxId),
}

struct MemoryTransaction<R: Resource> {
    id: TxId,
    inner: Arc<Inner<R>>,
    wait_timeout: Duration,
    held: Vec<RowKey<R::Kind>>,
    staged: Vec<Write<R>>,
    closed: bool,
}

impl<R: Resource> MemoryTransaction<R> {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    /// Selects the matching rows and, if none of them is blocked, locks them all.
    fn try_load(&mut self, statement: &LoadStatement<R::Kind>) -> Result<Attempt<R>, StorageError> {
        let mut state = self.inner.lock();
        let rows = select(&state, statement)?;
        if !statement.lock.is_locking() {
            return Ok(Attempt::Loaded(rows));
        }

        let keys: Vec<RowKey<R::Kind>> = rows
            .iter()
            .map(|row| (row.kind(), row.entity_id().clone()))
            .collect();
        for key in &keys {
            if let Some(holder) = state
                .locks
                .get(key)
                .and_then(|row| row.conflict(self.id, statement.lock))
            {
                return Ok(Attempt::Blocked(holder));
            }
        }
        for key in keys {
            let row = state.locks.entry(key.clone()).or_default();
            row.grant(self.id, statement.lock);
            if !self.held.contains(&key) {
                self.held.push(key);
            }
        }
        Ok(Attempt::Loaded(rows))
    }

    fn close(&mut self) {
        self.closed = true;
        self.staged.clear();
        self.inner.release_all(self.id, &mut self.held);
    }
}

/// Filters, orders and paginates the committed rows of the statement's kind.
fn select<R: Resource>(
    state: &StoreState<R>,
    statement: &LoadStatement<R::Kind>,
) -> Result<Vec<R>, StorageError> {
    let Some(table) = state.tables.get(&statement.kind) else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::new();
    for row in table.values() {
        let value = to_value(row).map_err(|e| StorageError::Backend(e.to_string()))?;
        if statement.criteria.matches(&value) {
            rows.push((value, row.clone()));
        }
    }

    if let Some(order_by) = &statement.pagination.order_by {
        rows.sort_by(|(a, _), (b, _)| {
            let ordering = compare_values(
                attribute(a, &order_by.attribute),
                attribute(b, &order_by.attribute),
            )
            .unwrap_or(Ordering::Equal);
            if order_by.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    let offset = statement.pagination.offset.unwrap_or(0);
    let limit = statement.pagination.limit.unwrap_or(usize::MAX);
    Ok(rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(_, row)| row)
        .collect())
}

#[async_trait]
impl<R: Resource> Transaction<R> for MemoryTransaction<R> {
    async fn execute(&mut self, statement: &LoadStatement<R::Kind>) -> Result<Vec<R>, StorageError> {
        self.ensure_open()?;
        let deadline = Instant::now() + self.wait_timeout;
        let inner = self.inner.clone();
        loop {
            // Registered before the attempt so a release in between is not missed.
            let released = inner.released.notified();
            let holder = match self.try_load(statement)? {
                Attempt::Loaded(rows) => return Ok(rows),
                Attempt::Blocked(holder) => holder,
            };
            if statement.lock.is_nowait() {
                debug!(tx = self.id, holder, %statement, "Lock not available");
                return Err(StorageError::WouldBlock(format!(
                    "{} held by transaction {holder}",
                    statement.kind
                )));
            }
            debug!(tx = self.id, holder, %statement, "Waiting for lock");
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(StorageError::LockTimeout(format!(
                    "{} held by transaction {holder} after {:?}",
                    statement.kind, self.wait_timeout
                )));
            }
        }
    }

    async fn persist(&mut self, changes: &ChangeSet<R>) -> Result<(), StorageError> {
        self.ensure_open()?;
        {
            let state = self.inner.lock();
            for (kind, entry) in changes.forward() {
                for created in &entry.created {
                    let exists = state
                        .tables
                        .get(&kind)
                        .is_some_and(|table| table.contains_key(created.entity_id()));
                    if exists {
                        return Err(StorageError::Backend(format!(
                            "Duplicate entry {} for {kind}",
                            created.entity_id()
                        )));
                    }
                }
            }
        }

        for (kind, entry) in changes.backward() {
            for deleted in &entry.deleted {
                self.staged
                    .push(Write::Delete(kind, deleted.entity_id().clone()));
            }
        }
        for (_, entry) in changes.forward() {
            for row in entry.created.iter().chain(&entry.updated) {
                self.staged.push(Write::Upsert(row.clone()));
            }
        }
        debug!(tx = self.id, writes = self.staged.len(), "Changes staged");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        {
            let mut state = self.inner.lock();
            for write in self.staged.drain(..) {
                match write {
                    Write::Upsert(row) => {
                        state
                            .tables
                            .entry(row.kind())
                            .or_default()
                            .insert(row.entity_id().clone(), row);
                    }
                    Write::Delete(kind, entity_id) => {
                        if let Some(table) = state.tables.get_mut(&kind) {
                            table.remove(&entity_id);
                        }
                    }
                }
            }
        }
        debug!(tx = self.id, "Transaction committed");
        self.close();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        debug!(tx = self.id, "Transaction rolled back");
        self.close();
        Ok(())
    }
}

impl<R: Resource> Drop for MemoryTransaction<R> {
    fn drop(&mut self) {
        if !self.closed {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::criteria::{Comparison, ResolvedCriteria, ResolvedTerm};
    use crate::framework::{Aggregate, OrderBy, Pagination};
    use crate::model::{Customer, Product, ShopKind, ShopResource};
    use serde_json::json;

    fn statement(kind: ShopKind, ids: &[&str], lock: LockMode) -> LoadStatement<ShopKind> {
        LoadStatement {
            query_index: 0,
            kind,
            criteria: ResolvedCriteria::single(ResolvedTerm::new(
                "entity_id",
                Comparison::In,
                ids.iter().map(|id| json!(id)).collect(),
            )),
            lock,
            pagination: Pagination::default(),
        }
    }

    fn options(wait_ms: u64) -> TransactionOptions {
        TransactionOptions {
            wait_timeout: Duration::from_millis(wait_ms),
            read_only: false,
        }
    }

    fn store() -> MemoryStore<ShopResource> {
        let store = MemoryStore::new();
        store.seed([
            Customer::new("c1", "Alice").into_resource(),
            Customer::new("c2", "Bob").into_resource(),
        ]);
        store
    }

    #[tokio::test]
    async fn shared_locks_are_compatible() {
        let store = store();
        let mut first = store.begin(&options(50)).await.unwrap();
        let mut second = store.begin(&options(50)).await.unwrap();
        let query = statement(ShopKind::Customer, &["c1"], LockMode::Shared);

        assert_eq!(first.execute(&query).await.unwrap().len(), 1);
        assert_eq!(second.execute(&query).await.unwrap().len(), 1);
        assert_eq!(store.locked_rows(), 1);
    }

    #[tokio::test]
    async fn nowait_conflict_fails_immediately() {
        let store = store();
        let mut holder = store.begin(&options(50)).await.unwrap();
        holder
            .execute(&statement(ShopKind::Customer, &["c1"], LockMode::Exclusive))
            .await
            .unwrap();

        let mut other = store.begin(&options(5_000)).await.unwrap();
        let started = std::time::Instant::now();
        let result = other
            .execute(&statement(ShopKind::Customer, &["c1"], LockMode::SharedNoWait))
            .await;
        assert!(matches!(result, Err(StorageError::WouldBlock(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn waiting_lock_times_out() {
        let store = store();
        let mut holder = store.begin(&options(50)).await.unwrap();
        holder
            .execute(&statement(ShopKind::Customer, &["c1"], LockMode::Shared))
            .await
            .unwrap();

        let mut other = store.begin(&options(30)).await.unwrap();
        let result = other
            .execute(&statement(ShopKind::Customer, &["c1"], LockMode::Exclusive))
            .await;
        assert!(matches!(result, Err(StorageError::LockTimeout(_))));
    }

    #[tokio::test]
    async fn waiting_lock_is_granted_when_the_holder_finishes() {
        let store = store();
        let mut holder = store.begin(&options(50)).await.unwrap();
        holder
            .execute(&statement(ShopKind::Customer, &["c1"], LockMode::Exclusive))
            .await
            .unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store.begin(&options(2_000)).await.unwrap();
            tx.execute(&statement(ShopKind::Customer, &["c1"], LockMode::Exclusive))
                .await
                .map(|rows| rows.len())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.rollback().await.unwrap();
        assert_eq!(waiter.await.unwrap(), Ok(1));
    }

    #[tokio::test]
    async fn dropping_a_transaction_releases_its_locks() {
        let store = store();
        {
            let mut tx = store.begin(&options(50)).await.unwrap();
            tx.execute(&statement(ShopKind::Customer, &["c1", "c2"], LockMode::Exclusive))
                .await
                .unwrap();
            assert_eq!(store.locked_rows(), 2);
        }
        assert_eq!(store.locked_rows(), 0);
    }

    #[tokio::test]
    async fn staged_writes_are_visible_only_after_commit() {
        let store = store();
        let mut tx = store.begin(&options(50)).await.unwrap();
        let mut changes = ChangeSet::default();
        changes
            .entry_mut(ShopKind::Product)
            .created
            .push(Product::new("p1", "Widget", 250, 4).into_resource());
        changes
            .entry_mut(ShopKind::Customer)
            .deleted
            .push(Customer::new("c2", "Bob").into_resource());

        tx.persist(&changes).await.unwrap();
        assert!(store.get(ShopKind::Product, "p1").is_none());
        assert!(store.get(ShopKind::Customer, "c2").is_some());

        tx.commit().await.unwrap();
        assert!(store.get(ShopKind::Product, "p1").is_some());
        assert!(store.get(ShopKind::Customer, "c2").is_none());
        assert_eq!(tx.commit().await, Err(StorageError::TransactionClosed));
    }

    #[tokio::test]
    async fn creating_an_existing_id_is_rejected() {
        let store = store();
        let mut tx = store.begin(&options(50)).await.unwrap();
        let mut changes = ChangeSet::default();
        changes
            .entry_mut(ShopKind::Customer)
            .created
            .push(Customer::new("c1", "Alice again").into_resource());
        assert!(matches!(
            tx.persist(&changes).await,
            Err(StorageError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn order_by_and_pagination() {
        let store = MemoryStore::<ShopResource>::new();
        store.seed([
            Product::new("p1", "Anvil", 900, 1).into_resource(),
            Product::new("p2", "Bolt", 5, 100).into_resource(),
            Product::new("p3", "Crate", 40, 10).into_resource(),
        ]);
        let mut tx = store.begin(&options(50)).await.unwrap();
        let query = LoadStatement {
            query_index: 0,
            kind: ShopKind::Product,
            criteria: ResolvedCriteria::default(),
            lock: LockMode::NoLock,
            pagination: Pagination {
                order_by: Some(OrderBy {
                    attribute: "price".into(),
                    descending: true,
                }),
                offset: Some(1),
                limit: Some(1),
            },
        };
        let rows = tx.execute(&query).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.entity_id().as_str()).collect();
        assert_eq!(ids, vec!["p3"]);
    }
}
