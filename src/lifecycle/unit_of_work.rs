use crate::framework::{
    BoxError, ChangeSet, QueryPlan, Registry, Resource, ResourceContainer, Storage,
    StorageError, Transaction, TransactionOptions, UowError,
};
use crate::lifecycle::config::UnitOfWorkConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Lifecycle state of a [`UnitOfWork`].
///
/// ```text
/// CREATED -> LOADING -> OPEN -> COMMITTING -> COMMITTED
///                          \-------------------> ROLLED_BACK
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UowState {
    Created,
    Loading,
    Open,
    Committing,
    Committed,
    RolledBack,
}

/// Turns a NOWAIT lock conflict into the caller's retry error.
pub type RetryHook = Arc<dyn Fn(&StorageError) -> BoxError + Send + Sync>;

/// Per-unit-of-work options.
#[derive(Clone, Default)]
pub struct UnitOfWorkOptions {
    on_nowait: Option<RetryHook>,
    wait_timeout: Option<Duration>,
}

impl UnitOfWorkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports NOWAIT contention as [`UowError::Retry`] carrying the error `hook` builds.
    pub fn on_nowait(
        mut self,
        hook: impl Fn(&StorageError) -> BoxError + Send + Sync + 'static,
    ) -> Self {
        self.on_nowait = Some(Arc::new(hook));
        self
    }

    /// Overrides the factory's lock wait timeout for this unit of work.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for UnitOfWorkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkOptions")
            .field("on_nowait", &self.on_nowait.is_some())
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

/// Opens units of work against one storage and one registry.
///
/// # Example
///
/// ```ignore
/// let factory = UnitOfWorkFactory::new(storage, shop_registry().clone(), UnitOfWorkConfig::from_env());
///
/// let plan = QueryBuilder::locking(factory.registry())
///     .load(ShopKind::Customer).from_id(["c1"]).for_update(false)
///     .build()?;
/// let mut uow = factory.begin(Some(plan), UnitOfWorkOptions::new()).await?;
///
/// uow.resources_mut().get_by_id_mut::<Customer>("c1")?.name = "Alicia".into();
/// uow.mark_commit();
/// uow.finish().await?;
/// ```
pub struct UnitOfWorkFactory<R: Resource> {
    storage: Arc<dyn Storage<R>>,
    registry: Arc<Registry<R>>,
    config: UnitOfWorkConfig,
}

impl<R: Resource> Clone for UnitOfWorkFactory<R> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R: Resource> UnitOfWorkFactory<R> {
    pub fn new(
        storage: Arc<dyn Storage<R>>,
        registry: Arc<Registry<R>>,
        config: UnitOfWorkConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Registry<R> {
        &self.registry
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// Opens a unit of work: loads every query of `plan` (an empty read-only plan when
    /// `None`) and takes the baseline snapshot.
    ///
    /// On failure the storage transaction is rolled back before the error is returned.
    #[instrument(skip_all, fields(queries = plan.as_ref().map_or(0, QueryPlan::len)))]
    pub async fn begin(
        &self,
        plan: Option<QueryPlan<R>>,
        options: UnitOfWorkOptions,
    ) -> Result<UnitOfWork<R>, UowError> {
        let plan = plan.unwrap_or_else(QueryPlan::empty_read_only);
        plan.validate(self.registry.total_order())?;

        let tx_options = TransactionOptions {
            wait_timeout: options.wait_timeout.unwrap_or(self.config.wait_timeout),
            read_only: plan.is_read_only(),
        };
        let transaction = self.storage.begin(&tx_options).await?;

        let mut uow = UnitOfWork {
            state: UowState::Created,
            resources: ResourceContainer::new(self.registry.kinds()),
            plan,
            transaction: Some(transaction),
            registry: self.registry.clone(),
            commit_requested: false,
        };

        if let Err(error) = uow.load().await {
            let error = match (error, &options.on_nowait) {
                (UowError::Storage(e @ StorageError::WouldBlock(_)), Some(hook)) => {
                    UowError::Retry(hook(&e))
                }
                (error, _) => error,
            };
            warn!(%error, "Loading failed, rolling back");
            uow.abort().await;
            return Err(error);
        }

        info!(read_only = uow.plan.is_read_only(), "Unit of work opened");
        Ok(uow)
    }
}

/// One logical transaction: the loaded plan, its container and its storage transaction.
///
/// A unit of work ends through [`UnitOfWork::finish`] or [`UnitOfWork::rollback`], both of
/// which consume it. Dropping an open unit of work rolls back as well: the storage
/// transaction is dropped with it, releasing its locks.
pub struct UnitOfWork<R: Resource> {
    state: UowState,
    plan: QueryPlan<R>,
    resources: ResourceContainer<R>,
    transaction: Option<Box<dyn Transaction<R>>>,
    registry: Arc<Registry<R>>,
    commit_requested: bool,
}

impl<R: Resource> UnitOfWork<R> {
    pub fn state(&self) -> UowState {
        self.state
    }

    /// The loaded plan, with each query's result attached.
    pub fn plan(&self) -> &QueryPlan<R> {
        &self.plan
    }

    pub fn resources(&self) -> &ResourceContainer<R> {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceContainer<R> {
        &mut self.resources
    }

    /// Requests persistence when the unit of work finishes.
    pub fn mark_commit(&mut self) {
        self.commit_requested = true;
    }

    pub fn commit_requested(&self) -> bool {
        self.commit_requested
    }

    /// Ends the unit of work. Commits if [`UnitOfWork::mark_commit`] was called,
    /// rolls back otherwise. Every error rolls back; nothing is partially persisted.
    #[instrument(skip_all, fields(commit_requested = self.commit_requested))]
    pub async fn finish(mut self) -> Result<UowState, UowError> {
        if !self.commit_requested {
            self.abort().await;
            info!("Unit of work rolled back");
            return Ok(self.state);
        }
        if self.plan.is_read_only() {
            self.abort().await;
            warn!("Commit requested in a read-only unit of work");
            return Err(UowError::CommitInReadOnly);
        }

        match self.commit().await {
            Ok(changes) => {
                self.state = UowState::Committed;
                info!(changes, "Unit of work committed");
                Ok(self.state)
            }
            Err(error) => {
                warn!(%error, "Commit failed, rolling back");
                self.abort().await;
                Err(error)
            }
        }
    }

    /// Ends the unit of work without persisting anything.
    pub async fn rollback(mut self) -> Result<UowState, UowError> {
        self.state = UowState::RolledBack;
        if let Some(mut transaction) = self.transaction.take() {
            transaction.rollback().await?;
        }
        info!("Unit of work rolled back");
        Ok(self.state)
    }

    async fn load(&mut self) -> Result<(), UowError> {
        self.state = UowState::Loading;
        let transaction = self
            .transaction
            .as_mut()
            .ok_or(StorageError::TransactionClosed)?;

        for index in 0..self.plan.len() {
            let statement = self.plan.statement(index)?;
            let rows = transaction.execute(&statement).await?;
            debug!(
                query_index = index,
                kind = %statement.kind,
                lock = %statement.lock,
                rows = rows.len(),
                "Loaded"
            );
            self.resources.put_resources(rows.iter().cloned())?;
            self.plan.attach(index, rows)?;
        }

        self.resources.take_snapshot()?;
        self.state = UowState::Open;
        Ok(())
    }

    /// Snapshot, diff, validate against the plan, persist, commit. Returns the number
    /// of changed aggregates.
    async fn commit(&mut self) -> Result<usize, UowError> {
        self.state = UowState::Committing;
        self.resources.take_snapshot()?;
        let mut changes: ChangeSet<R> = self.resources.get_resource_changes()?;
        changes.sort_by(self.registry.total_order());
        self.plan.validate_changes(&changes)?;

        let transaction = self
            .transaction
            .as_mut()
            .ok_or(StorageError::TransactionClosed)?;
        if !changes.is_empty() {
            transaction.persist(&changes).await?;
        }
        transaction.commit().await?;
        self.transaction = None;
        Ok(changes.len())
    }

    /// Best-effort rollback on a failure path; the original error is what the caller sees.
    async fn abort(&mut self) {
        self.state = UowState::RolledBack;
        if let Some(mut transaction) = self.transaction.take() {
            if let Err(error) = transaction.rollback().await {
                warn!(%error, "Rollback failed");
            }
        }
    }
}

impl<R: Resource> Drop for UnitOfWork<R> {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            warn!(state = ?self.state, "Unit of work dropped without finish, rolling back");
            self.state = UowState::RolledBack;
        }
    }
}

impl<R: Resource> fmt::Debug for UnitOfWork<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .field("queries", &self.plan.len())
            .field("commit_requested", &self.commit_requested)
            .finish_non_exhaustive()
    }
}
