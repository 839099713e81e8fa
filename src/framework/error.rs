//! # Engine Errors
//!
//! Errors are split by the phase that raises them, mirroring the taxonomy callers
//! actually need to branch on:
//!
//! | Error | Raised | Retry? |
//! |---|---|---|
//! | [`PlanError`] | building or executing a plan (static programmer errors) | never |
//! | [`StorageError`] | the storage collaborator | only [`StorageError::is_lock_contention`] |
//! | [`ConsistencyError`] | commit, when the diff is not covered by the plan's locks | never |
//! | [`ContainerError`] | container lookups and snapshotting | caller decides |
//!
//! [`UowError`] aggregates all of them for the unit-of-work surface.

use thiserror::Error;

/// Boxed caller error, used for the caller-chosen retry signal.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building the registry or resolving against it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The aggregate type has no priority in the total order.
    #[error("Unknown aggregate type: {0}")]
    UnknownType(String),

    /// The same aggregate type was registered twice in the total order.
    #[error("Aggregate type registered twice: {0}")]
    DuplicateKind(String),

    /// No reference descriptor for the `(source, target)` pair.
    #[error("No descriptor for {from} -> {to}")]
    NoDescriptor { from: String, to: String },
}

/// Build-time (static) errors of a query plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("No model type: load() must be called first")]
    NoModelType,

    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("Invalid query index {index} (plan has {len} queries)")]
    InvalidQueryIndex { index: usize, len: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A locking plan got a `NO_LOCK` query, or a read-only plan got a locking one.
    #[error("Query {index} for {kind} has lock {lock}, not allowed in a {plan} plan")]
    LockModeMismatch {
        index: usize,
        kind: String,
        lock: String,
        plan: &'static str,
    },

    #[error("Multiple queries for {0} in locking query plan")]
    DuplicateType(String),

    #[error("Locking order violation: {previous} (priority {previous_priority}) before {current} (priority {current_priority})")]
    LockingOrderViolation {
        previous: String,
        previous_priority: u32,
        current: String,
        current_priority: u32,
    },

    #[error("Ordering or pagination on {0} is only allowed in read-only plans")]
    PaginationInLockingPlan(String),

    #[error("Query {0} is already loaded")]
    AlreadyLoaded(usize),

    #[error("Query {0} is not loaded")]
    NotLoaded(usize),
}

/// Errors reported by the storage collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// A `*_NOWAIT` lock could not be granted immediately.
    #[error("Lock would block: {0}")]
    WouldBlock(String),

    #[error("Lock wait timeout exceeded: {0}")]
    LockTimeout(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Transaction is closed")]
    TransactionClosed,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Lock contention is the only storage condition designed to be retried.
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            StorageError::WouldBlock(_) | StorageError::LockTimeout(_) | StorageError::Deadlock(_)
        )
    }
}

/// Mismatch between what business logic changed and what the plan locked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("{0} changed without sufficient lock")]
    ChangedWithoutLock(String),

    #[error("{0} is locked in share mode but mutated")]
    MutatedUnderShareLock(String),

    #[error("{0} changed in a read-only query plan")]
    ChangedInReadOnlyPlan(String),
}

/// Errors raised by the resource container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No resource bucket for {0}")]
    UnregisteredKind(String),

    #[error("Could not find {kind} with {attribute} == {value}")]
    NotFound {
        kind: String,
        attribute: String,
        value: String,
    },

    #[error("Found {count} {kind} with {attribute} == {value}, expected one")]
    Ambiguous {
        kind: String,
        attribute: String,
        value: String,
        count: usize,
    },

    #[error("Snapshots are already taken")]
    SnapshotsAlreadyTaken,

    #[error("Snapshots are not taken yet")]
    SnapshotsNotTaken,

    #[error("Failed to serialize aggregate: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by a unit of work.
#[derive(Debug, Error)]
pub enum UowError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error("Cannot commit in non-mutating mode")]
    CommitInReadOnly,

    /// The caller-chosen error for NOWAIT contention.
    #[error("Retry requested: {0}")]
    Retry(#[source] BoxError),
}

impl UowError {
    /// `true` only for lock contention (category b) or the caller's retry signal.
    pub fn is_retryable(&self) -> bool {
        match self {
            UowError::Storage(e) => e.is_lock_contention(),
            UowError::Retry(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_contention_is_retryable() {
        assert!(UowError::from(StorageError::WouldBlock("row".into())).is_retryable());
        assert!(UowError::from(StorageError::LockTimeout("row".into())).is_retryable());
        assert!(!UowError::from(StorageError::Backend("disk".into())).is_retryable());
        assert!(!UowError::from(PlanError::NoModelType).is_retryable());
        assert!(!UowError::CommitInReadOnly.is_retryable());
    }

    #[test]
    fn registry_errors_nest_into_plan_errors() {
        let err: PlanError = RegistryError::UnknownType("Ghost".into()).into();
        assert_eq!(err.to_string(), "Unknown aggregate type: Ghost");
    }
}
