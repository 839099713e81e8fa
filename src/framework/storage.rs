//! # Storage Collaborator
//!
//! The engine never talks to a database directly. A [`Storage`] opens a [`Transaction`],
//! and the transaction executes resolved [`LoadStatement`]s and persists a [`ChangeSet`].
//!
//! Implementations must honor:
//!
//! - **Lock modes**: `SHARED*` / `EXCLUSIVE*` take row locks held until the transaction
//!   ends; `*_NOWAIT` fails with [`StorageError::WouldBlock`] instead of waiting.
//! - **Wait timeout**: a waiting lock gives up after [`TransactionOptions::wait_timeout`]
//!   with [`StorageError::LockTimeout`].
//! - **Persistence order**: deletions in [`ChangeSet::backward`] order, then creations and
//!   updates in [`ChangeSet::forward`] order. The change set arrives sorted by the total order.
//! - **Drop**: dropping an unfinished transaction releases its locks and discards its writes.

use crate::framework::error::StorageError;
use crate::framework::query::LoadStatement;
use crate::framework::resource::Resource;
use crate::framework::snapshot::ChangeSet;
use async_trait::async_trait;
use std::time::Duration;

/// Lock wait timeout used when nothing else is configured.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 1500;

/// Per-transaction settings handed to [`Storage::begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub wait_timeout: Duration,
    pub read_only: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            read_only: false,
        }
    }
}

/// Entry point of a storage backend.
#[async_trait]
pub trait Storage<R: Resource>: Send + Sync {
    async fn begin(
        &self,
        options: &TransactionOptions,
    ) -> Result<Box<dyn Transaction<R>>, StorageError>;
}

/// One open storage transaction.
#[async_trait]
pub trait Transaction<R: Resource>: Send {
    /// Loads the rows matching `statement`, taking the statement's lock on each.
    async fn execute(&mut self, statement: &LoadStatement<R::Kind>) -> Result<Vec<R>, StorageError>;

    /// Stages the change set; nothing is visible to others before [`Transaction::commit`].
    async fn persist(&mut self, changes: &ChangeSet<R>) -> Result<(), StorageError>;

    async fn commit(&mut self) -> Result<(), StorageError>;

    async fn rollback(&mut self) -> Result<(), StorageError>;
}
