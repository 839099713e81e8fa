//! # Mock Storage
//!
//! A scripted [`Storage`] for testing unit-of-work flows without a backend.
//!
//! Every transaction opened from a [`MockStorage`] pops expectations from one shared
//! queue, in order. Anything that arrives out of script fails with a
//! [`StorageError::Backend`] and is remembered, so [`MockStorage::verify`] reports it.
//!
//! # Example
//! ```ignore
//! let mock = MockStorage::<ShopResource>::new();
//! mock.expect_execute(ShopKind::Customer).return_ok(vec![alice.into_resource()]);
//! mock.expect_persist().return_ok();
//! mock.expect_commit().return_ok();
//!
//! let factory = UnitOfWorkFactory::new(Arc::new(mock.clone()), registry, config);
//! // run the unit of work...
//! mock.verify(); // all expectations consumed, nothing unexpected
//! ```

use crate::framework::error::StorageError;
use crate::framework::query::LoadStatement;
use crate::framework::resource::Resource;
use crate::framework::snapshot::ChangeSet;
use crate::framework::storage::{Storage, Transaction, TransactionOptions};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

enum Expectation<R: Resource> {
    Execute {
        kind: R::Kind,
        response: Result<Vec<R>, StorageError>,
    },
    Persist {
        response: Result<(), StorageError>,
    },
    Commit {
        response: Result<(), StorageError>,
    },
    Rollback {
        response: Result<(), StorageError>,
    },
}

struct MockState<R: Resource> {
    expectations: VecDeque<Expectation<R>>,
    executed: Vec<LoadStatement<R::Kind>>,
    persisted: Vec<ChangeSet<R>>,
    unexpected: Vec<String>,
}

/// A storage double driven by a queue of expectations.
pub struct MockStorage<R: Resource> {
    state: Arc<Mutex<MockState<R>>>,
}

impl<R: Resource> Clone for MockStorage<R> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<R: Resource> Default for MockStorage<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MockStorage<R> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                executed: Vec::new(),
                persisted: Vec::new(),
                unexpected: Vec::new(),
            })),
        }
    }

    /// Expects a load of `kind`.
    pub fn expect_execute(&self, kind: R::Kind) -> ExecuteExpectationBuilder<R> {
        ExecuteExpectationBuilder {
            kind,
            state: self.state.clone(),
        }
    }

    pub fn expect_persist(&self) -> UnitExpectationBuilder<R> {
        self.unit(Step::Persist)
    }

    pub fn expect_commit(&self) -> UnitExpectationBuilder<R> {
        self.unit(Step::Commit)
    }

    pub fn expect_rollback(&self) -> UnitExpectationBuilder<R> {
        self.unit(Step::Rollback)
    }

    fn unit(&self, step: Step) -> UnitExpectationBuilder<R> {
        UnitExpectationBuilder {
            step,
            state: self.state.clone(),
        }
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<LoadStatement<R::Kind>> {
        lock(&self.state).executed.clone()
    }

    /// Change sets handed to `persist`, in order.
    pub fn persisted(&self) -> Vec<ChangeSet<R>> {
        lock(&self.state).persisted.clone()
    }

    /// Panics if an expectation was not consumed or a call arrived out of script.
    pub fn verify(&self) {
        let state = lock(&self.state);
        if !state.unexpected.is_empty() {
            panic!("Unexpected storage calls: {:?}", state.unexpected);
        }
        if !state.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining",
                state.expectations.len()
            );
        }
    }
}

fn lock<R: Resource>(state: &Mutex<MockState<R>>) -> MutexGuard<'_, MockState<R>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for `execute` expectations.
pub struct ExecuteExpectationBuilder<R: Resource> {
    kind: R::Kind,
    state: Arc<Mutex<MockState<R>>>,
}

impl<R: Resource> ExecuteExpectationBuilder<R> {
    pub fn return_ok(self, rows: Vec<R>) {
        self.push(Ok(rows));
    }

    pub fn return_err(self, error: StorageError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<Vec<R>, StorageError>) {
        lock(&self.state).expectations.push_back(Expectation::Execute {
            kind: self.kind,
            response,
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Persist,
    Commit,
    Rollback,
}

/// Builder for `persist`, `commit` and `rollback` expectations.
pub struct UnitExpectationBuilder<R: Resource> {
    step: Step,
    state: Arc<Mutex<MockState<R>>>,
}

impl<R: Resource> UnitExpectationBuilder<R> {
    pub fn return_ok(self) {
        self.push(Ok(()));
    }

    pub fn return_err(self, error: StorageError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<(), StorageError>) {
        let expectation = match self.step {
            Step::Persist => Expectation::Persist { response },
            Step::Commit => Expectation::Commit { response },
            Step::Rollback => Expectation::Rollback { response },
        };
        lock(&self.state).expectations.push_back(expectation);
    }
}

// =============================================================================
// STORAGE IMPLEMENTATION
// =============================================================================

#[async_trait]
impl<R: Resource> Storage<R> for MockStorage<R> {
    async fn begin(
        &self,
        _options: &TransactionOptions,
    ) -> Result<Box<dyn Transaction<R>>, StorageError> {
        Ok(Box::new(MockTransaction {
            state: self.state.clone(),
        }))
    }
}

struct MockTransaction<R: Resource> {
    state: Arc<Mutex<MockState<R>>>,
}

impl<R: Resource> MockTransaction<R> {
    fn unexpected<T>(state: &mut MockState<R>, call: String) -> Result<T, StorageError> {
        state.unexpected.push(call.clone());
        Err(StorageError::Backend(format!("unexpected call: {call}")))
    }

    fn unit_step(&self, step: Step) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        match (step, state.expectations.pop_front()) {
            (Step::Persist, Some(Expectation::Persist { response }))
            | (Step::Commit, Some(Expectation::Commit { response }))
            | (Step::Rollback, Some(Expectation::Rollback { response })) => response,
            (step, _) => Self::unexpected(&mut state, format!("{step:?}")),
        }
    }
}

#[async_trait]
impl<R: Resource> Transaction<R> for MockTransaction<R> {
    async fn execute(&mut self, statement: &LoadStatement<R::Kind>) -> Result<Vec<R>, StorageError> {
        let mut state = lock(&self.state);
        state.executed.push(statement.clone());
        match state.expectations.pop_front() {
            Some(Expectation::Execute { kind, response }) if kind == statement.kind => response,
            _ => Self::unexpected(&mut state, format!("Execute({statement})")),
        }
    }

    async fn persist(&mut self, changes: &ChangeSet<R>) -> Result<(), StorageError> {
        lock(&self.state).persisted.push(changes.clone());
        self.unit_step(Step::Persist)
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.unit_step(Step::Commit)
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.unit_step(Step::Rollback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::criteria::ResolvedCriteria;
    use crate::framework::query::{LockMode, Pagination};
    use crate::framework::Aggregate;
    use crate::model::{Customer, ShopKind, ShopResource};

    fn statement(kind: ShopKind) -> LoadStatement<ShopKind> {
        LoadStatement {
            query_index: 0,
            kind,
            criteria: ResolvedCriteria::default(),
            lock: LockMode::NoLock,
            pagination: Pagination::default(),
        }
    }

    #[tokio::test]
    async fn scripted_calls_return_scripted_responses() {
        let mock = MockStorage::<ShopResource>::new();
        mock.expect_execute(ShopKind::Customer)
            .return_ok(vec![Customer::new("c1", "Alice").into_resource()]);
        mock.expect_commit().return_err(StorageError::Backend("disk full".into()));

        let mut tx = mock.begin(&TransactionOptions::default()).await.unwrap();
        let rows = tx.execute(&statement(ShopKind::Customer)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            tx.commit().await,
            Err(StorageError::Backend("disk full".into()))
        );
        assert_eq!(mock.executed().len(), 1);
        mock.verify();
    }

    #[tokio::test]
    #[should_panic(expected = "Unexpected storage calls")]
    async fn out_of_script_call_fails_verification() {
        let mock = MockStorage::<ShopResource>::new();
        mock.expect_execute(ShopKind::Customer).return_ok(vec![]);

        let mut tx = mock.begin(&TransactionOptions::default()).await.unwrap();
        assert!(tx.execute(&statement(ShopKind::Product)).await.is_err());
        mock.verify();
    }

    #[tokio::test]
    #[should_panic(expected = "Not all expectations were met")]
    async fn leftover_expectations_fail_verification() {
        let mock = MockStorage::<ShopResource>::new();
        mock.expect_rollback().return_ok();
        mock.verify();
    }
}
