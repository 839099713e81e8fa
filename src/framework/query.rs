//! # Queries
//!
//! A [`Query`] is one load step of a plan: one aggregate type, a [`Criteria`], a
//! [`LockMode`] and (read-only plans only) ordering and pagination. It is immutable once
//! the plan is built, except for its result slot, which is filled exactly once when the
//! query executes and is then read by later `from_previous()` terms.
//!
//! Storage never sees a `Query`; it receives a [`LoadStatement`], the same step with all
//! deferred values resolved.

use crate::framework::criteria::{Criteria, ResolvedCriteria};
use crate::framework::error::PlanError;
use crate::framework::resource::{Resource, ResourceKind};
use std::fmt;

/// Row-lock discipline of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    NoLock,
    Shared,
    SharedNoWait,
    Exclusive,
    ExclusiveNoWait,
}

impl LockMode {
    pub fn is_locking(self) -> bool {
        self != LockMode::NoLock
    }

    pub fn is_shared(self) -> bool {
        matches!(self, LockMode::Shared | LockMode::SharedNoWait)
    }

    pub fn is_exclusive(self) -> bool {
        matches!(self, LockMode::Exclusive | LockMode::ExclusiveNoWait)
    }

    /// `*_NOWAIT` modes fail immediately instead of waiting for a conflicting lock.
    pub fn is_nowait(self) -> bool {
        matches!(self, LockMode::SharedNoWait | LockMode::ExclusiveNoWait)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockMode::NoLock => "NO_LOCK",
            LockMode::Shared => "SHARED",
            LockMode::SharedNoWait => "SHARED_NOWAIT",
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::ExclusiveNoWait => "EXCLUSIVE_NOWAIT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub attribute: String,
    pub descending: bool,
}

/// Ordering and pagination of a read-only query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    pub order_by: Option<OrderBy>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn is_empty(&self) -> bool {
        self.order_by.is_none() && self.offset.is_none() && self.limit.is_none()
    }
}

/// One load step of a [`QueryPlan`](crate::framework::QueryPlan).
#[derive(Debug, Clone)]
pub struct Query<R: Resource> {
    index: usize,
    kind: R::Kind,
    criteria: Criteria<R>,
    lock: LockMode,
    pagination: Pagination,
    result: Option<Vec<R>>,
}

impl<R: Resource> Query<R> {
    pub(crate) fn new(
        index: usize,
        kind: R::Kind,
        criteria: Criteria<R>,
        lock: LockMode,
        pagination: Pagination,
    ) -> Self {
        Self {
            index,
            kind,
            criteria,
            lock,
            pagination,
            result: None,
        }
    }

    /// Position of this query in its plan.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> R::Kind {
        self.kind
    }

    pub fn criteria(&self) -> &Criteria<R> {
        &self.criteria
    }

    pub fn lock(&self) -> LockMode {
        self.lock
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn is_loaded(&self) -> bool {
        self.result.is_some()
    }

    /// Attaches the loaded aggregates. A query is loaded at most once.
    pub fn attach(&mut self, result: Vec<R>) -> Result<(), PlanError> {
        if self.result.is_some() {
            return Err(PlanError::AlreadyLoaded(self.index));
        }
        self.result = Some(result);
        Ok(())
    }

    /// The aggregates this query loaded.
    pub fn result(&self) -> Result<&[R], PlanError> {
        self.result
            .as_deref()
            .ok_or(PlanError::NotLoaded(self.index))
    }
}

/// A query with every deferred value evaluated; what the storage collaborator executes.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadStatement<K: ResourceKind> {
    pub query_index: usize,
    pub kind: K,
    pub criteria: ResolvedCriteria,
    pub lock: LockMode,
    pub pagination: Pagination,
}

impl<K: ResourceKind> fmt::Display for LoadStatement<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LOAD {} WHERE {}", self.kind, self.criteria)?;
        if let Some(order_by) = &self.pagination.order_by {
            let direction = if order_by.descending { "DESC" } else { "ASC" };
            write!(f, " ORDER BY {} {}", order_by.attribute, direction)?;
        }
        if let Some(limit) = self.pagination.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.pagination.offset {
            write!(f, " OFFSET {offset}")?;
        }
        if self.lock.is_locking() {
            write!(f, " LOCK {}", self.lock)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ShopKind, ShopResource};

    #[test]
    fn lock_mode_classification() {
        assert!(!LockMode::NoLock.is_locking());
        assert!(LockMode::SharedNoWait.is_shared() && LockMode::SharedNoWait.is_nowait());
        assert!(LockMode::Exclusive.is_exclusive() && !LockMode::Exclusive.is_nowait());
        assert_eq!(LockMode::default(), LockMode::NoLock);
        assert_eq!(LockMode::ExclusiveNoWait.to_string(), "EXCLUSIVE_NOWAIT");
    }

    #[test]
    fn result_slot_is_filled_once() {
        let mut query = Query::<ShopResource>::new(
            0,
            ShopKind::Customer,
            Criteria::new(),
            LockMode::Shared,
            Pagination::default(),
        );
        assert_eq!(query.result().unwrap_err(), PlanError::NotLoaded(0));
        query.attach(vec![]).unwrap();
        assert!(query.is_loaded());
        assert_eq!(query.attach(vec![]), Err(PlanError::AlreadyLoaded(0)));
    }
}
