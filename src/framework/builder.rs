//! # Query Plan Builder
//!
//! Fluent construction of a [`QueryPlan`]:
//!
//! ```ignore
//! let plan = QueryBuilder::locking(&registry)
//!     .load(ShopKind::Customer).from_id(["c1"]).for_update(false)
//!     .load(ShopKind::PurchaseOrder).from_previous(None).for_update(false)
//!     .build()?;
//! ```
//!
//! `load()` opens a query (finalizing the one before it); terms, connectives, the lock
//! and pagination apply to the open query. The builder only checks that each query is
//! well-formed; [`QueryPlan::validate`] enforces the locking protocol when `build()` runs.
//!
//! Every method takes and returns `self`. The first error is kept, later calls are
//! ignored, and `build()` reports it.

use crate::framework::criteria::{Comparison, Connective, Criteria, Term, ValueSource};
use crate::framework::error::PlanError;
use crate::framework::plan::{PlanMode, QueryPlan};
use crate::framework::query::{LockMode, OrderBy, Pagination, Query};
use crate::framework::registry::Registry;
use crate::framework::resource::{Resource, ENTITY_ID};
use serde_json::Value;

struct OpenQuery<R: Resource> {
    kind: R::Kind,
    criteria: Criteria<R>,
    lock: LockMode,
    pagination: Pagination,
}

/// Single-use builder for a [`QueryPlan`].
pub struct QueryBuilder<'r, R: Resource> {
    registry: &'r Registry<R>,
    plan: QueryPlan<R>,
    open: Option<OpenQuery<R>>,
    error: Option<PlanError>,
}

impl<'r, R: Resource> QueryBuilder<'r, R> {
    /// Builder for a plan whose queries all take row locks.
    pub fn locking(registry: &'r Registry<R>) -> Self {
        Self::new(registry, PlanMode::Locking)
    }

    /// Builder for a plan whose queries take no lock.
    pub fn read_only(registry: &'r Registry<R>) -> Self {
        Self::new(registry, PlanMode::ReadOnly)
    }

    fn new(registry: &'r Registry<R>, mode: PlanMode) -> Self {
        Self {
            registry,
            plan: QueryPlan::new(mode),
            open: None,
            error: None,
        }
    }

    /// Opens a query for `kind`, finalizing the open one first.
    pub fn load(mut self, kind: R::Kind) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.finalize();
        self.open = Some(OpenQuery {
            kind,
            criteria: Criteria::new(),
            lock: LockMode::NoLock,
            pagination: Pagination::default(),
        });
        self
    }

    // --- Criteria ---

    pub fn and_(self) -> Self {
        self.connective(Connective::And)
    }

    pub fn or_(self) -> Self {
        self.connective(Connective::Or)
    }

    pub fn equals(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.literal(attribute, Comparison::Equals, vec![value.into()])
    }

    pub fn is_in<V: Into<Value>>(self, attribute: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.literal(attribute, Comparison::In, values)
    }

    pub fn greater_than(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.literal(attribute, Comparison::GreaterThan, vec![value.into()])
    }

    pub fn less_than(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.literal(attribute, Comparison::LessThan, vec![value.into()])
    }

    /// Shorthand for `is_in(attribute, values)`.
    pub fn from_attribute<V: Into<Value>>(
        self,
        attribute: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.is_in(attribute, values)
    }

    /// Shorthand for `is_in("entity_id", ids)`.
    pub fn from_id<V: Into<Value>>(self, ids: impl IntoIterator<Item = V>) -> Self {
        self.is_in(ENTITY_ID, ids)
    }

    /// Filters the open query by keys derived from the result of an earlier query
    /// (the last finalized one when `index` is `None`). The keys are computed when the
    /// open query executes, through the registry's descriptor for the type pair.
    pub fn from_previous(self, index: Option<usize>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let resolved = self.deferred_term(index);
        self.with_open(|open| open.criteria.push_term(resolved?))
    }

    fn deferred_term(&self, index: Option<usize>) -> Result<Term<R>, PlanError> {
        let target = self.open.as_ref().ok_or(PlanError::NoModelType)?.kind;
        let query_index = self.plan.previous_index(index)?;
        let source = self.plan.query(query_index)?.kind();
        let descriptor = self.registry.descriptor(source, target)?;
        Ok(Term {
            attribute: descriptor.attribute().to_string(),
            comparison: Comparison::In,
            source: ValueSource::Deferred {
                query_index,
                descriptor: descriptor.clone(),
            },
        })
    }

    // --- Locks ---

    pub fn for_update(self, no_wait: bool) -> Self {
        self.lock(if no_wait {
            LockMode::ExclusiveNoWait
        } else {
            LockMode::Exclusive
        })
    }

    pub fn for_share(self, no_wait: bool) -> Self {
        self.lock(if no_wait {
            LockMode::SharedNoWait
        } else {
            LockMode::Shared
        })
    }

    pub fn no_lock(self) -> Self {
        self.lock(LockMode::NoLock)
    }

    fn lock(self, lock: LockMode) -> Self {
        self.with_open(|open| {
            open.lock = lock;
            Ok(())
        })
    }

    // --- Pagination (read-only plans) ---

    pub fn order_by(self, attribute: &str, descending: bool) -> Self {
        let order_by = OrderBy {
            attribute: attribute.to_string(),
            descending,
        };
        self.with_open(|open| {
            open.pagination.order_by = Some(order_by);
            Ok(())
        })
    }

    pub fn limit(self, limit: usize) -> Self {
        self.with_open(|open| {
            open.pagination.limit = Some(limit);
            Ok(())
        })
    }

    pub fn offset(self, offset: usize) -> Self {
        self.with_open(|open| {
            open.pagination.offset = Some(offset);
            Ok(())
        })
    }

    /// Finalizes the open query and validates the plan against the registry.
    pub fn build(mut self) -> Result<QueryPlan<R>, PlanError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if self.open.is_none() && self.plan.is_empty() {
            return Err(PlanError::NoModelType);
        }
        self.finalize();
        for query in self.plan.queries() {
            query.criteria().validate()?;
        }
        self.plan.validate(self.registry.total_order())?;
        Ok(self.plan)
    }

    fn connective(self, connective: Connective) -> Self {
        self.with_open(|open| open.criteria.push_connective(connective))
    }

    fn literal(self, attribute: &str, comparison: Comparison, values: Vec<Value>) -> Self {
        let term = Term {
            attribute: attribute.to_string(),
            comparison,
            source: ValueSource::Literal(values),
        };
        self.with_open(|open| open.criteria.push_term(term))
    }

    /// Applies `f` to the open query, recording the first error.
    fn with_open(mut self, f: impl FnOnce(&mut OpenQuery<R>) -> Result<(), PlanError>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let result = match self.open.as_mut() {
            Some(open) => f(open),
            None => Err(PlanError::NoModelType),
        };
        if let Err(error) = result {
            self.error = Some(error);
        }
        self
    }

    fn finalize(&mut self) {
        if let Some(open) = self.open.take() {
            let index = self.plan.len();
            self.plan.push(Query::new(
                index,
                open.kind,
                open.criteria,
                open.lock,
                open.pagination,
            ));
        }
    }
}
