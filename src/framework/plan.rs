//! # Query Plans
//!
//! A [`QueryPlan`] is the ordered list of [`Query`] steps a unit of work declared up front,
//! in one of two modes fixed for its whole lifetime:
//!
//! | Mode | Lock per query | Queries per type | Ordering |
//! |---|---|---|---|
//! | [`PlanMode::Locking`] | `SHARED*` / `EXCLUSIVE*` | at most one | strictly ascending priority |
//! | [`PlanMode::ReadOnly`] | `NO_LOCK` | any | any, pagination allowed |
//!
//! ## Deadlock avoidance
//!
//! Every locking plan acquires its row locks in the registry's total order. Two
//! transactions that both follow the protocol can never wait on each other in a cycle:
//! whichever holds the lower-priority lock is strictly ahead and never needs a lock the
//! other one holds. [`QueryPlan::validate`] enforces this statically, before any I/O.
//!
//! After loading, the plan is kept as the record of what was locked, and
//! [`QueryPlan::validate_changes`] checks the commit-time diff against it.

use crate::framework::error::{ConsistencyError, PlanError};
use crate::framework::query::{LoadStatement, LockMode, Query};
use crate::framework::registry::TotalOrder;
use crate::framework::resource::Resource;
use crate::framework::snapshot::ChangeSet;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Locking,
    ReadOnly,
}

impl PlanMode {
    fn as_str(self) -> &'static str {
        match self {
            PlanMode::Locking => "locking",
            PlanMode::ReadOnly => "read-only",
        }
    }
}

/// Ordered, validated sequence of queries for one unit of work.
#[derive(Debug, Clone)]
pub struct QueryPlan<R: Resource> {
    mode: PlanMode,
    queries: Vec<Query<R>>,
}

impl<R: Resource> QueryPlan<R> {
    pub(crate) fn new(mode: PlanMode) -> Self {
        Self {
            mode,
            queries: Vec::new(),
        }
    }

    /// The plan a unit of work uses when it is opened without one: loads nothing.
    pub fn empty_read_only() -> Self {
        Self::new(PlanMode::ReadOnly)
    }

    pub fn mode(&self) -> PlanMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == PlanMode::ReadOnly
    }

    pub fn queries(&self) -> &[Query<R>] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn query(&self, index: usize) -> Result<&Query<R>, PlanError> {
        self.queries.get(index).ok_or(PlanError::InvalidQueryIndex {
            index,
            len: self.queries.len(),
        })
    }

    /// Lock held on `kind`, if the plan has a query for it.
    pub fn lock_for(&self, kind: R::Kind) -> Option<LockMode> {
        self.queries
            .iter()
            .filter(|query| query.kind() == kind)
            .map(Query::lock)
            .max_by_key(|lock| lock_strength(*lock))
    }

    pub(crate) fn push(&mut self, query: Query<R>) {
        self.queries.push(query);
    }

    /// Resolves the index a `from_previous()` term refers to. `None` means the last
    /// finalized query.
    pub(crate) fn previous_index(&self, index: Option<usize>) -> Result<usize, PlanError> {
        let len = self.queries.len();
        match index {
            None if len == 0 => Err(PlanError::InvalidQueryIndex { index: 0, len }),
            None => Ok(len - 1),
            Some(index) if index < len => Ok(index),
            Some(index) => Err(PlanError::InvalidQueryIndex { index, len }),
        }
    }

    // ==========================================================================
    // Static validation
    // ==========================================================================

    /// Checks the plan against the locking protocol. Pure data inspection.
    pub fn validate(&self, order: &TotalOrder<R::Kind>) -> Result<(), PlanError> {
        for query in &self.queries {
            order.priority(query.kind())?;
            self.check_lock_mode(query)?;
        }
        if self.is_read_only() {
            return Ok(());
        }

        for query in &self.queries {
            if !query.pagination().is_empty() {
                return Err(PlanError::PaginationInLockingPlan(query.kind().to_string()));
            }
        }

        let mut seen = HashSet::new();
        for query in &self.queries {
            if !seen.insert(query.kind()) {
                return Err(PlanError::DuplicateType(query.kind().to_string()));
            }
        }

        for pair in self.queries.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            let previous_priority = order.priority(previous.kind())?;
            let current_priority = order.priority(current.kind())?;
            if previous_priority >= current_priority {
                return Err(PlanError::LockingOrderViolation {
                    previous: previous.kind().to_string(),
                    previous_priority,
                    current: current.kind().to_string(),
                    current_priority,
                });
            }
        }
        Ok(())
    }

    fn check_lock_mode(&self, query: &Query<R>) -> Result<(), PlanError> {
        let allowed = match self.mode {
            PlanMode::Locking => query.lock().is_locking(),
            PlanMode::ReadOnly => !query.lock().is_locking(),
        };
        if allowed {
            return Ok(());
        }
        Err(PlanError::LockModeMismatch {
            index: query.index(),
            kind: query.kind().to_string(),
            lock: query.lock().to_string(),
            plan: self.mode.as_str(),
        })
    }

    // ==========================================================================
    // Execution support
    // ==========================================================================

    /// Resolves query `index` into the statement storage executes. Every deferred
    /// term reads the result already attached to the earlier query it refers to.
    pub fn statement(&self, index: usize) -> Result<LoadStatement<R::Kind>, PlanError> {
        let query = self.query(index)?;
        let criteria = query.criteria().resolve(|dependency| {
            if dependency >= index {
                return Err(PlanError::InvalidQueryIndex {
                    index: dependency,
                    len: index,
                });
            }
            self.query(dependency)?.result()
        })?;
        Ok(LoadStatement {
            query_index: index,
            kind: query.kind(),
            criteria,
            lock: query.lock(),
            pagination: query.pagination().clone(),
        })
    }

    /// Attaches the loaded aggregates to query `index`.
    pub fn attach(&mut self, index: usize, result: Vec<R>) -> Result<(), PlanError> {
        let len = self.queries.len();
        self.queries
            .get_mut(index)
            .ok_or(PlanError::InvalidQueryIndex { index, len })?
            .attach(result)
    }

    // ==========================================================================
    // Commit-time validation
    // ==========================================================================

    /// Checks that every change in `changes` is covered by a lock this plan holds.
    ///
    /// - created aggregates are always accepted in a locking plan
    /// - updates or deletes need an `EXCLUSIVE*` query for their type
    /// - a read-only plan accepts no change at all
    pub fn validate_changes(&self, changes: &ChangeSet<R>) -> Result<(), ConsistencyError> {
        if self.is_read_only() {
            return match changes.forward().find(|(_, c)| !c.is_empty()) {
                Some((kind, _)) => Err(ConsistencyError::ChangedInReadOnlyPlan(kind.to_string())),
                None => Ok(()),
            };
        }

        for (kind, entry) in changes.forward() {
            if !entry.is_mutated() {
                continue;
            }
            match self.lock_for(kind) {
                None | Some(LockMode::NoLock) => {
                    return Err(ConsistencyError::ChangedWithoutLock(kind.to_string()))
                }
                Some(lock) if lock.is_shared() => {
                    return Err(ConsistencyError::MutatedUnderShareLock(kind.to_string()))
                }
                Some(_) => {}
            }
        }

        for query in &self.queries {
            let mutated = changes
                .get(query.kind())
                .is_some_and(|entry| entry.is_mutated());
            if query.lock().is_exclusive() && !mutated {
                debug!(kind = %query.kind(), lock = %query.lock(), "Locked exclusively but not mutated");
            }
        }
        Ok(())
    }
}

fn lock_strength(lock: LockMode) -> u8 {
    match lock {
        LockMode::NoLock => 0,
        LockMode::Shared | LockMode::SharedNoWait => 1,
        LockMode::Exclusive | LockMode::ExclusiveNoWait => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::criteria::Criteria;
    use crate::framework::query::{OrderBy, Pagination};
    use crate::framework::snapshot::Changes;
    use crate::framework::Aggregate;
    use crate::model::{Customer, ShopKind, ShopResource};

    fn order() -> TotalOrder<ShopKind> {
        TotalOrder::new([
            ShopKind::Customer,
            ShopKind::PurchaseOrder,
            ShopKind::Shipment,
            ShopKind::Product,
        ])
        .unwrap()
    }

    fn plan(mode: PlanMode, steps: &[(ShopKind, LockMode)]) -> QueryPlan<ShopResource> {
        let mut plan = QueryPlan::new(mode);
        for (index, (kind, lock)) in steps.iter().enumerate() {
            plan.push(Query::new(
                index,
                *kind,
                Criteria::new(),
                *lock,
                Pagination::default(),
            ));
        }
        plan
    }

    fn deleted_customer() -> ChangeSet<ShopResource> {
        let mut changes = ChangeSet::default();
        *changes.entry_mut(ShopKind::Customer) = Changes {
            deleted: vec![Customer::new("c1", "Alice").into_resource()],
            ..Changes::default()
        };
        changes
    }

    #[test]
    fn ascending_locking_plan_is_valid() {
        let plan = plan(
            PlanMode::Locking,
            &[
                (ShopKind::Customer, LockMode::Exclusive),
                (ShopKind::Shipment, LockMode::Shared),
                (ShopKind::Product, LockMode::SharedNoWait),
            ],
        );
        assert_eq!(plan.validate(&order()), Ok(()));
    }

    #[test]
    fn descending_priorities_are_a_locking_order_violation() {
        let plan = plan(
            PlanMode::Locking,
            &[
                (ShopKind::Product, LockMode::Exclusive),
                (ShopKind::Shipment, LockMode::Exclusive),
            ],
        );
        assert_eq!(
            plan.validate(&order()),
            Err(PlanError::LockingOrderViolation {
                previous: "Product".into(),
                previous_priority: 3,
                current: "Shipment".into(),
                current_priority: 2,
            })
        );
    }

    #[test]
    fn duplicate_type_is_rejected_before_ordering() {
        let plan = plan(
            PlanMode::Locking,
            &[
                (ShopKind::Customer, LockMode::Shared),
                (ShopKind::Customer, LockMode::Exclusive),
            ],
        );
        assert_eq!(
            plan.validate(&order()),
            Err(PlanError::DuplicateType("Customer".into()))
        );
    }

    #[test]
    fn lock_modes_must_match_the_plan_mode() {
        let locking = plan(PlanMode::Locking, &[(ShopKind::Customer, LockMode::NoLock)]);
        assert!(matches!(
            locking.validate(&order()),
            Err(PlanError::LockModeMismatch { plan: "locking", .. })
        ));

        let read_only = plan(PlanMode::ReadOnly, &[(ShopKind::Customer, LockMode::Shared)]);
        assert!(matches!(
            read_only.validate(&order()),
            Err(PlanError::LockModeMismatch { plan: "read-only", .. })
        ));

        let repeated = plan(
            PlanMode::ReadOnly,
            &[
                (ShopKind::Product, LockMode::NoLock),
                (ShopKind::Customer, LockMode::NoLock),
                (ShopKind::Product, LockMode::NoLock),
            ],
        );
        assert_eq!(repeated.validate(&order()), Ok(()));
    }

    #[test]
    fn pagination_is_rejected_in_locking_plans() {
        let mut plan = QueryPlan::<ShopResource>::new(PlanMode::Locking);
        plan.push(Query::new(
            0,
            ShopKind::Customer,
            Criteria::new(),
            LockMode::Exclusive,
            Pagination {
                order_by: Some(OrderBy {
                    attribute: "name".into(),
                    descending: false,
                }),
                offset: None,
                limit: Some(10),
            },
        ));
        assert_eq!(
            plan.validate(&order()),
            Err(PlanError::PaginationInLockingPlan("Customer".into()))
        );
    }

    #[test]
    fn unregistered_kind_is_rejected() {
        let plan = plan(PlanMode::ReadOnly, &[(ShopKind::Product, LockMode::NoLock)]);
        let partial = TotalOrder::new([ShopKind::Customer]).unwrap();
        assert!(matches!(
            plan.validate(&partial),
            Err(PlanError::Registry(_))
        ));
    }

    #[test]
    fn deleting_under_share_lock_is_inconsistent() {
        let plan = plan(PlanMode::Locking, &[(ShopKind::Customer, LockMode::Shared)]);
        assert_eq!(
            plan.validate_changes(&deleted_customer()),
            Err(ConsistencyError::MutatedUnderShareLock("Customer".into()))
        );
    }

    #[test]
    fn deleting_an_unlocked_type_is_inconsistent() {
        let plan = plan(PlanMode::Locking, &[(ShopKind::Product, LockMode::Exclusive)]);
        assert_eq!(
            plan.validate_changes(&deleted_customer()),
            Err(ConsistencyError::ChangedWithoutLock("Customer".into()))
        );
    }

    #[test]
    fn creates_are_always_accepted_and_over_locking_is_tolerated() {
        let plan = plan(
            PlanMode::Locking,
            &[
                (ShopKind::Customer, LockMode::ExclusiveNoWait),
                (ShopKind::Product, LockMode::Exclusive),
            ],
        );
        let mut changes = ChangeSet::default();
        changes
            .entry_mut(ShopKind::PurchaseOrder)
            .created
            .push(crate::model::PurchaseOrder::new("o1", "c1").into_resource());
        assert_eq!(plan.validate_changes(&changes), Ok(()));
        assert_eq!(plan.validate_changes(&deleted_customer()), Ok(()));
    }

    #[test]
    fn read_only_plan_accepts_no_change() {
        let plan = plan(PlanMode::ReadOnly, &[]);
        assert_eq!(plan.validate_changes(&ChangeSet::default()), Ok(()));
        assert_eq!(
            plan.validate_changes(&deleted_customer()),
            Err(ConsistencyError::ChangedInReadOnlyPlan("Customer".into()))
        );
    }

    #[test]
    fn previous_index_defaults_to_last_query() {
        let plan = plan(
            PlanMode::ReadOnly,
            &[
                (ShopKind::Customer, LockMode::NoLock),
                (ShopKind::Product, LockMode::NoLock),
            ],
        );
        assert_eq!(plan.previous_index(None), Ok(1));
        assert_eq!(plan.previous_index(Some(0)), Ok(0));
        assert_eq!(
            plan.previous_index(Some(2)),
            Err(PlanError::InvalidQueryIndex { index: 2, len: 2 })
        );
        assert!(QueryPlan::<ShopResource>::empty_read_only()
            .previous_index(None)
            .is_err());
    }
}
