use uow_recipe::framework::{LockMode, PlanError, QueryBuilder, QueryPlan};
use uow_recipe::model::{shop_registry, ShopKind, ShopResource};

fn locking_plan(kinds: &[ShopKind], lock: LockMode) -> Result<QueryPlan<ShopResource>, PlanError> {
    let mut builder = QueryBuilder::locking(shop_registry());
    for kind in kinds {
        builder = builder.load(*kind).from_id(["x"]);
        builder = match lock {
            LockMode::Shared => builder.for_share(false),
            LockMode::SharedNoWait => builder.for_share(true),
            LockMode::Exclusive => builder.for_update(false),
            LockMode::ExclusiveNoWait => builder.for_update(true),
            LockMode::NoLock => builder.no_lock(),
        };
    }
    builder.build()
}

fn permutations(items: &[ShopKind]) -> Vec<Vec<ShopKind>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, *item);
            all.push(tail);
        }
    }
    all
}

fn is_strictly_ascending(kinds: &[ShopKind]) -> bool {
    let registry = shop_registry();
    kinds.windows(2).all(|pair| {
        registry.priority(pair[0]).unwrap() < registry.priority(pair[1]).unwrap()
    })
}

/// Over every ordering of every subset of types: build succeeds iff priorities ascend.
#[test]
fn build_succeeds_iff_priorities_strictly_ascend() {
    let all = ShopKind::ALL;
    for mask in 1u32..(1 << all.len()) {
        let subset: Vec<ShopKind> = all
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, kind)| *kind)
            .collect();
        for ordering in permutations(&subset) {
            let result = locking_plan(&ordering, LockMode::Exclusive);
            if is_strictly_ascending(&ordering) {
                assert!(result.is_ok(), "{ordering:?} should build");
            } else {
                assert!(
                    matches!(result, Err(PlanError::LockingOrderViolation { .. })),
                    "{ordering:?} should violate the locking order, got {result:?}"
                );
            }
        }
    }
}

#[test]
fn second_query_for_a_type_fails_build() {
    for kind in ShopKind::ALL {
        let result = locking_plan(&[*kind, *kind], LockMode::Shared);
        assert_eq!(
            result.unwrap_err(),
            PlanError::DuplicateType(kind.to_string())
        );
    }
}

#[test]
fn higher_priority_first_fails_at_build() {
    // Shipment (2) then Product (3) is fine; Product first is rejected before any load.
    let result = locking_plan(&[ShopKind::Product, ShopKind::Shipment], LockMode::Exclusive);
    assert_eq!(
        result.unwrap_err(),
        PlanError::LockingOrderViolation {
            previous: "Product".into(),
            previous_priority: 3,
            current: "Shipment".into(),
            current_priority: 2,
        }
    );
}

#[test]
fn lock_modes_are_homogeneous_per_plan() {
    for lock in [
        LockMode::Shared,
        LockMode::SharedNoWait,
        LockMode::Exclusive,
        LockMode::ExclusiveNoWait,
    ] {
        assert!(locking_plan(&[ShopKind::Customer], lock).is_ok());

        let mut read_only = QueryBuilder::read_only(shop_registry()).load(ShopKind::Customer);
        read_only = if lock.is_exclusive() {
            read_only.for_update(lock.is_nowait())
        } else {
            read_only.for_share(lock.is_nowait())
        };
        assert!(matches!(
            read_only.build(),
            Err(PlanError::LockModeMismatch { .. })
        ));
    }

    assert!(matches!(
        locking_plan(&[ShopKind::Customer], LockMode::NoLock),
        Err(PlanError::LockModeMismatch { .. })
    ));
    assert!(matches!(
        locking_plan(&[ShopKind::Customer, ShopKind::Product], LockMode::NoLock),
        Err(PlanError::LockModeMismatch { index: 0, .. })
    ));
}

#[test]
fn locking_plan_rejects_pagination() {
    let result = QueryBuilder::locking(shop_registry())
        .load(ShopKind::PurchaseOrder)
        .equals("customer_id", "c1")
        .limit(10)
        .for_update(false)
        .build();
    assert_eq!(
        result.unwrap_err(),
        PlanError::PaginationInLockingPlan("PurchaseOrder".into())
    );
}
