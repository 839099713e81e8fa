//! # Resource Container
//!
//! The per-transaction identity map business logic works against. It holds one bucket
//! per registered aggregate type, all starting empty; loading fills them, business code
//! reads and mutates them directly, and nothing is persisted implicitly.
//!
//! Every operation is synchronous and linear in the size of one bucket. Buckets only hold
//! what the unit of work declared in its plan, so they stay small.
//!
//! The container also owns the two snapshots used for change tracking:
//! [`ResourceContainer::take_snapshot`] and [`ResourceContainer::get_resource_changes`].

use crate::framework::error::ContainerError;
use crate::framework::resource::{attribute, to_value, Aggregate, Resource, ENTITY_ID};
use crate::framework::snapshot::{ChangeSet, ResourceSnapshot};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// In-memory working set of one unit of work.
#[derive(Debug)]
pub struct ResourceContainer<R: Resource> {
    kinds: Vec<R::Kind>,
    buckets: HashMap<R::Kind, Vec<R>>,
    previous: Option<ResourceSnapshot<R>>,
    current: Option<ResourceSnapshot<R>>,
}

impl<R: Resource> ResourceContainer<R> {
    /// Creates an empty bucket for each of `kinds`.
    pub fn new(kinds: &[R::Kind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            buckets: kinds.iter().map(|kind| (*kind, Vec::new())).collect(),
            previous: None,
            current: None,
        }
    }

    pub fn kinds(&self) -> &[R::Kind] {
        &self.kinds
    }

    /// Number of aggregates currently held for `kind`.
    pub fn count(&self, kind: R::Kind) -> usize {
        self.buckets.get(&kind).map_or(0, Vec::len)
    }

    // --- Writes ---

    pub fn put<A: Aggregate<R>>(&mut self, item: A) -> Result<(), ContainerError> {
        self.put_resource(item.into_resource())
    }

    pub fn put_many<A: Aggregate<R>>(
        &mut self,
        items: impl IntoIterator<Item = A>,
    ) -> Result<(), ContainerError> {
        items.into_iter().try_for_each(|item| self.put(item))
    }

    /// Untyped insert, used when loading results from storage.
    pub fn put_resource(&mut self, resource: R) -> Result<(), ContainerError> {
        self.bucket_mut(resource.kind())?.push(resource);
        Ok(())
    }

    pub fn put_resources(
        &mut self,
        resources: impl IntoIterator<Item = R>,
    ) -> Result<(), ContainerError> {
        resources
            .into_iter()
            .try_for_each(|resource| self.put_resource(resource))
    }

    /// Removes the aggregate with the same identity as `item` and returns it.
    pub fn delete<A: Aggregate<R>>(&mut self, item: &A) -> Result<A, ContainerError> {
        self.delete_by_id::<A>(item.entity_id())
    }

    pub fn delete_by_id<A: Aggregate<R>>(&mut self, entity_id: &str) -> Result<A, ContainerError> {
        let bucket = self.bucket_mut(A::KIND)?;
        let position = bucket
            .iter()
            .position(|r| A::from_resource(r).is_some_and(|a| a.entity_id() == entity_id))
            .ok_or_else(|| not_found::<R>(A::KIND, ENTITY_ID, entity_id))?;
        let removed = bucket.remove(position);
        A::from_resource(&removed)
            .cloned()
            .ok_or_else(|| not_found::<R>(A::KIND, ENTITY_ID, entity_id))
    }

    pub fn delete_many<'a, A: Aggregate<R>>(
        &mut self,
        items: impl IntoIterator<Item = &'a A>,
    ) -> Result<Vec<A>, ContainerError> {
        items.into_iter().map(|item| self.delete(item)).collect()
    }

    // --- Reads ---

    /// Exactly one aggregate with `entity_id`; zero or several is an error.
    pub fn get_by_id<A: Aggregate<R>>(&self, entity_id: &str) -> Result<&A, ContainerError> {
        self.get_by_id_or_none(entity_id)?
            .ok_or_else(|| not_found::<R>(A::KIND, ENTITY_ID, entity_id))
    }

    pub fn get_by_id_or_none<A: Aggregate<R>>(
        &self,
        entity_id: &str,
    ) -> Result<Option<&A>, ContainerError> {
        let mut matches = self
            .typed::<A>()?
            .filter(|a| a.entity_id() == entity_id);
        let first = matches.next();
        let extra = matches.count();
        if extra > 0 {
            return Err(ambiguous::<R>(A::KIND, ENTITY_ID, entity_id, extra + 1));
        }
        Ok(first)
    }

    /// Mutable access for business logic; the change is picked up by the next snapshot.
    pub fn get_by_id_mut<A: Aggregate<R>>(
        &mut self,
        entity_id: &str,
    ) -> Result<&mut A, ContainerError> {
        let bucket = self.bucket_mut(A::KIND)?;
        let positions: Vec<usize> = bucket
            .iter()
            .enumerate()
            .filter(|(_, r)| A::from_resource(r).is_some_and(|a| a.entity_id() == entity_id))
            .map(|(position, _)| position)
            .collect();
        match positions.as_slice() {
            [position] => A::from_resource_mut(&mut bucket[*position])
                .ok_or_else(|| not_found::<R>(A::KIND, ENTITY_ID, entity_id)),
            [] => Err(not_found::<R>(A::KIND, ENTITY_ID, entity_id)),
            many => Err(ambiguous::<R>(A::KIND, ENTITY_ID, entity_id, many.len())),
        }
    }

    /// All aggregates whose id is in `entity_ids`; an empty result is an error.
    pub fn get_by_ids<A: Aggregate<R>>(
        &self,
        entity_ids: &[&str],
    ) -> Result<Vec<&A>, ContainerError> {
        let found: Vec<&A> = self
            .typed::<A>()?
            .filter(|a| entity_ids.contains(&a.entity_id().as_str()))
            .collect();
        if found.is_empty() {
            return Err(not_found::<R>(A::KIND, ENTITY_ID, &format!("{entity_ids:?}")));
        }
        Ok(found)
    }

    /// Aggregates whose serialized `attribute` equals any of `values`.
    pub fn get_by_attribute<A: Aggregate<R>>(
        &self,
        attribute_name: &str,
        values: &[Value],
    ) -> Result<Vec<&A>, ContainerError> {
        let mut found = Vec::new();
        for item in self.typed::<A>()? {
            let serialized = to_value(item)?;
            if values.contains(attribute(&serialized, attribute_name)) {
                found.push(item);
            }
        }
        Ok(found)
    }

    pub fn get_one_or_none_by_attribute<A: Aggregate<R>>(
        &self,
        attribute_name: &str,
        value: &Value,
    ) -> Result<Option<&A>, ContainerError> {
        let mut found = self.get_by_attribute::<A>(attribute_name, std::slice::from_ref(value))?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => Err(ambiguous::<R>(A::KIND, attribute_name, &value.to_string(), count)),
        }
    }

    pub fn get_one_by_attribute<A: Aggregate<R>>(
        &self,
        attribute_name: &str,
        value: &Value,
    ) -> Result<&A, ContainerError> {
        self.get_one_or_none_by_attribute(attribute_name, value)?
            .ok_or_else(|| not_found::<R>(A::KIND, attribute_name, &value.to_string()))
    }

    pub fn get_all<A: Aggregate<R>>(&self) -> Result<Vec<&A>, ContainerError> {
        Ok(self.typed::<A>()?.collect())
    }

    // --- Change tracking ---

    /// Captures the whole container, moving the held "current" snapshot to "previous".
    ///
    /// Fails if a previous snapshot is still pending, i.e. was never consumed by
    /// [`ResourceContainer::get_resource_changes`].
    pub fn take_snapshot(&mut self) -> Result<(), ContainerError> {
        if self.previous.is_some() {
            return Err(ContainerError::SnapshotsAlreadyTaken);
        }
        let snapshot = ResourceSnapshot::capture(&self.kinds, &self.buckets)?;
        self.previous = self.current.replace(snapshot);
        debug!(pending_diff = self.previous.is_some(), "Snapshot taken");
        Ok(())
    }

    /// Diffs the pending snapshot pair and consumes it. The current snapshot stays as
    /// the new baseline.
    pub fn get_resource_changes(&mut self) -> Result<ChangeSet<R>, ContainerError> {
        let (Some(previous), Some(current)) = (self.previous.as_ref(), self.current.as_ref())
        else {
            return Err(ContainerError::SnapshotsNotTaken);
        };
        let changes = ChangeSet::diff(previous, current);
        self.previous = None;
        debug!(changes = changes.len(), "Resource changes computed");
        Ok(changes)
    }

    fn bucket(&self, kind: R::Kind) -> Result<&Vec<R>, ContainerError> {
        self.buckets
            .get(&kind)
            .ok_or_else(|| ContainerError::UnregisteredKind(kind.to_string()))
    }

    fn bucket_mut(&mut self, kind: R::Kind) -> Result<&mut Vec<R>, ContainerError> {
        self.buckets
            .get_mut(&kind)
            .ok_or_else(|| ContainerError::UnregisteredKind(kind.to_string()))
    }

    fn typed<A: Aggregate<R>>(&self) -> Result<impl Iterator<Item = &A>, ContainerError> {
        Ok(self.bucket(A::KIND)?.iter().filter_map(A::from_resource))
    }
}

fn not_found<R: Resource>(kind: R::Kind, attribute: &str, value: &str) -> ContainerError {
    ContainerError::NotFound {
        kind: kind.to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
    }
}

fn ambiguous<R: Resource>(kind: R::Kind, attribute: &str, value: &str, count: usize) -> ContainerError {
    ContainerError::Ambiguous {
        kind: kind.to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Customer, Product, PurchaseOrder, ShopKind, ShopResource};
    use serde_json::json;

    fn container() -> ResourceContainer<ShopResource> {
        ResourceContainer::new(&[ShopKind::Customer, ShopKind::PurchaseOrder])
    }

    #[test]
    fn buckets_start_empty_and_unregistered_kinds_are_rejected() {
        let mut resources = container();
        assert_eq!(resources.count(ShopKind::Customer), 0);
        assert!(resources.get_all::<Customer>().unwrap().is_empty());
        assert!(matches!(
            resources.put(Product::new("p1", "Widget", 100, 3)),
            Err(ContainerError::UnregisteredKind(_))
        ));
    }

    #[test]
    fn get_by_id_requires_exactly_one_match() {
        let mut resources = container();
        assert!(matches!(
            resources.get_by_id::<Customer>("c1"),
            Err(ContainerError::NotFound { .. })
        ));

        resources.put(Customer::new("c1", "Alice")).unwrap();
        assert_eq!(resources.get_by_id::<Customer>("c1").unwrap().name, "Alice");

        resources.put(Customer::new("c1", "Impostor")).unwrap();
        assert!(matches!(
            resources.get_by_id::<Customer>("c1"),
            Err(ContainerError::Ambiguous { count: 2, .. })
        ));
        assert!(matches!(
            resources.get_by_id_mut::<Customer>("c1"),
            Err(ContainerError::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn get_by_attribute_filters_on_serialized_fields() {
        let mut resources = container();
        resources
            .put_many([
                PurchaseOrder::new("o1", "c1"),
                PurchaseOrder::new("o2", "c1"),
                PurchaseOrder::new("o3", "c2"),
            ])
            .unwrap();

        let orders = resources
            .get_by_attribute::<PurchaseOrder>("customer_id", &[json!("c1")])
            .unwrap();
        assert_eq!(orders.len(), 2);

        assert!(resources
            .get_one_or_none_by_attribute::<PurchaseOrder>("customer_id", &json!("c9"))
            .unwrap()
            .is_none());
        assert_eq!(
            resources
                .get_one_by_attribute::<PurchaseOrder>("customer_id", &json!("c2"))
                .unwrap()
                .entity_id,
            "o3"
        );
        assert!(matches!(
            resources.get_one_by_attribute::<PurchaseOrder>("customer_id", &json!("c1")),
            Err(ContainerError::Ambiguous { count: 2, .. })
        ));
        assert_eq!(resources.get_by_ids::<PurchaseOrder>(&["o1", "o3", "o9"]).unwrap().len(), 2);
        assert!(resources.get_by_ids::<PurchaseOrder>(&["o9"]).is_err());
    }

    #[test]
    fn delete_removes_by_identity() {
        let mut resources = container();
        let alice = Customer::new("c1", "Alice");
        resources.put(alice.clone()).unwrap();
        resources.put(Customer::new("c2", "Bob")).unwrap();

        let removed = resources.delete(&alice).unwrap();
        assert_eq!(removed.entity_id, "c1");
        assert_eq!(resources.count(ShopKind::Customer), 1);
        assert!(matches!(
            resources.delete(&alice),
            Err(ContainerError::NotFound { .. })
        ));
    }

    #[test]
    fn snapshot_pair_round_trip_without_mutation_is_empty() {
        let mut resources = container();
        resources.put(Customer::new("c1", "Alice")).unwrap();
        resources.take_snapshot().unwrap();
        resources.take_snapshot().unwrap();

        let changes = resources.get_resource_changes().unwrap();
        for kind in [ShopKind::Customer, ShopKind::PurchaseOrder] {
            assert!(changes.get(kind).unwrap().is_empty());
        }
    }

    #[test]
    fn snapshot_protocol_errors() {
        let mut resources = container();
        assert!(matches!(
            resources.get_resource_changes(),
            Err(ContainerError::SnapshotsNotTaken)
        ));
        resources.take_snapshot().unwrap();
        assert!(matches!(
            resources.get_resource_changes(),
            Err(ContainerError::SnapshotsNotTaken)
        ));
        resources.take_snapshot().unwrap();
        assert!(matches!(
            resources.take_snapshot(),
            Err(ContainerError::SnapshotsAlreadyTaken)
        ));
        resources.get_resource_changes().unwrap();
        assert!(resources.take_snapshot().is_ok());
    }

    #[test]
    fn mutations_through_the_container_are_tracked() {
        let mut resources = container();
        resources.put(Customer::new("c1", "Alice")).unwrap();
        resources.put(Customer::new("c2", "Bob")).unwrap();
        resources.take_snapshot().unwrap();

        resources.get_by_id_mut::<Customer>("c1").unwrap().name = "Alicia".into();
        resources.delete_by_id::<Customer>("c2").unwrap();
        resources.put(PurchaseOrder::new("o1", "c1")).unwrap();
        resources.take_snapshot().unwrap();

        let changes = resources.get_resource_changes().unwrap();
        let customers = changes.get(ShopKind::Customer).unwrap();
        assert_eq!(customers.updated.len(), 1);
        assert_eq!(customers.deleted.len(), 1);
        assert_eq!(changes.get(ShopKind::PurchaseOrder).unwrap().created.len(), 1);
    }
}
