//! # Snapshots & Change Sets
//!
//! Change tracking works without any "mark dirty" calls: the container is captured
//! right after loading (baseline) and once more right before persistence, and the two
//! captures are diffed.
//!
//! - [`EntitySnapshot`]: one aggregate, frozen. *Identity* is its `entity_id`;
//!   *content* is its full serialized form.
//! - [`EntitySnapshotSet`]: the snapshots of one aggregate type, with set algebra by
//!   identity or by content.
//! - [`ResourceSnapshot`]: one set per registered aggregate type, i.e. the whole container.
//! - [`ChangeSet`]: the `CREATED` / `UPDATED` / `DELETED` partition per type.

use crate::framework::registry::TotalOrder;
use crate::framework::resource::{to_value, EntityId, Resource};
use serde_json::Value;
use std::collections::HashMap;

/// Immutable copy of one aggregate at one instant.
#[derive(Debug, Clone)]
pub struct EntitySnapshot<R: Resource> {
    entity_id: EntityId,
    content: Value,
    record: R,
}

impl<R: Resource> EntitySnapshot<R> {
    pub fn capture(record: &R) -> Result<Self, serde_json::Error> {
        Ok(Self {
            entity_id: record.entity_id().clone(),
            content: to_value(record)?,
            record: record.clone(),
        })
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn compare_identity(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
    }

    pub fn compare_content(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

/// Snapshots of one aggregate type.
#[derive(Debug, Clone)]
pub struct EntitySnapshotSet<R: Resource> {
    snapshots: Vec<EntitySnapshot<R>>,
}

impl<R: Resource> Default for EntitySnapshotSet<R> {
    fn default() -> Self {
        Self {
            snapshots: Vec::new(),
        }
    }
}

impl<R: Resource> EntitySnapshotSet<R> {
    pub fn new(snapshots: Vec<EntitySnapshot<R>>) -> Self {
        Self { snapshots }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot<R>> {
        self.snapshots.iter()
    }

    pub fn in_by_identity(&self, other: &EntitySnapshot<R>) -> bool {
        self.snapshots.iter().any(|s| s.compare_identity(other))
    }

    pub fn in_by_content(&self, other: &EntitySnapshot<R>) -> bool {
        self.snapshots.iter().any(|s| s.compare_content(other))
    }

    /// Members of `self` whose identity also appears in `other`.
    pub fn intersection_identity(&self, other: &Self) -> Self {
        self.filter(|s| other.in_by_identity(s))
    }

    /// Members of `self` whose identity does not appear in `other`.
    pub fn difference_identity(&self, other: &Self) -> Self {
        self.filter(|s| !other.in_by_identity(s))
    }

    /// Members of `self` whose exact content does not appear in `other`.
    pub fn difference_content(&self, other: &Self) -> Self {
        self.filter(|s| !other.in_by_content(s))
    }

    pub fn into_records(self) -> Vec<R> {
        self.snapshots.into_iter().map(|s| s.record).collect()
    }

    fn filter(&self, keep: impl Fn(&EntitySnapshot<R>) -> bool) -> Self {
        Self::new(self.snapshots.iter().filter(|s| keep(s)).cloned().collect())
    }
}

/// Snapshot of a whole container: one set per registered aggregate type.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot<R: Resource> {
    sets: Vec<(R::Kind, EntitySnapshotSet<R>)>,
}

impl<R: Resource> ResourceSnapshot<R> {
    /// Captures `buckets` in the order given by `kinds`.
    pub fn capture(
        kinds: &[R::Kind],
        buckets: &HashMap<R::Kind, Vec<R>>,
    ) -> Result<Self, serde_json::Error> {
        let mut sets = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let snapshots = buckets
                .get(kind)
                .map(|bucket| bucket.iter().map(EntitySnapshot::capture).collect())
                .transpose()?
                .unwrap_or_default();
            sets.push((*kind, EntitySnapshotSet::new(snapshots)));
        }
        Ok(Self { sets })
    }

    pub fn get(&self, kind: R::Kind) -> Option<&EntitySnapshotSet<R>> {
        self.sets.iter().find(|(k, _)| *k == kind).map(|(_, set)| set)
    }

    pub fn iter(&self) -> impl Iterator<Item = (R::Kind, &EntitySnapshotSet<R>)> {
        self.sets.iter().map(|(kind, set)| (*kind, set))
    }

    pub fn intersect_identity(&self, other: &Self) -> Self {
        self.combine(other, EntitySnapshotSet::intersection_identity)
    }

    pub fn difference_identity(&self, other: &Self) -> Self {
        self.combine(other, EntitySnapshotSet::difference_identity)
    }

    pub fn difference_content(&self, other: &Self) -> Self {
        self.combine(other, EntitySnapshotSet::difference_content)
    }

    fn combine(
        &self,
        other: &Self,
        op: impl Fn(&EntitySnapshotSet<R>, &EntitySnapshotSet<R>) -> EntitySnapshotSet<R>,
    ) -> Self {
        let empty = EntitySnapshotSet::default();
        let sets = self
            .sets
            .iter()
            .map(|(kind, set)| (*kind, op(set, other.get(*kind).unwrap_or(&empty))))
            .collect();
        Self { sets }
    }

    fn into_sets(self) -> impl Iterator<Item = (R::Kind, EntitySnapshotSet<R>)> {
        self.sets.into_iter()
    }
}

/// The changes of one aggregate type.
#[derive(Debug, Clone)]
pub struct Changes<R: Resource> {
    pub created: Vec<R>,
    pub updated: Vec<R>,
    pub deleted: Vec<R>,
}

impl<R: Resource> Default for Changes<R> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<R: Resource> Changes<R> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Updates or deletes, the changes that require an exclusive lock.
    pub fn is_mutated(&self) -> bool {
        !self.updated.is_empty() || !self.deleted.is_empty()
    }
}

/// Per-type `CREATED` / `UPDATED` / `DELETED` lists derived from two snapshots.
#[derive(Debug, Clone)]
pub struct ChangeSet<R: Resource> {
    entries: Vec<(R::Kind, Changes<R>)>,
}

impl<R: Resource> Default for ChangeSet<R> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<R: Resource> ChangeSet<R> {
    /// Diffs `previous` (baseline) against `current`:
    ///
    /// - `DELETED` = previous - current, by identity
    /// - `CREATED` = current - previous, by identity
    /// - `UPDATED` = (current ∩ previous by identity) - previous, by content
    pub fn diff(previous: &ResourceSnapshot<R>, current: &ResourceSnapshot<R>) -> Self {
        let mut change_set = Self::default();
        for (kind, _) in current.iter() {
            change_set.entry_mut(kind);
        }

        for (kind, set) in previous.difference_identity(current).into_sets() {
            change_set.entry_mut(kind).deleted.extend(set.into_records());
        }
        for (kind, set) in current
            .intersect_identity(previous)
            .difference_content(previous)
            .into_sets()
        {
            change_set.entry_mut(kind).updated.extend(set.into_records());
        }
        for (kind, set) in current.difference_identity(previous).into_sets() {
            change_set.entry_mut(kind).created.extend(set.into_records());
        }
        change_set
    }

    pub fn get(&self, kind: R::Kind) -> Option<&Changes<R>> {
        self.entries.iter().find(|(k, _)| *k == kind).map(|(_, c)| c)
    }

    /// `true` when no type has any change.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, changes)| changes.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, c)| c.created.len() + c.updated.len() + c.deleted.len())
            .sum()
    }

    /// Entries in their current order (total order ascending after [`ChangeSet::sort_by`]).
    pub fn forward(&self) -> impl Iterator<Item = (R::Kind, &Changes<R>)> {
        self.entries.iter().map(|(kind, changes)| (*kind, changes))
    }

    /// Entries in reverse order, dependent types first.
    pub fn backward(&self) -> impl Iterator<Item = (R::Kind, &Changes<R>)> {
        self.entries.iter().rev().map(|(kind, changes)| (*kind, changes))
    }

    /// Orders entries by ascending priority; unknown types go last.
    pub fn sort_by(&mut self, order: &TotalOrder<R::Kind>) {
        self.entries
            .sort_by_key(|(kind, _)| order.priority(*kind).unwrap_or(u32::MAX));
    }

    pub(crate) fn entry_mut(&mut self, kind: R::Kind) -> &mut Changes<R> {
        let position = match self.entries.iter().position(|(k, _)| *k == kind) {
            Some(position) => position,
            None => {
                self.entries.push((kind, Changes::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[position].1
    }
}
