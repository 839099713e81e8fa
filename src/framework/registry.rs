//! # Registries
//!
//! Two pieces of process-wide, read-only configuration drive the engine:
//!
//! - [`TotalOrder`]: a fixed priority for every aggregate type. Locking plans must
//!   acquire locks in strictly ascending priority, which makes circular wait between
//!   two transactions following the protocol impossible. The same order sequences
//!   persistence of a change set.
//! - reference descriptors: for a `(source, target)` pair of aggregate types, which
//!   attribute of the target to filter on and how to extract the key values from an
//!   already-loaded source aggregate. This is what `from_previous()` chains resolve.
//!
//! Both live in a [`Registry`], built once with [`RegistryBuilder`] and shared behind
//! `Arc` or a `static`. Nothing mutates it afterwards, so no synchronization is needed.

use crate::framework::error::RegistryError;
use crate::framework::resource::{Aggregate, Resource};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Pure key extraction from one loaded source aggregate.
pub type Strategy<R> = Arc<dyn Fn(&R) -> Vec<Value> + Send + Sync>;

/// Fixed priority over aggregate types (lower = earlier).
#[derive(Debug, Clone)]
pub struct TotalOrder<K: crate::framework::ResourceKind> {
    order: Vec<K>,
    priorities: HashMap<K, u32>,
}

impl<K: crate::framework::ResourceKind> TotalOrder<K> {
    /// Assigns priorities by position. A kind listed twice is rejected, so the
    /// mapping is injective by construction.
    pub fn new(kinds: impl IntoIterator<Item = K>) -> Result<Self, RegistryError> {
        let mut order = Vec::new();
        let mut priorities = HashMap::new();
        for (priority, kind) in kinds.into_iter().enumerate() {
            if priorities.insert(kind, priority as u32).is_some() {
                return Err(RegistryError::DuplicateKind(kind.to_string()));
            }
            order.push(kind);
        }
        Ok(Self { order, priorities })
    }

    pub fn priority(&self, kind: K) -> Result<u32, RegistryError> {
        self.priorities
            .get(&kind)
            .copied()
            .ok_or_else(|| RegistryError::UnknownType(kind.to_string()))
    }

    pub fn contains(&self, kind: K) -> bool {
        self.priorities.contains_key(&kind)
    }

    /// Independent types first. Used for lock acquisition, creates and updates.
    pub fn forward(&self) -> &[K] {
        &self.order
    }

    /// Dependent types first. Used for deletes.
    pub fn backward(&self) -> impl Iterator<Item = K> + '_ {
        self.order.iter().rev().copied()
    }
}

/// How to derive a target query's filter from an already-loaded source aggregate.
#[derive(Clone)]
pub struct ReferenceDescriptor<R: Resource> {
    attribute: String,
    strategy: Strategy<R>,
}

impl<R: Resource> ReferenceDescriptor<R> {
    /// The target attribute the derived keys are matched against.
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Applies the strategy to every source aggregate and concatenates the keys.
    pub fn extract<'a>(&self, sources: impl IntoIterator<Item = &'a R>) -> Vec<Value> {
        sources
            .into_iter()
            .flat_map(|source| (self.strategy)(source))
            .collect()
    }
}

impl<R: Resource> fmt::Debug for ReferenceDescriptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceDescriptor")
            .field("attribute", &self.attribute)
            .finish_non_exhaustive()
    }
}

/// The immutable configuration a domain hands to the engine.
pub struct Registry<R: Resource> {
    total_order: TotalOrder<R::Kind>,
    references: HashMap<(R::Kind, R::Kind), ReferenceDescriptor<R>>,
}

impl<R: Resource> Registry<R> {
    /// Starts a registry whose total order (and container buckets) are `kinds`, in priority order.
    pub fn builder(kinds: impl IntoIterator<Item = R::Kind>) -> RegistryBuilder<R> {
        RegistryBuilder {
            kinds: kinds.into_iter().collect(),
            references: HashMap::new(),
        }
    }

    pub fn total_order(&self) -> &TotalOrder<R::Kind> {
        &self.total_order
    }

    pub fn priority(&self, kind: R::Kind) -> Result<u32, RegistryError> {
        self.total_order.priority(kind)
    }

    /// Registered aggregate types in priority order.
    pub fn kinds(&self) -> &[R::Kind] {
        self.total_order.forward()
    }

    pub fn descriptor(
        &self,
        source: R::Kind,
        target: R::Kind,
    ) -> Result<&ReferenceDescriptor<R>, RegistryError> {
        self.references
            .get(&(source, target))
            .ok_or_else(|| RegistryError::NoDescriptor {
                from: source.to_string(),
                to: target.to_string(),
            })
    }
}

impl<R: Resource> fmt::Debug for Registry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("total_order", &self.total_order.forward())
            .field("references", &self.references.len())
            .finish()
    }
}

/// Builder for [`Registry`].
pub struct RegistryBuilder<R: Resource> {
    kinds: Vec<R::Kind>,
    references: HashMap<(R::Kind, R::Kind), ReferenceDescriptor<R>>,
}

impl<R: Resource> RegistryBuilder<R> {
    /// Registers how `T` aggregates are found from loaded `S` aggregates:
    /// `T.attribute IN strategy(s)` for every loaded `s`.
    pub fn reference<S, T>(
        mut self,
        attribute: impl Into<String>,
        strategy: impl Fn(&S) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self
    where
        S: Aggregate<R>,
        T: Aggregate<R>,
    {
        let strategy: Strategy<R> = Arc::new(move |resource: &R| {
            S::from_resource(resource).map(&strategy).unwrap_or_default()
        });
        self.references.insert(
            (S::KIND, T::KIND),
            ReferenceDescriptor {
                attribute: attribute.into(),
                strategy,
            },
        );
        self
    }

    pub fn build(self) -> Result<Registry<R>, RegistryError> {
        let total_order = TotalOrder::new(self.kinds)?;
        for (source, target) in self.references.keys() {
            total_order.priority(*source)?;
            total_order.priority(*target)?;
        }
        Ok(Registry {
            total_order,
            references: self.references,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::Aggregate;
    use crate::model::{Customer, PurchaseOrder, ShopKind, ShopResource};
    use serde_json::json;

    #[test]
    fn priorities_follow_registration_order() {
        let order = TotalOrder::new(["a", "b", "c"]).unwrap();
        assert_eq!(order.priority("a"), Ok(0));
        assert_eq!(order.priority("c"), Ok(2));
        assert_eq!(order.forward(), &["a", "b", "c"]);
        assert_eq!(order.backward().collect::<Vec<_>>(), vec!["c", "b", "a"]);
    }

    #[test]
    fn unknown_and_duplicate_kinds_are_rejected() {
        let order = TotalOrder::new(["a", "b"]).unwrap();
        assert_eq!(
            order.priority("z"),
            Err(RegistryError::UnknownType("z".into()))
        );
        assert_eq!(
            TotalOrder::new(["a", "b", "a"]).unwrap_err(),
            RegistryError::DuplicateKind("a".into())
        );
    }

    #[test]
    fn descriptor_extracts_keys_from_matching_variant_only() {
        let registry = Registry::<ShopResource>::builder([ShopKind::Customer, ShopKind::PurchaseOrder])
            .reference::<Customer, PurchaseOrder>("customer_id", |c| vec![json!(c.entity_id)])
            .build()
            .unwrap();

        let descriptor = registry
            .descriptor(ShopKind::Customer, ShopKind::PurchaseOrder)
            .unwrap();
        assert_eq!(descriptor.attribute(), "customer_id");

        let loaded = vec![
            Customer::new("c1", "Alice").into_resource(),
            PurchaseOrder::new("o1", "c1").into_resource(),
        ];
        assert_eq!(descriptor.extract(&loaded), vec![json!("c1")]);
    }

    #[test]
    fn missing_descriptor_is_reported() {
        let registry = Registry::<ShopResource>::builder([ShopKind::Customer])
            .build()
            .unwrap();
        assert!(matches!(
            registry.descriptor(ShopKind::Customer, ShopKind::Customer),
            Err(RegistryError::NoDescriptor { .. })
        ));
    }

    #[test]
    fn references_to_unregistered_kinds_fail_the_build() {
        let result = Registry::<ShopResource>::builder([ShopKind::Customer])
            .reference::<Customer, PurchaseOrder>("customer_id", |c| vec![json!(c.entity_id)])
            .build();
        assert!(matches!(result, Err(RegistryError::UnknownType(_))));
    }
}
