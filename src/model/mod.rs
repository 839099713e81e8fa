//! Sample shop domain: the aggregates, their resource enum and the shop [`Registry`].
//!
//! ```text
//! Customer ──customer_id──▶ PurchaseOrder ──order_id──▶ Shipment
//!     │                          │                         │
//!     └──────customer_id─────────┼────────────▶ Shipment   │
//!                                └──items──▶ Product ◀─────┘
//! ```
//!
//! Lock priority follows declaration order: `Customer < PurchaseOrder < Shipment < Product`.

pub mod customer;
pub mod order;
pub mod product;
pub mod shipment;

pub use customer::*;
pub use order::*;
pub use product::*;
pub use shipment::*;

use crate::framework::{Aggregate, EntityId, Registry, RegistryError, Resource, ENTITY_ID};
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::Arc;

/// Generates the kind enum, the resource enum and the `Aggregate` impls for a list of
/// aggregate structs. Each struct needs a public `entity_id: EntityId` field.
macro_rules! shop_resources {
    ($($variant:ident),+ $(,)?) => {
        /// Aggregate types of the shop, in lock priority order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ShopKind {
            $($variant),+
        }

        impl ShopKind {
            pub const ALL: &'static [ShopKind] = &[$(ShopKind::$variant),+];
        }

        impl std::fmt::Display for ShopKind {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $(ShopKind::$variant => stringify!($variant)),+
                })
            }
        }

        /// Any shop aggregate. Serializes as the wrapped aggregate.
        #[derive(Debug, Clone, PartialEq, serde::Serialize)]
        #[serde(untagged)]
        pub enum ShopResource {
            $($variant($variant)),+
        }

        impl Resource for ShopResource {
            type Kind = ShopKind;

            fn kind(&self) -> ShopKind {
                match self {
                    $(ShopResource::$variant(_) => ShopKind::$variant),+
                }
            }

            fn entity_id(&self) -> &EntityId {
                match self {
                    $(ShopResource::$variant(inner) => &inner.entity_id),+
                }
            }
        }

        $(
            impl Aggregate<ShopResource> for $variant {
                const KIND: ShopKind = ShopKind::$variant;

                fn entity_id(&self) -> &EntityId {
                    &self.entity_id
                }

                fn into_resource(self) -> ShopResource {
                    ShopResource::$variant(self)
                }

                fn from_resource(resource: &ShopResource) -> Option<&Self> {
                    match resource {
                        ShopResource::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn from_resource_mut(resource: &mut ShopResource) -> Option<&mut Self> {
                    match resource {
                        ShopResource::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$variant> for ShopResource {
                fn from(aggregate: $variant) -> Self {
                    ShopResource::$variant(aggregate)
                }
            }
        )+

        paste::paste! {
            impl ShopResource {
                $(
                    pub fn [<as_ $variant:snake>](&self) -> Option<&$variant> {
                        <$variant as Aggregate<ShopResource>>::from_resource(self)
                    }
                )+
            }
        }
    };
}

shop_resources!(Customer, PurchaseOrder, Shipment, Product);

/// Builds the shop registry: total order by declaration and the load-chaining references.
pub fn build_shop_registry() -> Result<Registry<ShopResource>, RegistryError> {
    Registry::builder(ShopKind::ALL.iter().copied())
        .reference::<Customer, PurchaseOrder>("customer_id", |c| vec![json!(c.entity_id)])
        .reference::<Customer, Shipment>("customer_id", |c| vec![json!(c.entity_id)])
        .reference::<PurchaseOrder, Shipment>("order_id", |o| vec![json!(o.entity_id)])
        .reference::<PurchaseOrder, Product>(ENTITY_ID, |o| {
            o.product_ids().map(|id| json!(id)).collect()
        })
        .reference::<Shipment, Product>(ENTITY_ID, |s| {
            s.product_ids.iter().map(|id| json!(id)).collect()
        })
        .build()
}

static SHOP_REGISTRY: Lazy<Arc<Registry<ShopResource>>> =
    Lazy::new(|| Arc::new(build_shop_registry().expect("valid shop registry")));

/// The process-wide shop registry, built on first use and never mutated.
pub fn shop_registry() -> &'static Arc<Registry<ShopResource>> {
    &SHOP_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_follows_declaration() {
        let registry = shop_registry();
        assert_eq!(registry.priority(ShopKind::Customer), Ok(0));
        assert_eq!(registry.priority(ShopKind::Product), Ok(3));
        assert_eq!(registry.kinds(), ShopKind::ALL);
    }

    #[test]
    fn resource_serializes_as_its_aggregate() {
        let resource = Customer::new("c1", "Alice").into_resource();
        assert_eq!(
            serde_json::to_value(&resource).unwrap(),
            json!({"entity_id": "c1", "name": "Alice", "email": null})
        );
        assert_eq!(resource.kind(), ShopKind::Customer);
        assert!(resource.as_customer().is_some());
        assert!(resource.as_purchase_order().is_none());
    }

    #[test]
    fn order_items_chain_to_products() {
        let registry = shop_registry();
        let order = PurchaseOrder::new("o1", "c1")
            .with_item("p1", 2, 250)
            .with_item("p2", 1, 1000)
            .into_resource();
        let keys = registry
            .descriptor(ShopKind::PurchaseOrder, ShopKind::Product)
            .unwrap()
            .extract([&order]);
        assert_eq!(keys, vec![json!("p1"), json!("p2")]);
        assert_eq!(order.as_purchase_order().map(|o| o.total), Some(1500));
    }
}
