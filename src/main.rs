use std::sync::Arc;
use tracing::{error, info, Instrument};
use uow_recipe::framework::{Aggregate, QueryBuilder, ResourceContainer, UowError};
use uow_recipe::lifecycle::{setup_tracing, UnitOfWorkConfig, UnitOfWorkFactory, UnitOfWorkOptions};
use uow_recipe::model::{
    shop_registry, Customer, Product, PurchaseOrder, Shipment, ShopKind, ShopResource,
};
use uow_recipe::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();
    info!("Starting shop demo");

    let store = MemoryStore::<ShopResource>::new();
    store.seed([
        Customer::new("c1", "Alice")
            .with_email("alice@example.com")
            .into_resource(),
        Product::new("p1", "Super Widget", 2550, 100).into_resource(),
        Product::new("p2", "Gadget", 999, 3).into_resource(),
    ]);
    let factory = UnitOfWorkFactory::new(
        Arc::new(store.clone()),
        shop_registry().clone(),
        UnitOfWorkConfig::from_env(),
    );

    let span = tracing::info_span!("order_placement");
    place_order(&factory, "c1", "o1", &[("p1", 5), ("p2", 1)])
        .instrument(span)
        .await
        .map_err(|e| e.to_string())?;

    let span = tracing::info_span!("shipment");
    match ship_order(&factory, "o1", "s1").instrument(span).await {
        Ok(()) => info!(order_id = "o1", "Order shipped"),
        Err(e) => error!(error = %e, "Shipping failed"),
    }

    let span = tracing::info_span!("report");
    let orders = async {
        let plan = QueryBuilder::read_only(factory.registry())
            .load(ShopKind::PurchaseOrder)
            .equals("customer_id", "c1")
            .order_by("total", true)
            .limit(10)
            .build()?;
        let uow = factory.begin(Some(plan), UnitOfWorkOptions::new()).await?;
        let totals = totals(uow.resources())?;
        uow.finish().await?;
        Ok::<_, UowError>(totals)
    }
    .instrument(span)
    .await
    .map_err(|e| e.to_string())?;

    for (order_id, total) in orders {
        info!(%order_id, total, "Order on file");
    }
    info!("Demo completed successfully");
    Ok(())
}

/// Locks the customer for share and the products for update, reserves stock and creates
/// the order.
async fn place_order(
    factory: &UnitOfWorkFactory<ShopResource>,
    customer_id: &str,
    order_id: &str,
    lines: &[(&str, u32)],
) -> Result<(), UowError> {
    let plan = QueryBuilder::locking(factory.registry())
        .load(ShopKind::Customer)
        .from_id([customer_id])
        .for_share(false)
        .load(ShopKind::Product)
        .from_id(lines.iter().map(|(product_id, _)| *product_id))
        .for_update(false)
        .build()?;
    let mut uow = factory.begin(Some(plan), UnitOfWorkOptions::new()).await?;

    let resources = uow.resources_mut();
    let mut order = PurchaseOrder::new(order_id, resources.get_by_id::<Customer>(customer_id)?.entity_id.clone());
    for (product_id, quantity) in lines {
        let product = resources.get_by_id_mut::<Product>(product_id)?;
        if let Err(e) = product.reserve(*quantity) {
            error!(%product_id, error = %e, "Cannot reserve stock");
            return uow.rollback().await.map(|_| ());
        }
        order = order.with_item(*product_id, *quantity, product.price);
    }
    resources.put(order)?;

    uow.mark_commit();
    uow.finish().await?;
    Ok(())
}

/// Locks the order and its products, creates a shipment and marks the order shipped.
async fn ship_order(
    factory: &UnitOfWorkFactory<ShopResource>,
    order_id: &str,
    shipment_id: &str,
) -> Result<(), UowError> {
    let plan = QueryBuilder::locking(factory.registry())
        .load(ShopKind::PurchaseOrder)
        .from_id([order_id])
        .for_update(true)
        .load(ShopKind::Product)
        .from_previous(None)
        .for_share(false)
        .build()?;
    let mut uow = factory.begin(Some(plan), UnitOfWorkOptions::new()).await?;

    let resources = uow.resources_mut();
    let order = resources.get_by_id_mut::<PurchaseOrder>(order_id)?;
    order.status = uow_recipe::model::OrderStatus::Shipped;
    let shipment = Shipment::new(shipment_id, order.entity_id.clone(), order.customer_id.clone())
        .with_products(order.product_ids().cloned().collect::<Vec<_>>());
    resources.put(shipment)?;

    uow.mark_commit();
    uow.finish().await?;
    Ok(())
}

fn totals(resources: &ResourceContainer<ShopResource>) -> Result<Vec<(String, u64)>, UowError> {
    Ok(resources
        .get_all::<PurchaseOrder>()?
        .into_iter()
        .map(|order| (order.entity_id.clone(), order.total))
        .collect())
}
