//! Domain events
use serde::Serialize;

use crate::domain::value_objects::{Money, OrderId, ProductId, TenantId, UserId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Added { product_id: ProductId, owner_id: TenantId, name: String },
    Updated { product_id: ProductId, owner_id: TenantId },
    Removed { product_id: ProductId, owner_id: TenantId },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed {
        order_id: OrderId,
        business_owner_id: Option<TenantId>,
        customer_id: Option<UserId>,
        total: Money,
        item_count: usize,
    },
    Confirmed { order_id: OrderId },
    Paid { order_id: OrderId, total: Money },
    Completed { order_id: OrderId },
    Cancelled { order_id: OrderId },
}

impl DomainEvent {
    /// Subject suffix used when the event leaves the process, e.g. `order.placed`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::Added { .. }) => "product.added",
            Self::Product(ProductEvent::Updated { .. }) => "product.updated",
            Self::Product(ProductEvent::Removed { .. }) => "product.removed",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::Confirmed { .. }) => "order.confirmed",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Order(OrderEvent::Completed { .. }) => "order.completed",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
        }
    }
}
