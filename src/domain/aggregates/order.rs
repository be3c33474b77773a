//! Order Aggregate
//!
//! An order is an append-only record of a committed cart. After creation only
//! two fields move, each along its own axis:
//!
//! ```text
//! status:          pending ──confirm──▶ confirmed ──complete──▶ completed
//!                     │                    │
//!                     └──────cancel────────┴──────▶ cancelled
//!
//! payment_status:  unpaid ──mark_paid──▶ paid
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::aggregates::Cart;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, OrderId, OrderType, Quantity, TenantId, UserId};
use crate::PosError;

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    id: OrderId,
    customer_name: Option<String>,
    customer_id: Option<UserId>,
    business_owner_id: Option<TenantId>,
    order_type: OrderType,
    total: Money,
    status: OrderStatus,
    payment_status: PaymentStatus,
    created_at: DateTime<Utc>,
    items: Vec<OrderItem>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Snapshot of one cart line. Copied, never referenced, so catalog edits do not reach history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderItem {
    pub product_name: String,
    pub category: String,
    pub unit_price: Money,
    pub quantity: Quantity,
}

impl OrderItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Completed, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Unpaid, Paid }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction { Confirm, Complete, Cancel, MarkPaid }

/// Outcome of a transition request that was not rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Applied,
    /// The order already satisfied the target state; nothing was written.
    Unchanged,
}

/// A single-field change the store must apply with a compare-and-set on `from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Status { from: OrderStatus, to: OrderStatus },
    Paid,
}

/// Everything needed to persist a new order. Built only from a non-empty cart.
#[derive(Clone, Debug, PartialEq)]
pub struct NewOrder {
    pub customer_name: Option<String>,
    pub customer_id: Option<UserId>,
    pub business_owner_id: Option<TenantId>,
    pub order_type: OrderType,
    pub total: Money,
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    pub fn from_cart(
        cart: &Cart,
        customer_name: Option<String>,
        order_type: OrderType,
        business_owner_id: Option<TenantId>,
        customer_id: Option<UserId>,
    ) -> Result<Self, PosError> {
        if cart.is_empty() { return Err(PosError::EmptyCart); }
        let items = cart.lines().iter().map(|l| OrderItem {
            product_name: l.product_name.clone(),
            category: l.category.clone(),
            unit_price: l.unit_price,
            quantity: l.quantity,
        }).collect();
        let customer_name = customer_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Ok(Self { customer_name, customer_id, business_owner_id, order_type, total: cart.total(), items })
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Completed | Self::Cancelled) }
}

impl FromStr for OrderStatus {
    type Err = PosError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PosError::Persistence(format!("unknown order status '{other}'"))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Unpaid => "unpaid", Self::Paid => "paid" }
    }
}

impl FromStr for PaymentStatus {
    type Err = PosError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            other => Err(PosError::Persistence(format!("unknown payment status '{other}'"))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::MarkPaid => "mark paid",
        }
    }
}

impl Order {
    /// A freshly committed order: pending, unpaid, raising `Placed`.
    pub fn placed(id: OrderId, new: NewOrder, created_at: DateTime<Utc>) -> Self {
        let mut order = Self::restore(
            id, new.customer_name, new.customer_id, new.business_owner_id, new.order_type,
            new.total, OrderStatus::Pending, PaymentStatus::Unpaid, created_at, new.items,
        );
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: id,
            business_owner_id: order.business_owner_id,
            customer_id: order.customer_id,
            total: order.total,
            item_count: order.items.len(),
        }));
        order
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: OrderId,
        customer_name: Option<String>,
        customer_id: Option<UserId>,
        business_owner_id: Option<TenantId>,
        order_type: OrderType,
        total: Money,
        status: OrderStatus,
        payment_status: PaymentStatus,
        created_at: DateTime<Utc>,
        items: Vec<OrderItem>,
    ) -> Self {
        Self {
            id, customer_name, customer_id, business_owner_id, order_type, total,
            status, payment_status, created_at, items, events: vec![],
        }
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn customer_name(&self) -> Option<&str> { self.customer_name.as_deref() }
    pub fn customer_id(&self) -> Option<UserId> { self.customer_id }
    pub fn business_owner_id(&self) -> Option<TenantId> { self.business_owner_id }
    pub fn order_type(&self) -> OrderType { self.order_type }
    pub fn total(&self) -> Money { self.total }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn is_paid(&self) -> bool { self.payment_status == PaymentStatus::Paid }

    /// Sum of the stored items. Equal to `total()` for every committed order.
    pub fn items_total(&self) -> Money { self.items.iter().map(OrderItem::line_total).sum() }

    /// Decides what `action` does from the current state without mutating anything.
    /// `Ok(None)` means the request is a duplicate of a state already reached.
    pub fn plan(&self, action: OrderAction, require_payment: bool) -> Result<Option<Change>, PosError> {
        use OrderStatus::*;
        let status_change = |to: OrderStatus| -> Result<Option<Change>, PosError> {
            Ok(Some(Change::Status { from: self.status, to }))
        };
        match (action, self.status) {
            (OrderAction::Confirm, Pending) => status_change(Confirmed),
            (OrderAction::Confirm, Confirmed) => Ok(None),
            (OrderAction::Complete, Confirmed) if require_payment && !self.is_paid() => {
                Err(self.rejected(action, "confirmed and unpaid"))
            }
            (OrderAction::Complete, Confirmed) => status_change(Completed),
            (OrderAction::Cancel, Pending | Confirmed) => status_change(Cancelled),
            (OrderAction::MarkPaid, Cancelled) => Err(self.rejected(action, Cancelled.as_str())),
            (OrderAction::MarkPaid, _) if self.is_paid() => Ok(None),
            (OrderAction::MarkPaid, _) => Ok(Some(Change::Paid)),
            (_, status) => Err(self.rejected(action, status.as_str())),
        }
    }

    /// Records a change the store has accepted.
    pub fn apply(&mut self, change: Change) {
        let order_id = self.id;
        match change {
            Change::Status { to, .. } => {
                self.status = to;
                let event = match to {
                    OrderStatus::Confirmed => Some(OrderEvent::Confirmed { order_id }),
                    OrderStatus::Completed => Some(OrderEvent::Completed { order_id }),
                    OrderStatus::Cancelled => Some(OrderEvent::Cancelled { order_id }),
                    OrderStatus::Pending => None,
                };
                if let Some(e) = event { self.raise_event(DomainEvent::Order(e)); }
            }
            Change::Paid => {
                self.payment_status = PaymentStatus::Paid;
                self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id, total: self.total }));
            }
        }
    }

    pub fn transition(&mut self, action: OrderAction, require_payment: bool) -> Result<Transition, PosError> {
        match self.plan(action, require_payment)? {
            Some(change) => { self.apply(change); Ok(Transition::Applied) }
            None => Ok(Transition::Unchanged),
        }
    }

    pub fn confirm(&mut self) -> Result<Transition, PosError> { self.transition(OrderAction::Confirm, false) }
    pub fn complete(&mut self) -> Result<Transition, PosError> { self.transition(OrderAction::Complete, false) }
    pub fn cancel(&mut self) -> Result<Transition, PosError> { self.transition(OrderAction::Cancel, false) }
    pub fn mark_paid(&mut self) -> Result<Transition, PosError> { self.transition(OrderAction::MarkPaid, false) }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }

    fn rejected(&self, action: OrderAction, state: &str) -> PosError {
        PosError::InvalidTransition { order_id: self.id, state: state.to_string(), action: action.as_str() }
    }
}
