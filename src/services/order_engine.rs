//! Order Engine
//!
//! Turns carts into committed orders and drives the fulfilment and payment
//! state machine against the store. Transitions are compare-and-set: when two
//! callers race on one order, exactly one write lands and the loser is told
//! what the order became.

use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::{bounded, EventSink};
use crate::domain::aggregates::{Cart, Change, NewOrder, Order, OrderAction, OrderStatus, Principal, Role, Scope, Transition};
use crate::domain::value_objects::{OrderId, OrderType, TenantId, UserId};
use crate::store::OrderRepository;
use crate::{PosError, Result};

/// Compare-and-set rounds before a transition gives up on a hot order.
const MAX_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug)]
pub struct OrderPolicy {
    /// When set, `complete` refuses orders that are still unpaid.
    pub require_payment_before_completion: bool,
    pub request_timeout: Duration,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self { require_payment_before_completion: false, request_timeout: Duration::from_secs(5) }
    }
}

pub struct OrderEngine {
    orders: Arc<dyn OrderRepository>,
    events: Arc<dyn EventSink>,
    policy: OrderPolicy,
}

impl OrderEngine {
    pub fn new(orders: Arc<dyn OrderRepository>, events: Arc<dyn EventSink>, policy: OrderPolicy) -> Self {
        Self { orders, events, policy }
    }

    pub fn policy(&self) -> OrderPolicy { self.policy }

    /// Writes the cart as one pending, unpaid order with all of its items, or nothing at all.
    /// The cart is left untouched; callers clear it once this returns `Ok`.
    ///
    /// The insert is not wrapped in the request timeout: a deadline firing during `COMMIT`
    /// could not tell the caller whether the order exists. Waiting for a connection is
    /// still bounded by the pool's acquire timeout.
    #[instrument(skip(self, cart), fields(lines = cart.line_count()))]
    pub async fn commit(
        &self,
        cart: &Cart,
        customer_name: Option<String>,
        order_type: OrderType,
        business_owner_id: Option<TenantId>,
        customer_id: Option<UserId>,
    ) -> Result<Order> {
        let new = NewOrder::from_cart(cart, customer_name, order_type, business_owner_id, customer_id)?;
        let mut order = self.orders.insert_order(&new).await.map_err(|e| {
            tracing::warn!(error = %e, "order commit rolled back");
            e
        })?;
        tracing::info!(order_id = %order.id(), total = %order.total(), "order committed");
        self.events.publish_all(order.take_events()).await;
        Ok(order)
    }

    /// Commits `cart` on behalf of `principal`, filling in the business and customer it belongs to.
    pub async fn checkout(
        &self,
        principal: &Principal,
        cart: &Cart,
        customer_name: Option<String>,
        order_type: OrderType,
    ) -> Result<Order> {
        match principal.role {
            Role::Owner | Role::Staff => {
                let business = principal.business()?;
                self.commit(cart, customer_name, order_type, Some(business), None).await
            }
            Role::Customer => {
                let business = principal.tenant()?;
                self.commit(cart, customer_name, order_type, Some(business), Some(principal.user_id)).await
            }
            Role::Superadmin => Err(PosError::Forbidden("superadmin accounts cannot place orders".into())),
        }
    }

    pub async fn confirm(&self, principal: &Principal, id: OrderId) -> Result<Transition> {
        self.transition(principal, id, OrderAction::Confirm).await
    }

    pub async fn complete(&self, principal: &Principal, id: OrderId) -> Result<Transition> {
        self.transition(principal, id, OrderAction::Complete).await
    }

    pub async fn cancel(&self, principal: &Principal, id: OrderId) -> Result<Transition> {
        self.transition(principal, id, OrderAction::Cancel).await
    }

    pub async fn mark_paid(&self, principal: &Principal, id: OrderId) -> Result<Transition> {
        self.transition(principal, id, OrderAction::MarkPaid).await
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    async fn transition(&self, principal: &Principal, id: OrderId, action: OrderAction) -> Result<Transition> {
        let scope = transition_scope(principal, action)?;
        let mut order = self.load(scope, id).await?;

        for _ in 0..MAX_ATTEMPTS {
            let Some(change) = self.plan(principal, &order, action)? else {
                return Ok(Transition::Unchanged);
            };
            if bounded(self.policy.request_timeout, self.orders.apply_change(scope, id, change)).await? {
                order.apply(change);
                tracing::info!(order_id = %id, action = action.as_str(), status = %order.status(), "order updated");
                self.events.publish_all(order.take_events()).await;
                return Ok(Transition::Applied);
            }
            // Someone else moved the order first; plan again against what they left.
            tracing::debug!(order_id = %id, action = action.as_str(), "lost compare-and-set, re-reading");
            order = self.load(scope, id).await?;
        }
        Err(PosError::Persistence(format!("order {id} kept changing during {}", action.as_str())))
    }

    fn plan(&self, principal: &Principal, order: &Order, action: OrderAction) -> Result<Option<Change>> {
        let planned = order.plan(action, self.policy.require_payment_before_completion).map_err(|e| {
            tracing::warn!(order_id = %order.id(), error = %e, "transition rejected");
            e
        })?;
        if planned.is_some() && principal.role == Role::Customer && order.status() != OrderStatus::Pending {
            return Err(PosError::Forbidden("customers can only cancel orders still pending".into()));
        }
        Ok(planned)
    }

    /// One order with its items, if the principal can see it.
    pub async fn order(&self, principal: &Principal, id: OrderId) -> Result<Order> {
        self.load(principal.order_scope()?, id).await
    }

    /// Newest first, optionally narrowed to one status.
    pub async fn orders_for(&self, principal: &Principal, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let scope = principal.order_scope()?;
        bounded(self.policy.request_timeout, self.orders.list_orders(scope, status)).await
    }

    pub async fn pending_orders(&self, principal: &Principal) -> Result<Vec<Order>> {
        self.orders_for(principal, Some(OrderStatus::Pending)).await
    }

    async fn load(&self, scope: Scope, id: OrderId) -> Result<Order> {
        bounded(self.policy.request_timeout, self.orders.find_order(scope, id))
            .await?
            .ok_or_else(|| PosError::not_found("Order", id))
    }
}

fn transition_scope(principal: &Principal, action: OrderAction) -> Result<Scope> {
    match (principal.role, action) {
        (Role::Owner | Role::Staff, _) => principal.business().map(Scope::Business),
        (Role::Customer, OrderAction::Cancel) => Ok(Scope::Customer(principal.user_id)),
        (role, action) => Err(PosError::Forbidden(format!("{role} accounts cannot {} orders", action.as_str()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{PaymentStatus, Product};
    use crate::domain::value_objects::{Money, ProductId};
    use crate::services::events::testing::RecordingSink;
    use crate::services::CatalogService;
    use crate::store::{testing, SqliteStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Shop {
        store: SqliteStore,
        engine: OrderEngine,
        sink: Arc<RecordingSink>,
        owner: Principal,
        rival: Principal,
        customer: Principal,
        admin: Principal,
    }

    async fn shop(require_payment: bool) -> Shop {
        let store = testing::store().await;
        let owner = testing::user(&store, "cafe_a", Role::Owner, None).await.principal();
        let rival = testing::user(&store, "cafe_b", Role::Owner, None).await.principal();
        let customer = testing::user(&store, "alice", Role::Customer, owner.tenant).await.principal();
        let admin = testing::user(&store, "root", Role::Superadmin, None).await.principal();
        let sink = Arc::new(RecordingSink::default());
        let policy = OrderPolicy { require_payment_before_completion: require_payment, ..OrderPolicy::default() };
        let engine = OrderEngine::new(Arc::new(store.clone()), sink.clone(), policy);
        Shop { store, engine, sink, owner, rival, customer, admin }
    }

    fn cart() -> Cart {
        let espresso = Product::restore(ProductId(1), None, "Espresso", "Coffee", Money::from_cents(12000), Utc::now());
        let roll = Product::restore(ProductId(2), None, "Cinnamon Roll", "Pastry", Money::from_cents(8500), Utc::now());
        let mut cart = Cart::new();
        cart.add(&espresso, 2).unwrap();
        cart.add(&roll, 1).unwrap();
        cart
    }

    #[tokio::test]
    async fn test_checkout_commits_cart_snapshot() {
        let s = shop(false).await;
        let cart = cart();
        let order = s.engine.checkout(&s.owner, &cart, Some("  Walk-in ".into()), OrderType::DineIn).await.unwrap();

        assert_eq!(order.total(), Money::from_cents(32500));
        assert_eq!(order.customer_name(), Some("Walk-in"));
        assert_eq!(order.business_owner_id(), s.owner.tenant);
        assert_eq!(order.customer_id(), None);
        assert_eq!(cart.line_count(), 2);
        assert_eq!(s.sink.subjects(), ["order.placed"]);

        let mine = s.engine.checkout(&s.customer, &cart, None, OrderType::TakeOut).await.unwrap();
        assert_eq!(mine.business_owner_id(), s.owner.tenant);
        assert_eq!(mine.customer_id(), Some(s.customer.user_id));

        assert!(matches!(s.engine.checkout(&s.admin, &cart, None, OrderType::DineIn).await, Err(PosError::Forbidden(_))));
        assert!(matches!(
            s.engine.checkout(&s.owner, &Cart::new(), None, OrderType::DineIn).await,
            Err(PosError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle_and_duplicates() {
        let s = shop(false).await;
        let id = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();

        assert_eq!(s.engine.confirm(&s.owner, id).await.unwrap(), Transition::Applied);
        assert_eq!(s.engine.confirm(&s.owner, id).await.unwrap(), Transition::Unchanged);
        assert_eq!(s.engine.mark_paid(&s.owner, id).await.unwrap(), Transition::Applied);
        assert_eq!(s.engine.mark_paid(&s.owner, id).await.unwrap(), Transition::Unchanged);
        assert_eq!(s.engine.complete(&s.owner, id).await.unwrap(), Transition::Applied);
        assert!(matches!(s.engine.cancel(&s.owner, id).await, Err(PosError::InvalidTransition { .. })));
        assert!(matches!(s.engine.confirm(&s.owner, id).await, Err(PosError::InvalidTransition { .. })));

        let order = s.engine.order(&s.owner, id).await.unwrap();
        assert_eq!((order.status(), order.payment_status()), (OrderStatus::Completed, PaymentStatus::Paid));
        assert_eq!(
            s.sink.subjects(),
            ["order.placed", "order.confirmed", "order.paid", "order.completed"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_order_cannot_be_paid() {
        let s = shop(false).await;
        let id = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();
        s.engine.cancel(&s.owner, id).await.unwrap();
        assert!(matches!(s.engine.mark_paid(&s.owner, id).await, Err(PosError::InvalidTransition { .. })));
        assert!(matches!(s.engine.complete(&s.owner, id).await, Err(PosError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_completion_waits_for_payment_when_required() {
        let s = shop(true).await;
        let id = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();
        s.engine.confirm(&s.owner, id).await.unwrap();
        assert!(matches!(s.engine.complete(&s.owner, id).await, Err(PosError::InvalidTransition { .. })));
        s.engine.mark_paid(&s.owner, id).await.unwrap();
        assert_eq!(s.engine.complete(&s.owner, id).await.unwrap(), Transition::Applied);
    }

    #[tokio::test]
    async fn test_other_tenants_cannot_touch_orders() {
        let s = shop(false).await;
        let id = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();

        assert!(matches!(s.engine.confirm(&s.rival, id).await, Err(PosError::NotFound { .. })));
        assert!(matches!(s.engine.order(&s.rival, id).await, Err(PosError::NotFound { .. })));
        assert!(s.engine.orders_for(&s.rival, None).await.unwrap().is_empty());
        assert!(matches!(s.engine.confirm(&s.admin, id).await, Err(PosError::Forbidden(_))));
        assert_eq!(s.engine.orders_for(&s.admin, None).await.unwrap().len(), 1);

        let order = s.engine.order(&s.owner, id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_customer_sees_and_cancels_only_own_pending_orders() {
        let s = shop(false).await;
        let walk_in = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();
        let own = s.engine.checkout(&s.customer, &cart(), None, OrderType::TakeOut).await.unwrap().id();

        let visible = s.engine.orders_for(&s.customer, None).await.unwrap();
        assert_eq!(visible.iter().map(Order::id).collect::<Vec<_>>(), [own]);
        assert!(matches!(s.engine.cancel(&s.customer, walk_in).await, Err(PosError::NotFound { .. })));
        assert!(matches!(s.engine.confirm(&s.customer, own).await, Err(PosError::Forbidden(_))));
        assert!(matches!(s.engine.mark_paid(&s.customer, own).await, Err(PosError::Forbidden(_))));

        s.engine.confirm(&s.owner, own).await.unwrap();
        assert!(matches!(s.engine.cancel(&s.customer, own).await, Err(PosError::Forbidden(_))));

        let second = s.engine.checkout(&s.customer, &cart(), None, OrderType::TakeOut).await.unwrap().id();
        assert_eq!(s.engine.cancel(&s.customer, second).await.unwrap(), Transition::Applied);
        assert!(matches!(s.engine.cancel(&s.customer, second).await, Err(PosError::InvalidTransition { .. })));
        assert_eq!(s.engine.pending_orders(&s.owner).await.unwrap().len(), 1);
    }

    /// Lets another writer land `change` right before the next compare-and-set.
    struct Interleaved {
        inner: SqliteStore,
        change: Mutex<Option<(Scope, Change)>>,
    }

    #[async_trait]
    impl OrderRepository for Interleaved {
        async fn insert_order(&self, order: &NewOrder) -> Result<Order> { self.inner.insert_order(order).await }

        async fn find_order(&self, scope: Scope, id: OrderId) -> Result<Option<Order>> {
            self.inner.find_order(scope, id).await
        }

        async fn list_orders(&self, scope: Scope, status: Option<OrderStatus>) -> Result<Vec<Order>> {
            self.inner.list_orders(scope, status).await
        }

        async fn apply_change(&self, scope: Scope, id: OrderId, change: Change) -> Result<bool> {
            let ahead = self.change.lock().unwrap().take();
            if let Some((their_scope, theirs)) = ahead {
                assert!(self.inner.apply_change(their_scope, id, theirs).await.unwrap());
            }
            self.inner.apply_change(scope, id, change).await
        }
    }

    struct SlowInsert(SqliteStore);

    #[async_trait]
    impl OrderRepository for SlowInsert {
        async fn insert_order(&self, order: &NewOrder) -> Result<Order> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.insert_order(order).await
        }

        async fn find_order(&self, scope: Scope, id: OrderId) -> Result<Option<Order>> { self.0.find_order(scope, id).await }

        async fn list_orders(&self, scope: Scope, status: Option<OrderStatus>) -> Result<Vec<Order>> {
            self.0.list_orders(scope, status).await
        }

        async fn apply_change(&self, scope: Scope, id: OrderId, change: Change) -> Result<bool> {
            self.0.apply_change(scope, id, change).await
        }
    }

    #[tokio::test]
    async fn test_slow_commit_is_reported_not_timed_out() {
        let s = shop(false).await;
        let policy = OrderPolicy { request_timeout: Duration::from_millis(5), ..OrderPolicy::default() };
        let engine = OrderEngine::new(Arc::new(SlowInsert(s.store.clone())), s.sink.clone(), policy);

        let order = engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap();
        assert_eq!(s.engine.orders_for(&s.owner, None).await.unwrap().iter().map(Order::id).collect::<Vec<_>>(), [order.id()]);
    }

    fn interleaved(s: &Shop, change: Change) -> OrderEngine {
        let scope = Scope::Business(s.owner.business().unwrap());
        let repo = Interleaved { inner: s.store.clone(), change: Mutex::new(Some((scope, change))) };
        OrderEngine::new(Arc::new(repo), s.sink.clone(), OrderPolicy::default())
    }

    #[tokio::test]
    async fn test_cancel_still_lands_after_losing_to_confirm() {
        let s = shop(false).await;
        let id = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();
        let engine = interleaved(&s, Change::Status { from: OrderStatus::Pending, to: OrderStatus::Confirmed });

        assert_eq!(engine.cancel(&s.owner, id).await.unwrap(), Transition::Applied);
        assert_eq!(s.engine.order(&s.owner, id).await.unwrap().status(), OrderStatus::Cancelled);
        assert_eq!(s.sink.subjects().last(), Some(&"order.cancelled"));
    }

    #[tokio::test]
    async fn test_losing_to_the_same_transition_is_unchanged() {
        let s = shop(false).await;
        let id = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();
        let engine = interleaved(&s, Change::Status { from: OrderStatus::Pending, to: OrderStatus::Confirmed });
        assert_eq!(engine.confirm(&s.owner, id).await.unwrap(), Transition::Unchanged);

        let engine = interleaved(&s, Change::Status { from: OrderStatus::Confirmed, to: OrderStatus::Completed });
        assert!(matches!(engine.cancel(&s.owner, id).await, Err(PosError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_customer_cancel_losing_to_confirm_is_forbidden() {
        let s = shop(false).await;
        let id = s.engine.checkout(&s.customer, &cart(), None, OrderType::TakeOut).await.unwrap().id();
        let engine = interleaved(&s, Change::Status { from: OrderStatus::Pending, to: OrderStatus::Confirmed });

        assert!(matches!(engine.cancel(&s.customer, id).await, Err(PosError::Forbidden(_))));
        assert_eq!(s.engine.order(&s.owner, id).await.unwrap().status(), OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_racing_transitions_land_once() {
        let s = shop(false).await;
        let id = s.engine.checkout(&s.owner, &cart(), None, OrderType::DineIn).await.unwrap().id();
        s.engine.confirm(&s.owner, id).await.unwrap();

        let (complete, cancel) = tokio::join!(s.engine.complete(&s.owner, id), s.engine.cancel(&s.owner, id));
        assert_eq!([complete.is_ok(), cancel.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let order = s.engine.order(&s.owner, id).await.unwrap();
        let expected = if complete.is_ok() { OrderStatus::Completed } else { OrderStatus::Cancelled };
        assert_eq!(order.status(), expected);

        let (a, b) = tokio::join!(s.engine.mark_paid(&s.owner, id), s.engine.mark_paid(&s.owner, id));
        if expected == OrderStatus::Completed {
            let mut outcomes = [a.unwrap(), b.unwrap()];
            outcomes.sort_by_key(|t| *t == Transition::Unchanged);
            assert_eq!(outcomes, [Transition::Applied, Transition::Unchanged]);
        } else {
            assert!(a.is_err() && b.is_err());
        }
    }

    #[tokio::test]
    async fn test_history_survives_catalog_changes() {
        let s = shop(false).await;
        let catalog = CatalogService::new(Arc::new(s.store.clone()), s.sink.clone(), Duration::from_secs(5));
        let latte = catalog.add(&s.owner, "Latte", "Coffee", "160").await.unwrap();

        let mut cart = Cart::new();
        cart.add(&catalog.get(&s.owner, latte.id()).await.unwrap(), 3).unwrap();
        let id = s.engine.checkout(&s.owner, &cart, None, OrderType::DineIn).await.unwrap().id();

        catalog.update(&s.owner, latte.id(), "Latte", "Coffee", "999").await.unwrap();
        catalog.delete(&s.owner, latte.id()).await.unwrap();

        let order = s.engine.order(&s.owner, id).await.unwrap();
        assert_eq!(order.items()[0].product_name, "Latte");
        assert_eq!(order.items()[0].unit_price, Money::from_cents(16000));
        assert_eq!(order.total(), Money::from_cents(48000));
        assert_eq!(order.items_total(), order.total());
    }
}
