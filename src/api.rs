//! HTTP surface under `/api/v1`.
//!
//! Callers are authenticated upstream; the resolved user id arrives in the
//! `x-user-id` header and is turned into a [`Principal`] per request. Carts
//! live in server memory, one per session UUID, and are never persisted. A
//! session ends at checkout or on `DELETE /carts/:id`.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::config::Config;
use crate::domain::aggregates::{Cart, CartLine, Order, OrderStatus, Principal, Product, Role, Transition, User};
use crate::domain::value_objects::{Money, OrderId, OrderType, ProductId, TenantId, UserId};
use crate::services::{AnalyticsService, CatalogService, EventSink, IdentityService, OrderEngine, UserUpdate};
use crate::store::SqliteStore;
use crate::{PosError, Result};

pub const USER_HEADER: &str = "x-user-id";

struct CartSession {
    owner: UserId,
    cart: Cart,
}

type Carts = Arc<Mutex<HashMap<Uuid, Arc<Mutex<CartSession>>>>>;

#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<IdentityService>,
    pub catalog: Arc<CatalogService>,
    pub orders: Arc<OrderEngine>,
    pub analytics: Arc<AnalyticsService>,
    carts: Carts,
}

impl AppState {
    pub fn new(store: SqliteStore, events: Arc<dyn EventSink>, config: &Config) -> Self {
        let store = Arc::new(store);
        let timeout = config.request_timeout;
        Self {
            identity: Arc::new(IdentityService::new(store.clone(), config.bcrypt_cost, timeout)),
            catalog: Arc::new(CatalogService::new(store.clone(), events.clone(), timeout)),
            orders: Arc::new(OrderEngine::new(store.clone(), events, config.order_policy())),
            analytics: Arc::new(AnalyticsService::new(store, timeout)),
            carts: Arc::default(),
        }
    }

    /// A cart session, only for the user who opened it.
    async fn session(&self, principal: &Principal, id: Uuid) -> Result<Arc<Mutex<CartSession>>> {
        let session = self.carts.lock().await.get(&id).cloned().ok_or_else(|| PosError::not_found("Cart", id))?;
        if session.lock().await.owner != principal.user_id {
            return Err(PosError::not_found("Cart", id));
        }
        Ok(session)
    }

    /// Ends a cart session. Anyone still holding it sees an empty cart.
    async fn close_session(&self, id: Uuid, session: &mut CartSession) {
        session.cart.clear();
        self.carts.lock().await.remove(&id);
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/usernames/:name", get(username_taken))
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/customers", get(list_customers).post(create_customer))
        .route("/customers/:id", axum::routing::delete(delete_customer))
        .route("/menu", get(menu))
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/carts", post(open_cart))
        .route("/carts/:id", get(get_cart).delete(discard_cart))
        .route("/carts/:id/items", post(add_to_cart))
        .route("/carts/:id/items/:name", axum::routing::patch(adjust_cart_item).delete(remove_cart_item))
        .route("/carts/:id/checkout", post(checkout))
        .route("/orders", get(list_orders))
        .route("/orders/pending", get(pending_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/confirm", post(confirm_order))
        .route("/orders/:id/complete", post(complete_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/pay", post(pay_order))
        .route("/analytics/dashboard", get(dashboard))
        .route("/analytics/businesses/:id", get(business_summary))
        .route("/analytics/sales", get(sales_by_date))
        .route("/analytics/orders", get(orders_by_date))
        .route("/analytics/customers", get(customers_by_date))
        .route("/analytics/monthly", get(monthly_revenue))
        .route("/analytics/best-sellers", get(best_sellers))
        .route("/analytics/top-owners", get(top_owners))
        .route("/analytics/status", get(status_distribution));

    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "coffeestry-pos"})) }))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Errors and extractors
// =============================================================================

impl IntoResponse for PosError {
    fn into_response(self) -> Response {
        let status = match &self {
            PosError::InvalidQuantity(_)
            | PosError::InvalidPrice(_)
            | PosError::EmptyCart
            | PosError::InvalidOrderType(_)
            | PosError::Validation(_) => StatusCode::BAD_REQUEST,
            PosError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            PosError::Forbidden(_) => StatusCode::FORBIDDEN,
            PosError::NotFound { .. } => StatusCode::NOT_FOUND,
            PosError::InvalidTransition { .. } | PosError::Conflict(_) => StatusCode::CONFLICT,
            PosError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if self.is_retryable() {
            tracing::error!(error = %self, "store failure");
        }
        (status, Json(serde_json::json!({ "error": self.to_string(), "retryable": self.is_retryable() }))).into_response()
    }
}

/// The authenticated caller.
pub struct Auth(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = PosError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or(PosError::InvalidCredentials)?;
        state.identity.principal_for(UserId(id)).await.map(Auth)
    }
}

/// Quantities and prices arrive from forms as either JSON numbers or strings.
fn field_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn quantity_of(value: &serde_json::Value) -> Result<i64> {
    field_text(value)
        .and_then(|t| t.parse::<i64>().ok())
        .ok_or_else(|| PosError::InvalidQuantity(format!("'{value}' is not a whole number")))
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 6))]
    pub password: String,
    pub role: Role,
}

async fn login(State(s): State<AppState>, Json(r): Json<LoginRequest>) -> Result<Json<User>> {
    r.validate()?;
    Ok(Json(s.identity.authenticate(&r.username, &r.password).await?))
}

async fn register(State(s): State<AppState>, Json(r): Json<RegisterRequest>) -> Result<(StatusCode, Json<User>)> {
    r.validate()?;
    let user = s.identity.register(&r.username, &r.password, r.role).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Serialize)]
pub struct UsernameCheck {
    pub username: String,
    pub exists: bool,
}

async fn username_taken(State(s): State<AppState>, Path(name): Path<String>) -> Result<Json<UsernameCheck>> {
    let exists = s.identity.username_exists(&name).await?;
    Ok(Json(UsernameCheck { username: name.trim().to_string(), exists }))
}

async fn list_users(State(s): State<AppState>, Auth(p): Auth) -> Result<Json<Vec<User>>> {
    Ok(Json(s.identity.list_users(&p).await?))
}

async fn get_user(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<Json<User>> {
    Ok(Json(s.identity.get_user(&p, UserId(id)).await?))
}

async fn update_user(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>, Json(r): Json<UserUpdate>) -> Result<Json<User>> {
    Ok(Json(s.identity.update_user(&p, UserId(id), r).await?))
}

async fn delete_user(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<StatusCode> {
    s.identity.delete_user(&p, UserId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CustomerRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 6))]
    pub password: String,
}

async fn list_customers(State(s): State<AppState>, Auth(p): Auth) -> Result<Json<Vec<User>>> {
    Ok(Json(s.identity.customers_for(&p).await?))
}

async fn create_customer(State(s): State<AppState>, Auth(p): Auth, Json(r): Json<CustomerRequest>) -> Result<(StatusCode, Json<User>)> {
    r.validate()?;
    Ok((StatusCode::CREATED, Json(s.identity.create_customer(&p, &r.username, &r.password).await?)))
}

async fn delete_customer(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<StatusCode> {
    s.identity.delete_customer(&p, UserId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub name: String,
    pub category: String,
    pub price: serde_json::Value,
}

impl ProductRequest {
    fn price_text(&self) -> Result<String> {
        field_text(&self.price).ok_or_else(|| PosError::InvalidPrice(format!("'{}' is not a number", self.price)))
    }
}

async fn menu(State(s): State<AppState>, Auth(p): Auth) -> Result<Json<Vec<Product>>> {
    Ok(Json(s.catalog.menu_for(&p).await?))
}

async fn list_products(State(s): State<AppState>, Auth(p): Auth) -> Result<Json<Vec<Product>>> {
    Ok(Json(s.catalog.list_for(&p).await?))
}

async fn get_product(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<Json<Product>> {
    Ok(Json(s.catalog.get(&p, ProductId(id)).await?))
}

async fn create_product(State(s): State<AppState>, Auth(p): Auth, Json(r): Json<ProductRequest>) -> Result<(StatusCode, Json<Product>)> {
    let product = s.catalog.add(&p, &r.name, &r.category, &r.price_text()?).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>, Json(r): Json<ProductRequest>) -> Result<Json<Product>> {
    Ok(Json(s.catalog.update(&p, ProductId(id), &r.name, &r.category, &r.price_text()?).await?))
}

async fn delete_product(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<StatusCode> {
    s.catalog.delete(&p, ProductId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Carts
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CartView {
    pub id: Uuid,
    pub lines: Vec<CartLine>,
    pub item_count: u64,
    pub total: Money,
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        Self { id: cart.id(), lines: cart.lines().to_vec(), item_count: cart.item_count(), total: cart.total() }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: i64,
    pub quantity: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(max = 120))]
    pub customer_name: Option<String>,
    pub order_type: String,
}

async fn open_cart(State(s): State<AppState>, Auth(p): Auth) -> Result<(StatusCode, Json<CartView>)> {
    p.tenant()?;
    let cart = Cart::new();
    let view = CartView::from(&cart);
    let session = Arc::new(Mutex::new(CartSession { owner: p.user_id, cart }));
    s.carts.lock().await.insert(view.id, session);
    tracing::debug!(cart_id = %view.id, user_id = %p.user_id, "cart opened");
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_cart(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<Uuid>) -> Result<Json<CartView>> {
    let session = s.session(&p, id).await?;
    let session = session.lock().await;
    Ok(Json(CartView::from(&session.cart)))
}

async fn add_to_cart(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<Uuid>, Json(r): Json<AddItemRequest>) -> Result<Json<CartView>> {
    let quantity = quantity_of(&r.quantity)?;
    let product = s.catalog.get(&p, ProductId(r.product_id)).await?;
    let session = s.session(&p, id).await?;
    let mut session = session.lock().await;
    session.cart.add(&product, quantity)?;
    Ok(Json(CartView::from(&session.cart)))
}

async fn adjust_cart_item(
    State(s): State<AppState>,
    Auth(p): Auth,
    Path((id, name)): Path<(Uuid, String)>,
    Json(r): Json<AdjustRequest>,
) -> Result<Json<CartView>> {
    let session = s.session(&p, id).await?;
    let mut session = session.lock().await;
    session.cart.adjust_quantity(&name, r.delta).ok_or_else(|| PosError::not_found("Cart line", &name))?;
    Ok(Json(CartView::from(&session.cart)))
}

async fn remove_cart_item(State(s): State<AppState>, Auth(p): Auth, Path((id, name)): Path<(Uuid, String)>) -> Result<Json<CartView>> {
    let session = s.session(&p, id).await?;
    let mut session = session.lock().await;
    session.cart.remove(&name);
    Ok(Json(CartView::from(&session.cart)))
}

async fn discard_cart(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let session = s.session(&p, id).await?;
    let mut session = session.lock().await;
    s.close_session(id, &mut session).await;
    tracing::debug!(cart_id = %id, user_id = %p.user_id, "cart discarded");
    Ok(StatusCode::NO_CONTENT)
}

/// Commits the cart. The session ends only once the order is durable.
async fn checkout(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<Uuid>, Json(r): Json<CheckoutRequest>) -> Result<(StatusCode, Json<Order>)> {
    r.validate()?;
    let order_type: OrderType = r.order_type.parse()?;
    let session = s.session(&p, id).await?;
    let mut session = session.lock().await;
    let order = s.orders.checkout(&p, &session.cart, r.customer_name, order_type).await?;
    s.close_session(id, &mut session).await;
    Ok((StatusCode::CREATED, Json(order)))
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub order_id: OrderId,
    pub outcome: Transition,
}

async fn list_orders(State(s): State<AppState>, Auth(p): Auth, Query(f): Query<OrderFilter>) -> Result<Json<Vec<Order>>> {
    let status = f
        .status
        .map(|raw| raw.parse::<OrderStatus>().map_err(|_| PosError::Validation(format!("unknown order status '{raw}'"))))
        .transpose()?;
    Ok(Json(s.orders.orders_for(&p, status).await?))
}

async fn pending_orders(State(s): State<AppState>, Auth(p): Auth) -> Result<Json<Vec<Order>>> {
    Ok(Json(s.orders.pending_orders(&p).await?))
}

async fn get_order(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<Json<Order>> {
    Ok(Json(s.orders.order(&p, OrderId(id)).await?))
}

fn transitioned(order_id: OrderId, outcome: Transition) -> Json<TransitionResponse> {
    Json(TransitionResponse { order_id, outcome })
}

async fn confirm_order(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<Json<TransitionResponse>> {
    Ok(transitioned(OrderId(id), s.orders.confirm(&p, OrderId(id)).await?))
}

async fn complete_order(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<Json<TransitionResponse>> {
    Ok(transitioned(OrderId(id), s.orders.complete(&p, OrderId(id)).await?))
}

async fn cancel_order(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<Json<TransitionResponse>> {
    Ok(transitioned(OrderId(id), s.orders.cancel(&p, OrderId(id)).await?))
}

async fn pay_order(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<Json<TransitionResponse>> {
    Ok(transitioned(OrderId(id), s.orders.mark_paid(&p, OrderId(id)).await?))
}

// =============================================================================
// Analytics
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    pub days: Option<u32>,
    pub months: Option<u32>,
    pub limit: Option<u32>,
    pub category: Option<String>,
}

async fn dashboard(State(s): State<AppState>, Auth(p): Auth) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.dashboard(&p).await?))
}

async fn business_summary(State(s): State<AppState>, Auth(p): Auth, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.business_summary(&p, TenantId(id)).await?))
}

async fn sales_by_date(State(s): State<AppState>, Auth(p): Auth, Query(w): Query<WindowParams>) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.sales_by_date(&p, w.days.unwrap_or(7)).await?))
}

async fn orders_by_date(State(s): State<AppState>, Auth(p): Auth, Query(w): Query<WindowParams>) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.orders_by_date(&p, w.days.unwrap_or(7)).await?))
}

async fn customers_by_date(State(s): State<AppState>, Auth(p): Auth, Query(w): Query<WindowParams>) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.customers_by_date(&p, w.days.unwrap_or(7)).await?))
}

async fn monthly_revenue(State(s): State<AppState>, Auth(p): Auth, Query(w): Query<WindowParams>) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.monthly_revenue(&p, w.months.unwrap_or(6)).await?))
}

async fn best_sellers(State(s): State<AppState>, Auth(p): Auth, Query(w): Query<WindowParams>) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.best_sellers(&p, w.limit.unwrap_or(5), w.category.as_deref()).await?))
}

async fn top_owners(State(s): State<AppState>, Auth(p): Auth, Query(w): Query<WindowParams>) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.top_business_owners(&p, w.limit.unwrap_or(5)).await?))
}

async fn status_distribution(State(s): State<AppState>, Auth(p): Auth) -> Result<impl IntoResponse> {
    Ok(Json(s.analytics.order_status_distribution(&p).await?))
}
