//! Persistence: repository traits and their SQLite implementation.
//!
//! Every catalog and order query carries the acting tenant (or customer) in
//! its SQL predicate. Nothing is fetched unscoped and filtered afterwards.

pub mod analytics;
pub mod catalog;
pub mod orders;
pub mod users;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::aggregates::{Change, NewOrder, Order, OrderStatus, Product, ProductDraft, Role, Scope, User};
use crate::domain::value_objects::{OrderId, ProductId, TenantId, UserId};
use crate::{PosError, Result};

pub use analytics::{DailyAmount, DailyCount, MonthlyAmount, OwnerSales, ProductSales, StatusCount};

/// A user row about to be inserted. The password is already hashed.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub owning_business_id: Option<TenantId>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> Result<User>;
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn customers_of(&self, tenant: TenantId) -> Result<Vec<User>>;
    async fn update_user(&self, id: UserId, username: &str, password_hash: Option<&str>, role: Role) -> Result<bool>;
    /// Removes the account and, in the same transaction, every customer it manages.
    async fn delete_user(&self, id: UserId) -> Result<bool>;
    async fn delete_customer(&self, tenant: TenantId, customer: UserId) -> Result<bool>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn insert_product(&self, owner: TenantId, draft: &ProductDraft) -> Result<Product>;
    async fn find_product(&self, owner: TenantId, id: ProductId) -> Result<Option<Product>>;
    async fn list_products(&self, owner: TenantId) -> Result<Vec<Product>>;
    async fn update_product(&self, owner: TenantId, id: ProductId, draft: &ProductDraft) -> Result<Option<Product>>;
    async fn delete_product(&self, owner: TenantId, id: ProductId) -> Result<bool>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Writes the order and all of its items in one transaction.
    async fn insert_order(&self, order: &NewOrder) -> Result<Order>;
    async fn find_order(&self, scope: Scope, id: OrderId) -> Result<Option<Order>>;
    async fn list_orders(&self, scope: Scope, status: Option<OrderStatus>) -> Result<Vec<Order>>;
    /// Compare-and-set: applies `change` only if the row still holds its expected state.
    async fn apply_change(&self, scope: Scope, id: OrderId, change: Change) -> Result<bool>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn total_sales(&self, scope: Scope) -> Result<i64>;
    async fn count_orders(&self, scope: Scope) -> Result<i64>;
    async fn count_products(&self, tenant: Option<TenantId>) -> Result<i64>;
    async fn count_customers(&self, tenant: Option<TenantId>) -> Result<i64>;
    async fn count_business_owners(&self) -> Result<i64>;
    async fn daily_sales(&self, scope: Scope, since: NaiveDate) -> Result<Vec<DailyAmount>>;
    async fn daily_orders(&self, scope: Scope, since: NaiveDate) -> Result<Vec<DailyCount>>;
    async fn daily_customers(&self, tenant: Option<TenantId>, since: NaiveDate) -> Result<Vec<DailyCount>>;
    async fn monthly_revenue(&self, scope: Scope, since: NaiveDate) -> Result<Vec<MonthlyAmount>>;
    async fn best_sellers(&self, scope: Scope, category: Option<&str>, limit: i64) -> Result<Vec<ProductSales>>;
    async fn top_business_owners(&self, limit: i64) -> Result<Vec<OwnerSales>>;
    async fn status_distribution(&self, scope: Scope) -> Result<Vec<StatusCount>>;
}

/// The one storage engine shipped with the crate.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool { &self.pool }
}

/// Order predicate for a scope. Binds `?1` (business) and `?2` (customer).
pub(crate) fn scope_predicate(alias: &str) -> String {
    format!("(?1 IS NULL OR {alias}business_owner_id = ?1) AND (?2 IS NULL OR {alias}customer_id = ?2)")
}

pub(crate) fn corrupt(what: &str, err: impl std::fmt::Display) -> PosError {
    PosError::Persistence(format!("corrupt {what} row: {err}"))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::domain::aggregates::user::hash_password;

    /// Fresh migrated in-memory database. One connection, so every query sees the same data.
    pub async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    pub async fn user(store: &SqliteStore, username: &str, role: Role, business: Option<TenantId>) -> User {
        store
            .insert_user(NewUser {
                username: username.into(),
                password_hash: hash_password("secret123", 4).unwrap(),
                role,
                owning_business_id: business,
            })
            .await
            .unwrap()
    }
}
