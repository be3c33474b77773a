//! Coffeestry POS
//!
//! Multi-tenant point of sale core for coffee shops.
//!
//! ## Features
//! - Per-business product catalog
//! - In-memory carts committed atomically into orders
//! - Order fulfilment and payment state machine
//! - Sales analytics per business and platform wide
//! - Role based access for superadmins, owners, staff and customers

pub mod api;
pub mod config;
pub mod domain;
pub mod services;
pub mod store;

use thiserror::Error;

pub use domain::aggregates::{
    Cart, CartLine, Order, OrderItem, OrderStatus, PaymentStatus, Principal, Product, Role, Scope,
    Transition, User,
};
pub use domain::value_objects::{Money, OrderId, OrderType, ProductId, TenantId, UserId};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum PosError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid order type: {0}")]
    InvalidOrderType(String),

    #[error("Cannot {action} order {order_id} while it is {state}")]
    InvalidTransition {
        order_id: OrderId,
        state: String,
        action: &'static str,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Persistence(String),
}

impl PosError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Store failures are the only errors a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<sqlx::Error> for PosError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Persistence(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for PosError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<validator::ValidationErrors> for PosError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PosError>;
