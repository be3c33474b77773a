//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::value_objects::{Money, ProductId, TenantId};
use crate::PosError;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Product {
    id: ProductId,
    owner_id: Option<TenantId>,
    name: String,
    category: String,
    price: Money,
    created_at: DateTime<Utc>,
}

/// Validated mutable fields of a product, as entered by the owner.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductDraft {
    pub name: String,
    pub category: String,
    pub price: Money,
}

impl ProductDraft {
    pub fn parse(name: &str, category: &str, price: &str) -> Result<Self, PosError> {
        let name = name.trim();
        let category = category.trim();
        if name.is_empty() {
            return Err(PosError::Validation("product name is required".into()));
        }
        if category.is_empty() {
            return Err(PosError::Validation("product category is required".into()));
        }
        Ok(Self { name: name.to_string(), category: category.to_string(), price: Money::parse_price(price)? })
    }
}

impl Product {
    pub fn restore(
        id: ProductId,
        owner_id: Option<TenantId>,
        name: impl Into<String>,
        category: impl Into<String>,
        price: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { id, owner_id, name: name.into(), category: category.into(), price, created_at }
    }

    pub fn id(&self) -> ProductId { self.id }
    pub fn owner_id(&self) -> Option<TenantId> { self.owner_id }
    pub fn name(&self) -> &str { &self.name }
    pub fn category(&self) -> &str { &self.category }
    pub fn price(&self) -> Money { self.price }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
}
