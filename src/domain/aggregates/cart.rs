//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::domain::value_objects::{Money, Quantity};
use crate::PosError;

/// Pre-commit collection of line items. Never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct Cart {
    id: Uuid,
    lines: Vec<CartLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// One product in the cart, snapshotted when it was first added.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CartLine {
    pub product_name: String,
    pub category: String,
    pub unit_price: Money,
    pub quantity: Quantity,
}

impl CartLine {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

impl Cart {
    pub fn new() -> Self {
        let now = Utc::now();
        Self { id: Uuid::new_v4(), lines: vec![], created_at: now, updated_at: now }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn line_count(&self) -> usize { self.lines.len() }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn item_count(&self) -> u64 { self.lines.iter().map(|l| u64::from(l.quantity.value())).sum() }

    /// Adds `quantity` units of `product`. Lines are unique by product name, so
    /// re-adding a product accumulates onto the existing line and keeps its snapshot.
    pub fn add(&mut self, product: &Product, quantity: i64) -> Result<&CartLine, PosError> {
        let quantity = Quantity::new(quantity)?;
        let idx = match self.lines.iter().position(|l| l.product_name == product.name()) {
            Some(idx) => {
                self.lines[idx].quantity = self.lines[idx].quantity.add(quantity)?;
                idx
            }
            None => {
                self.lines.push(CartLine {
                    product_name: product.name().to_string(),
                    category: product.category().to_string(),
                    unit_price: product.price(),
                    quantity,
                });
                self.lines.len() - 1
            }
        };
        self.touch();
        Ok(&self.lines[idx])
    }

    /// Drops the whole line. Absent lines are ignored.
    pub fn remove(&mut self, product_name: &str) {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_name != product_name);
        if self.lines.len() != before { self.touch(); }
    }

    /// Increments or decrements a line, clamping at one. Returns the new quantity.
    pub fn adjust_quantity(&mut self, product_name: &str, delta: i64) -> Option<Quantity> {
        let line = self.lines.iter_mut().find(|l| l.product_name == product_name)?;
        line.quantity = line.quantity.adjusted(delta);
        let quantity = line.quantity;
        self.touch();
        Some(quantity)
    }

    pub fn clear(&mut self) { self.lines.clear(); self.touch(); }

    pub fn total(&self) -> Money { self.lines.iter().map(CartLine::line_total).sum() }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

impl Default for Cart {
    fn default() -> Self { Self::new() }
}
