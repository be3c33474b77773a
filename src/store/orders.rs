//! Order and order item rows

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{corrupt, scope_predicate, OrderRepository, SqliteStore};
use crate::domain::aggregates::{Change, NewOrder, Order, OrderItem, OrderStatus, Scope};
use crate::domain::value_objects::{Money, OrderId, Quantity, TenantId, UserId};
use crate::Result;

const ORDER_COLUMNS: &str =
    "o.id, o.customer_name, o.customer_id, o.business_owner_id, o.order_type, o.total_cents, o.status, o.payment_status, o.created_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    customer_name: Option<String>,
    customer_id: Option<i64>,
    business_owner_id: Option<i64>,
    order_type: String,
    total_cents: i64,
    status: String,
    payment_status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    order_id: i64,
    product_name: String,
    category: String,
    unit_price_cents: i64,
    quantity: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order::restore(
            OrderId(self.id),
            self.customer_name,
            self.customer_id.map(UserId),
            self.business_owner_id.map(TenantId),
            self.order_type.parse().map_err(|e| corrupt("order", e))?,
            Money::from_cents(self.total_cents),
            self.status.parse()?,
            self.payment_status.parse()?,
            self.created_at,
            items,
        ))
    }
}

impl TryFrom<ItemRow> for OrderItem {
    type Error = crate::PosError;
    fn try_from(r: ItemRow) -> Result<Self> {
        Ok(OrderItem {
            product_name: r.product_name,
            category: r.category,
            unit_price: Money::from_cents(r.unit_price_cents),
            quantity: Quantity::new(r.quantity).map_err(|e| corrupt("order item", e))?,
        })
    }
}

#[async_trait]
impl OrderRepository for SqliteStore {
    async fn insert_order(&self, order: &NewOrder) -> Result<Order> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (customer_name, customer_id, business_owner_id, order_type, total_cents, status, payment_status, created_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', 'unpaid', ?) RETURNING id",
        )
        .bind(&order.customer_name)
        .bind(order.customer_id.map(|u| u.0))
        .bind(order.business_owner_id.map(|t| t.0))
        .bind(order.order_type.as_str())
        .bind(order.total.cents()?)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_name, category, unit_price_cents, quantity) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&item.product_name)
            .bind(&item.category)
            .bind(item.unit_price.cents()?)
            .bind(i64::from(item.quantity.value()))
            .execute(&mut *tx)
            .await?;
        }

        // Dropping `tx` on any early return above rolls everything back.
        tx.commit().await?;
        Ok(Order::placed(OrderId(id), order.clone(), created_at))
    }

    async fn find_order(&self, scope: Scope, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = ?3 AND {}",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };

        let items = sqlx::query_as::<_, ItemRow>(
            "SELECT order_id, product_name, category, unit_price_cents, quantity FROM order_items WHERE order_id = ? ORDER BY id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(OrderItem::try_from)
        .collect::<Result<Vec<_>>>()?;
        row.into_order(items).map(Some)
    }

    async fn list_orders(&self, scope: Scope, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE {} AND (?3 IS NULL OR o.status = ?3) ORDER BY o.created_at DESC, o.id DESC",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        let item_rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT oi.order_id, oi.product_name, oi.category, oi.unit_price_cents, oi.quantity \
             FROM order_items oi JOIN orders o ON o.id = oi.order_id \
             WHERE {} AND (?3 IS NULL OR o.status = ?3) ORDER BY oi.id",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            items.entry(row.order_id).or_default().push(row.try_into()?);
        }
        rows.into_iter()
            .map(|row| {
                let own = items.remove(&row.id).unwrap_or_default();
                row.into_order(own)
            })
            .collect()
    }

    async fn apply_change(&self, scope: Scope, id: OrderId, change: Change) -> Result<bool> {
        let done = match change {
            Change::Status { from, to } => {
                sqlx::query(&format!(
                    "UPDATE orders SET status = ?4 WHERE id = ?3 AND status = ?5 AND {}",
                    scope_predicate("")
                ))
                .bind(scope.business_filter())
                .bind(scope.customer_filter())
                .bind(id.0)
                .bind(to.as_str())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
            Change::Paid => {
                sqlx::query(&format!(
                    "UPDATE orders SET payment_status = 'paid' \
                     WHERE id = ?3 AND payment_status = 'unpaid' AND status <> 'cancelled' AND {}",
                    scope_predicate("")
                ))
                .bind(scope.business_filter())
                .bind(scope.customer_filter())
                .bind(id.0)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(done.rows_affected() == 1)
    }
}
