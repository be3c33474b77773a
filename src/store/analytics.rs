//! Read-only aggregate queries over orders, items, products and users

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::{corrupt, scope_predicate, AnalyticsRepository, SqliteStore};
use crate::domain::aggregates::{OrderStatus, Scope};
use crate::domain::value_objects::{Money, TenantId};
use crate::Result;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DailyAmount { pub date: NaiveDate, pub amount: Money }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DailyCount { pub date: NaiveDate, pub count: i64 }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthlyAmount {
    /// `YYYY-MM`
    pub month: String,
    pub amount: Money,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductSales { pub product_name: String, pub quantity: i64, pub revenue: Money }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OwnerSales { pub owner_id: TenantId, pub username: String, pub order_count: i64, pub total_sales: Money }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusCount { pub status: OrderStatus, pub count: i64 }

fn day(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| corrupt("date bucket", e))
}

fn since_text(since: NaiveDate) -> String { since.format("%Y-%m-%d").to_string() }

#[async_trait]
impl AnalyticsRepository for SqliteStore {
    async fn total_sales(&self, scope: Scope) -> Result<i64> {
        let cents: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(o.total_cents), 0) FROM orders o WHERE o.payment_status = 'paid' AND {}",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .fetch_one(&self.pool)
        .await?;
        Ok(cents)
    }

    async fn count_orders(&self, scope: Scope) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM orders o WHERE {}", scope_predicate("o.")))
            .bind(scope.business_filter())
            .bind(scope.customer_filter())
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn count_products(&self, tenant: Option<TenantId>) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE ?1 IS NULL OR owner_id = ?1")
            .bind(tenant.map(|t| t.0))
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn count_customers(&self, tenant: Option<TenantId>) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE role = 'customer' AND (?1 IS NULL OR owning_business_id = ?1)",
        )
        .bind(tenant.map(|t| t.0))
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    async fn count_business_owners(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role IN ('owner', 'staff')")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn daily_sales(&self, scope: Scope, since: NaiveDate) -> Result<Vec<DailyAmount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT date(o.created_at) AS day, SUM(o.total_cents) FROM orders o \
             WHERE o.payment_status = 'paid' AND date(o.created_at) >= ?3 AND {} \
             GROUP BY day ORDER BY day",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .bind(since_text(since))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(d, cents)| Ok(DailyAmount { date: day(&d)?, amount: Money::from_cents(cents) }))
            .collect()
    }

    async fn daily_orders(&self, scope: Scope, since: NaiveDate) -> Result<Vec<DailyCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT date(o.created_at) AS day, COUNT(*) FROM orders o \
             WHERE date(o.created_at) >= ?3 AND {} GROUP BY day ORDER BY day",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .bind(since_text(since))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|(d, count)| Ok(DailyCount { date: day(&d)?, count })).collect()
    }

    async fn daily_customers(&self, tenant: Option<TenantId>, since: NaiveDate) -> Result<Vec<DailyCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT date(created_at) AS day, COUNT(*) FROM users \
             WHERE role = 'customer' AND date(created_at) >= ?2 AND (?1 IS NULL OR owning_business_id = ?1) \
             GROUP BY day ORDER BY day",
        )
        .bind(tenant.map(|t| t.0))
        .bind(since_text(since))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|(d, count)| Ok(DailyCount { date: day(&d)?, count })).collect()
    }

    async fn monthly_revenue(&self, scope: Scope, since: NaiveDate) -> Result<Vec<MonthlyAmount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT strftime('%Y-%m', o.created_at) AS month, SUM(o.total_cents) FROM orders o \
             WHERE o.payment_status = 'paid' AND date(o.created_at) >= ?3 AND {} \
             GROUP BY month ORDER BY month",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .bind(since_text(since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(month, cents)| MonthlyAmount { month, amount: Money::from_cents(cents) }).collect())
    }

    async fn best_sellers(&self, scope: Scope, category: Option<&str>, limit: i64) -> Result<Vec<ProductSales>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(&format!(
            "SELECT oi.product_name, SUM(oi.quantity) AS qty, SUM(oi.quantity * oi.unit_price_cents) \
             FROM order_items oi JOIN orders o ON o.id = oi.order_id \
             WHERE o.status <> 'cancelled' AND (?3 IS NULL OR oi.category = ?3) AND {} \
             GROUP BY oi.product_name ORDER BY qty DESC, oi.product_name ASC LIMIT ?4",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .bind(category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(product_name, quantity, cents)| ProductSales { product_name, quantity, revenue: Money::from_cents(cents) })
            .collect())
    }

    async fn top_business_owners(&self, limit: i64) -> Result<Vec<OwnerSales>> {
        let rows: Vec<(i64, String, i64, i64)> = sqlx::query_as(
            "SELECT u.id, u.username, COUNT(o.id), \
                    COALESCE(SUM(CASE WHEN o.payment_status = 'paid' THEN o.total_cents ELSE 0 END), 0) AS sales \
             FROM users u LEFT JOIN orders o ON o.business_owner_id = u.id \
             WHERE u.role IN ('owner', 'staff') \
             GROUP BY u.id, u.username ORDER BY sales DESC, u.username ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, username, order_count, cents)| OwnerSales {
                owner_id: TenantId(id),
                username,
                order_count,
                total_sales: Money::from_cents(cents),
            })
            .collect())
    }

    async fn status_distribution(&self, scope: Scope) -> Result<Vec<StatusCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT o.status, COUNT(*) FROM orders o WHERE {} GROUP BY o.status ORDER BY o.status",
            scope_predicate("o.")
        ))
        .bind(scope.business_filter())
        .bind(scope.customer_filter())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(status, count)| Ok(StatusCount { status: status.parse()?, count }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Cart, Change, NewOrder, Product, Role};
    use crate::domain::value_objects::{OrderId, OrderType, ProductId};
    use crate::store::{testing, OrderRepository};
    use chrono::{Duration, Utc};

    async fn order(store: &SqliteStore, tenant: TenantId, lines: &[(&str, &str, i64, i64)], paid: bool) -> OrderId {
        let mut cart = Cart::new();
        for (name, category, cents, qty) in lines {
            let p = Product::restore(ProductId(0), Some(tenant), *name, *category, Money::from_cents(*cents), Utc::now());
            cart.add(&p, *qty).unwrap();
        }
        let new = NewOrder::from_cart(&cart, None, OrderType::DineIn, Some(tenant), None).unwrap();
        let id = store.insert_order(&new).await.unwrap().id();
        if paid {
            assert!(store.apply_change(Scope::Business(tenant), id, Change::Paid).await.unwrap());
        }
        id
    }

    #[tokio::test]
    async fn test_total_sales_counts_paid_orders_only() {
        let store = testing::store().await;
        let a = TenantId::from(testing::user(&store, "cafe_a", Role::Owner, None).await.id());
        let b = TenantId::from(testing::user(&store, "cafe_b", Role::Owner, None).await.id());
        order(&store, a, &[("Latte", "Coffee", 10000, 1)], true).await;
        order(&store, a, &[("Latte", "Coffee", 5000, 1)], false).await;
        order(&store, a, &[("Mocha", "Coffee", 7500, 1)], true).await;
        order(&store, b, &[("Mocha", "Coffee", 99900, 1)], true).await;

        assert_eq!(store.total_sales(Scope::Business(a)).await.unwrap(), 17500);
        assert_eq!(store.total_sales(Scope::Platform).await.unwrap(), 117400);
        assert_eq!(store.count_orders(Scope::Business(a)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_best_sellers_ranking() {
        let store = testing::store().await;
        let a = TenantId::from(testing::user(&store, "cafe_a", Role::Owner, None).await.id());
        order(&store, a, &[("Espresso", "Coffee", 12000, 3), ("Latte", "Coffee", 16000, 3)], false).await;
        order(&store, a, &[("Espresso", "Coffee", 12000, 2), ("Cheesecake", "Pastry", 12000, 9)], false).await;
        order(&store, a, &[("Americano", "Coffee", 13000, 3)], false).await;
        let cancelled = order(&store, a, &[("Latte", "Coffee", 16000, 50)], false).await;
        let cancel = Change::Status { from: OrderStatus::Pending, to: OrderStatus::Cancelled };
        store.apply_change(Scope::Business(a), cancelled, cancel).await.unwrap();

        let coffee = store.best_sellers(Scope::Business(a), Some("Coffee"), 10).await.unwrap();
        let names: Vec<_> = coffee.iter().map(|p| (p.product_name.as_str(), p.quantity)).collect();
        assert_eq!(names, [("Espresso", 5), ("Americano", 3), ("Latte", 3)]);
        assert_eq!(coffee[0].revenue, Money::from_cents(60000));

        let all = store.best_sellers(Scope::Business(a), None, 1).await.unwrap();
        assert_eq!(all[0].product_name, "Cheesecake");
    }

    #[tokio::test]
    async fn test_daily_buckets_skip_old_and_empty_days() {
        let store = testing::store().await;
        let a = TenantId::from(testing::user(&store, "cafe_a", Role::Owner, None).await.id());
        order(&store, a, &[("Latte", "Coffee", 16000, 1)], true).await;
        order(&store, a, &[("Latte", "Coffee", 16000, 1)], false).await;
        let old = order(&store, a, &[("Mocha", "Coffee", 17000, 1)], true).await;
        sqlx::query("UPDATE orders SET created_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::days(30))
            .bind(old.0)
            .execute(store.pool())
            .await
            .unwrap();

        let today = Utc::now().date_naive();
        let since = today - Duration::days(6);
        let sales = store.daily_sales(Scope::Business(a), since).await.unwrap();
        assert_eq!(sales, [DailyAmount { date: today, amount: Money::from_cents(16000) }]);
        let orders = store.daily_orders(Scope::Business(a), since).await.unwrap();
        assert_eq!(orders, [DailyCount { date: today, count: 2 }]);

        let months = store.monthly_revenue(Scope::Business(a), today - Duration::days(90)).await.unwrap();
        assert_eq!(months.iter().map(|m| m.amount).sum::<Money>(), Money::from_cents(33000));
    }

    #[tokio::test]
    async fn test_top_owners_include_idle_and_staff_run_businesses() {
        let store = testing::store().await;
        let a = TenantId::from(testing::user(&store, "alpha", Role::Owner, None).await.id());
        testing::user(&store, "zulu", Role::Owner, None).await;
        let staff = TenantId::from(testing::user(&store, "barista", Role::Staff, None).await.id());
        testing::user(&store, "guest", Role::Customer, Some(a)).await;
        order(&store, a, &[("Latte", "Coffee", 16000, 2)], true).await;
        order(&store, a, &[("Latte", "Coffee", 16000, 1)], false).await;
        order(&store, staff, &[("Mocha", "Coffee", 10000, 1)], true).await;

        let top = store.top_business_owners(5).await.unwrap();
        let ranked: Vec<_> = top.iter().map(|o| (o.username.as_str(), o.order_count, o.total_sales)).collect();
        assert_eq!(ranked, [
            ("alpha", 2, Money::from_cents(32000)),
            ("barista", 1, Money::from_cents(10000)),
            ("zulu", 0, Money::ZERO),
        ]);
        assert_eq!(store.count_business_owners().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_status_distribution_and_counts() {
        let store = testing::store().await;
        let a = TenantId::from(testing::user(&store, "cafe_a", Role::Owner, None).await.id());
        testing::user(&store, "guest", Role::Customer, Some(a)).await;
        let first = order(&store, a, &[("Latte", "Coffee", 16000, 1)], false).await;
        order(&store, a, &[("Latte", "Coffee", 16000, 1)], false).await;
        let confirm = Change::Status { from: OrderStatus::Pending, to: OrderStatus::Confirmed };
        store.apply_change(Scope::Business(a), first, confirm).await.unwrap();

        let dist = store.status_distribution(Scope::Business(a)).await.unwrap();
        assert_eq!(dist, [
            StatusCount { status: OrderStatus::Confirmed, count: 1 },
            StatusCount { status: OrderStatus::Pending, count: 1 },
        ]);
        assert_eq!(store.count_customers(Some(a)).await.unwrap(), 1);
        assert_eq!(store.count_customers(None).await.unwrap(), 1);
        let joined = store.daily_customers(Some(a), Utc::now().date_naive()).await.unwrap();
        assert_eq!(joined[0].count, 1);
    }
}
