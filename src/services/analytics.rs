//! Sales analytics over a principal's scope: the whole platform for a
//! superadmin, one business for its owner and staff.
//!
//! Revenue only counts paid orders. Order counts include every order.

use chrono::{Datelike, Months, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::bounded;
use crate::domain::aggregates::{Principal, Role, Scope};
use crate::domain::value_objects::{Money, TenantId};
use crate::store::{AnalyticsRepository, DailyAmount, DailyCount, MonthlyAmount, OwnerSales, ProductSales, StatusCount};
use crate::{PosError, Result};

/// Headline figures for a dashboard.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dashboard {
    pub total_sales: Money,
    pub total_orders: i64,
    pub total_products: i64,
    pub total_customers: i64,
    /// Only reported platform wide.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_business_owners: Option<i64>,
}

pub struct AnalyticsService {
    repo: Arc<dyn AnalyticsRepository>,
    timeout: Duration,
}

impl AnalyticsService {
    pub fn new(repo: Arc<dyn AnalyticsRepository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    pub async fn total_sales(&self, principal: &Principal) -> Result<Money> {
        let scope = principal.analytics_scope()?;
        self.sales_in(scope).await
    }

    /// Paid revenue per day over the last `days` days, today included. Days without sales are absent.
    pub async fn sales_by_date(&self, principal: &Principal, days: u32) -> Result<Vec<DailyAmount>> {
        let scope = principal.analytics_scope()?;
        let since = days_back(days)?;
        bounded(self.timeout, self.repo.daily_sales(scope, since)).await
    }

    pub async fn orders_by_date(&self, principal: &Principal, days: u32) -> Result<Vec<DailyCount>> {
        let scope = principal.analytics_scope()?;
        let since = days_back(days)?;
        bounded(self.timeout, self.repo.daily_orders(scope, since)).await
    }

    /// New customer accounts per day.
    pub async fn customers_by_date(&self, principal: &Principal, days: u32) -> Result<Vec<DailyCount>> {
        let tenant = tenant_filter(principal.analytics_scope()?)?;
        let since = days_back(days)?;
        bounded(self.timeout, self.repo.daily_customers(tenant, since)).await
    }

    /// Paid revenue per calendar month, starting `months - 1` months before the current one.
    pub async fn monthly_revenue(&self, principal: &Principal, months: u32) -> Result<Vec<MonthlyAmount>> {
        let scope = principal.analytics_scope()?;
        let since = months_back(Utc::now().date_naive(), months)?;
        bounded(self.timeout, self.repo.monthly_revenue(scope, since)).await
    }

    /// Most ordered products by quantity, ties broken by name. Cancelled orders are ignored.
    /// Customers see the best sellers of the business they belong to.
    pub async fn best_sellers(&self, principal: &Principal, limit: u32, category: Option<&str>) -> Result<Vec<ProductSales>> {
        let scope = match principal.role {
            Role::Customer => Scope::Business(principal.tenant()?),
            _ => principal.analytics_scope()?,
        };
        let limit = positive("limit", limit)?;
        let category = category.map(str::trim).filter(|c| !c.is_empty());
        bounded(self.timeout, self.repo.best_sellers(scope, category, limit)).await
    }

    pub async fn top_business_owners(&self, principal: &Principal, limit: u32) -> Result<Vec<OwnerSales>> {
        principal.require_superadmin()?;
        let limit = positive("limit", limit)?;
        bounded(self.timeout, self.repo.top_business_owners(limit)).await
    }

    pub async fn order_status_distribution(&self, principal: &Principal) -> Result<Vec<StatusCount>> {
        let scope = principal.analytics_scope()?;
        bounded(self.timeout, self.repo.status_distribution(scope)).await
    }

    pub async fn dashboard(&self, principal: &Principal) -> Result<Dashboard> {
        self.summarize(principal.analytics_scope()?).await
    }

    /// Dashboard of one business. Superadmins may pick any; owners and staff only their own.
    pub async fn business_summary(&self, principal: &Principal, tenant: TenantId) -> Result<Dashboard> {
        match principal.role {
            Role::Superadmin => {}
            Role::Owner | Role::Staff if principal.tenant == Some(tenant) => {}
            _ => return Err(PosError::Forbidden(format!("cannot view business {tenant}"))),
        }
        self.summarize(Scope::Business(tenant)).await
    }

    async fn summarize(&self, scope: Scope) -> Result<Dashboard> {
        let tenant = tenant_filter(scope)?;
        let total_sales = self.sales_in(scope).await?;
        let total_orders = bounded(self.timeout, self.repo.count_orders(scope)).await?;
        let total_products = bounded(self.timeout, self.repo.count_products(tenant)).await?;
        let total_customers = bounded(self.timeout, self.repo.count_customers(tenant)).await?;
        let total_business_owners = match scope {
            Scope::Platform => Some(bounded(self.timeout, self.repo.count_business_owners()).await?),
            _ => None,
        };
        Ok(Dashboard { total_sales, total_orders, total_products, total_customers, total_business_owners })
    }

    async fn sales_in(&self, scope: Scope) -> Result<Money> {
        Ok(Money::from_cents(bounded(self.timeout, self.repo.total_sales(scope)).await?))
    }
}

/// Product and customer tables are keyed by business, never by customer.
fn tenant_filter(scope: Scope) -> Result<Option<TenantId>> {
    match scope {
        Scope::Platform => Ok(None),
        Scope::Business(t) => Ok(Some(t)),
        Scope::Customer(_) => Err(PosError::Forbidden("customers cannot view business figures".into())),
    }
}

fn positive(what: &str, n: u32) -> Result<i64> {
    if n == 0 {
        return Err(PosError::Validation(format!("{what} must be at least 1")));
    }
    Ok(i64::from(n))
}

fn days_back(days: u32) -> Result<NaiveDate> {
    let days = positive("days", days)?;
    Ok(Utc::now().date_naive() - chrono::Duration::days(days - 1))
}

fn months_back(today: NaiveDate, months: u32) -> Result<NaiveDate> {
    positive("months", months)?;
    today
        .with_day(1)
        .and_then(|first| first.checked_sub_months(Months::new(months - 1)))
        .ok_or_else(|| PosError::Validation(format!("{months} months reaches before the calendar start")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::OrderStatus;
    use crate::domain::value_objects::OrderType;
    use crate::services::events::testing::RecordingSink;
    use crate::services::{CatalogService, OrderEngine, OrderPolicy};
    use crate::store::testing;
    use crate::Cart;

    struct World {
        analytics: AnalyticsService,
        owner: Principal,
        rival: Principal,
        customer: Principal,
        admin: Principal,
    }

    async fn world() -> World {
        let store = testing::store().await;
        let owner = testing::user(&store, "cafe_a", Role::Owner, None).await.principal();
        let rival = testing::user(&store, "cafe_b", Role::Owner, None).await.principal();
        let customer = testing::user(&store, "alice", Role::Customer, owner.tenant).await.principal();
        let admin = testing::user(&store, "root", Role::Superadmin, None).await.principal();

        let sink = Arc::new(RecordingSink::default());
        let catalog = CatalogService::new(Arc::new(store.clone()), sink.clone(), Duration::from_secs(5));
        let engine = OrderEngine::new(Arc::new(store.clone()), sink, OrderPolicy::default());
        let latte = catalog.add(&owner, "Latte", "Coffee", "160").await.unwrap();
        let scone = catalog.add(&owner, "Scone", "Pastry", "90").await.unwrap();
        let mocha = catalog.add(&rival, "Mocha", "Coffee", "170").await.unwrap();

        let mut cart = Cart::new();
        cart.add(&latte, 2).unwrap();
        cart.add(&scone, 1).unwrap();
        let paid = engine.checkout(&owner, &cart, None, OrderType::DineIn).await.unwrap();
        engine.mark_paid(&owner, paid.id()).await.unwrap();
        engine.checkout(&customer, &cart, None, OrderType::TakeOut).await.unwrap();

        let mut other = Cart::new();
        other.add(&mocha, 1).unwrap();
        let theirs = engine.checkout(&rival, &other, None, OrderType::DineIn).await.unwrap();
        engine.mark_paid(&rival, theirs.id()).await.unwrap();

        World { analytics: AnalyticsService::new(Arc::new(store), Duration::from_secs(5)), owner, rival, customer, admin }
    }

    #[tokio::test]
    async fn test_dashboards_are_scoped() {
        let w = world().await;
        let mine = w.analytics.dashboard(&w.owner).await.unwrap();
        assert_eq!(mine, Dashboard {
            total_sales: Money::from_cents(41000),
            total_orders: 2,
            total_products: 2,
            total_customers: 1,
            total_business_owners: None,
        });

        let platform = w.analytics.dashboard(&w.admin).await.unwrap();
        assert_eq!(platform.total_sales, Money::from_cents(58000));
        assert_eq!(platform.total_orders, 3);
        assert_eq!(platform.total_business_owners, Some(2));

        let theirs = w.analytics.business_summary(&w.admin, w.rival.tenant.unwrap()).await.unwrap();
        assert_eq!((theirs.total_orders, theirs.total_products), (1, 1));
        assert!(matches!(
            w.analytics.business_summary(&w.owner, w.rival.tenant.unwrap()).await,
            Err(PosError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_customers_only_get_best_sellers() {
        let w = world().await;
        assert!(matches!(w.analytics.dashboard(&w.customer).await, Err(PosError::Forbidden(_))));
        assert!(matches!(w.analytics.total_sales(&w.customer).await, Err(PosError::Forbidden(_))));

        let top = w.analytics.best_sellers(&w.customer, 3, None).await.unwrap();
        let names: Vec<_> = top.iter().map(|p| (p.product_name.as_str(), p.quantity)).collect();
        assert_eq!(names, [("Latte", 4), ("Scone", 2)]);
        let pastry = w.analytics.best_sellers(&w.owner, 3, Some("Pastry")).await.unwrap();
        assert_eq!(pastry.len(), 1);
    }

    #[tokio::test]
    async fn test_time_series_and_distribution() {
        let w = world().await;
        let today = Utc::now().date_naive();
        let sales = w.analytics.sales_by_date(&w.owner, 7).await.unwrap();
        assert_eq!(sales, [DailyAmount { date: today, amount: Money::from_cents(41000) }]);
        let orders = w.analytics.orders_by_date(&w.admin, 7).await.unwrap();
        assert_eq!(orders, [DailyCount { date: today, count: 3 }]);
        assert_eq!(w.analytics.customers_by_date(&w.owner, 7).await.unwrap()[0].count, 1);
        assert!(w.analytics.customers_by_date(&w.rival, 7).await.unwrap().is_empty());

        let months = w.analytics.monthly_revenue(&w.owner, 6).await.unwrap();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].amount, Money::from_cents(41000));

        let dist = w.analytics.order_status_distribution(&w.owner).await.unwrap();
        assert_eq!(dist, [StatusCount { status: OrderStatus::Pending, count: 2 }]);
        assert!(matches!(w.analytics.sales_by_date(&w.owner, 0).await, Err(PosError::Validation(_))));
    }

    #[tokio::test]
    async fn test_top_owners_is_platform_only() {
        let w = world().await;
        let top = w.analytics.top_business_owners(&w.admin, 5).await.unwrap();
        assert_eq!(top.iter().map(|o| o.username.as_str()).collect::<Vec<_>>(), ["cafe_a", "cafe_b"]);
        assert!(matches!(w.analytics.top_business_owners(&w.owner, 5).await, Err(PosError::Forbidden(_))));
    }

    #[test]
    fn test_months_back_starts_on_the_first() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
        assert_eq!(months_back(today, 1).unwrap(), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(months_back(today, 6).unwrap(), NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert!(months_back(today, 0).is_err());
    }
}
