//! Product rows, always filtered by owning tenant

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CatalogRepository, SqliteStore};
use crate::domain::aggregates::{Product, ProductDraft};
use crate::domain::value_objects::{Money, ProductId, TenantId};
use crate::Result;

const PRODUCT_COLUMNS: &str = "id, owner_id, name, category, price_cents, created_at";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    owner_id: Option<i64>,
    name: String,
    category: String,
    price_cents: i64,
    created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product::restore(ProductId(r.id), r.owner_id.map(TenantId), r.name, r.category, Money::from_cents(r.price_cents), r.created_at)
    }
}

#[async_trait]
impl CatalogRepository for SqliteStore {
    async fn insert_product(&self, owner: TenantId, draft: &ProductDraft) -> Result<Product> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "INSERT INTO products (owner_id, name, category, price_cents, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(owner.0)
        .bind(&draft.name)
        .bind(&draft.category)
        .bind(draft.price.cents()?)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_product(&self, owner: TenantId, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ? AND owner_id = ?"
        ))
        .bind(id.0)
        .bind(owner.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Product::from))
    }

    async fn list_products(&self, owner: TenantId) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE owner_id = ? ORDER BY category, name"
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn update_product(&self, owner: TenantId, id: ProductId, draft: &ProductDraft) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE products SET name = ?, category = ?, price_cents = ? \
             WHERE id = ? AND owner_id = ? RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&draft.name)
        .bind(&draft.category)
        .bind(draft.price.cents()?)
        .bind(id.0)
        .bind(owner.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Product::from))
    }

    async fn delete_product(&self, owner: TenantId, id: ProductId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM products WHERE id = ? AND owner_id = ?")
            .bind(id.0)
            .bind(owner.0)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }
}
