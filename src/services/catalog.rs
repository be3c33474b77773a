//! Catalog commands and queries. Every call resolves its tenant from the acting principal.

use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::{bounded, EventSink};
use crate::domain::aggregates::{Principal, Product, ProductDraft};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::ProductId;
use crate::store::CatalogRepository;
use crate::{PosError, Result};

pub struct CatalogService {
    repo: Arc<dyn CatalogRepository>,
    events: Arc<dyn EventSink>,
    timeout: Duration,
}

impl CatalogService {
    pub fn new(repo: Arc<dyn CatalogRepository>, events: Arc<dyn EventSink>, timeout: Duration) -> Self {
        Self { repo, events, timeout }
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn add(&self, principal: &Principal, name: &str, category: &str, price: &str) -> Result<Product> {
        let owner = principal.business()?;
        let draft = ProductDraft::parse(name, category, price)?;
        let product = bounded(self.timeout, self.repo.insert_product(owner, &draft)).await?;
        tracing::info!(product_id = %product.id(), owner_id = %owner, "product added");
        self.events
            .publish(&DomainEvent::Product(ProductEvent::Added {
                product_id: product.id(),
                owner_id: owner,
                name: product.name().to_string(),
            }))
            .await;
        Ok(product)
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn update(&self, principal: &Principal, id: ProductId, name: &str, category: &str, price: &str) -> Result<Product> {
        let owner = principal.business()?;
        let draft = ProductDraft::parse(name, category, price)?;
        let product = bounded(self.timeout, self.repo.update_product(owner, id, &draft))
            .await?
            .ok_or_else(|| PosError::not_found("Product", id))?;
        self.events
            .publish(&DomainEvent::Product(ProductEvent::Updated { product_id: id, owner_id: owner }))
            .await;
        Ok(product)
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn delete(&self, principal: &Principal, id: ProductId) -> Result<()> {
        let owner = principal.business()?;
        if !bounded(self.timeout, self.repo.delete_product(owner, id)).await? {
            return Err(PosError::not_found("Product", id));
        }
        self.events
            .publish(&DomainEvent::Product(ProductEvent::Removed { product_id: id, owner_id: owner }))
            .await;
        Ok(())
    }

    /// The business's own catalog, for its owner or staff.
    pub async fn list_for(&self, principal: &Principal) -> Result<Vec<Product>> {
        let owner = principal.business()?;
        bounded(self.timeout, self.repo.list_products(owner)).await
    }

    /// What a principal may order from: their own catalog, or their business's for customers.
    pub async fn menu_for(&self, principal: &Principal) -> Result<Vec<Product>> {
        let tenant = principal.tenant()?;
        tracing::debug!(tenant = %tenant, "loading menu");
        bounded(self.timeout, self.repo.list_products(tenant)).await
    }

    pub async fn get(&self, principal: &Principal, id: ProductId) -> Result<Product> {
        let tenant = principal.tenant()?;
        bounded(self.timeout, self.repo.find_product(tenant, id))
            .await?
            .ok_or_else(|| PosError::not_found("Product", id))
    }
}
