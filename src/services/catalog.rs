use crate::errors::ServiceError;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Display fields for a product, as the storefront read-side knows them.
#[derive(Debug, Clone)]
pub struct ProductDisplay {
    pub name: String,
    pub image_url: Option<String>,
}

/// Read-only catalog lookup used to refresh item display fields at
/// settlement time. Prices are never taken from here; the snapshot on the
/// order item stands.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn display_fields(
        &self,
        product_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ProductDisplay>, ServiceError>;
}

/// Catalog that knows nothing; items keep their snapshot display fields.
/// Stands in until the storefront's catalog service is wired up.
pub struct PassthroughCatalog;

#[async_trait]
impl ProductCatalog for PassthroughCatalog {
    async fn display_fields(
        &self,
        _product_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ProductDisplay>, ServiceError> {
        Ok(HashMap::new())
    }
}

/// Fixed in-memory catalog, for tests and demos.
pub struct StaticCatalog {
    products: HashMap<Uuid, ProductDisplay>,
}

impl StaticCatalog {
    pub fn new(products: HashMap<Uuid, ProductDisplay>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn display_fields(
        &self,
        product_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ProductDisplay>, ServiceError> {
        Ok(product_ids
            .iter()
            .filter_map(|id| self.products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}
