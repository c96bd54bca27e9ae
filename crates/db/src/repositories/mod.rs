use async_trait::async_trait;
use thiserror::Error;

use catalink_core::domain::product::{Product, ProductId};
use catalink_core::domain::provider::{DataProviderProduct, ProviderKey};
use catalink_core::errors::ApplicationError;
use catalink_core::filter::ProductFilter;

pub mod memory;
pub mod product;
pub mod provider_product;

pub use memory::InMemoryCatalogStore;
pub use product::SqlProductRepository;
pub use provider_product::SqlDataProviderProductRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl RepositoryError {
    /// Storage is unreachable rather than the operation being invalid.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            )
        )
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => Self::Conflict(message),
            RepositoryError::NotFound(message) => Self::NotFound(message),
            other => Self::Persistence(other.to_string()),
        }
    }
}

pub type ProductPredicate<'a> = dyn Fn(&Product) -> bool + Send + Sync + 'a;

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Whole catalog in natural (insertion) order.
    async fn list(&self) -> Result<Vec<Product>, RepositoryError>;

    /// Inserts or replaces by id. Existing products keep their catalog
    /// position. Retired ids are rejected with [`RepositoryError::Conflict`].
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;

    /// Removes the product, clears every provider association pointing at it
    /// and retires the id. Returns `false` when nothing was deleted.
    async fn delete(&self, id: &ProductId) -> Result<bool, RepositoryError>;

    async fn scan(&self, predicate: &ProductPredicate<'_>) -> Result<Vec<Product>, RepositoryError>;

    async fn search(&self, term: &str) -> Result<Vec<Product>, RepositoryError> {
        self.scan(&|product: &Product| product.mentions(term)).await
    }

    async fn find_matching(&self, filter: &ProductFilter) -> Result<Vec<Product>, RepositoryError> {
        self.scan(&|product: &Product| filter.matches(product)).await
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderProductQuery {
    pub data_provider_id: Option<String>,
    pub associated: Option<bool>,
}

impl ProviderProductQuery {
    pub fn matches(&self, row: &DataProviderProduct) -> bool {
        let provider_ok =
            self.data_provider_id.as_deref().map_or(true, |id| row.data_provider_id == id);
        let associated_ok = self.associated.map_or(true, |wanted| row.is_associated() == wanted);
        provider_ok && associated_ok
    }
}

#[async_trait]
pub trait DataProviderProductRepository: Send + Sync {
    async fn find_by_key(
        &self,
        key: &ProviderKey,
    ) -> Result<Option<DataProviderProduct>, RepositoryError>;

    /// Rows in first-import order.
    async fn query(
        &self,
        query: &ProviderProductQuery,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError>;

    async fn find_by_associated_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError>;

    /// Version-checked write keyed by `(dataProviderId, externalId)`.
    ///
    /// `expected_version = None` only inserts; `Some(v)` only replaces a row
    /// still at version `v`. Anything else is a [`RepositoryError::Conflict`].
    /// `importedAt` of an existing row is preserved. Returns the stored row
    /// carrying its new version.
    async fn upsert(
        &self,
        row: DataProviderProduct,
        expected_version: Option<i64>,
    ) -> Result<DataProviderProduct, RepositoryError>;
}
