use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::RwLock;

use catalink_core::domain::product::{Product, ProductId};
use catalink_core::domain::provider::{DataProviderProduct, ProviderKey};

use super::{
    DataProviderProductRepository, ProductPredicate, ProductRepository, ProviderProductQuery,
    RepositoryError,
};

/// Catalog and provider rows behind one lock, so deleting a product and
/// clearing its associations is a single step.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    state: RwLock<CatalogState>,
}

#[derive(Default)]
struct CatalogState {
    next_seq: u64,
    products: BTreeMap<u64, Product>,
    seq_by_id: HashMap<String, u64>,
    retired: HashSet<String>,
    provider_rows: Vec<DataProviderProduct>,
    row_by_key: HashMap<ProviderKey, usize>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.write().await;
            for product in products {
                state.insert_product(product);
            }
        }
        store
    }
}

impl CatalogState {
    fn insert_product(&mut self, product: Product) {
        match self.seq_by_id.get(product.id.as_str()) {
            Some(seq) => {
                self.products.insert(*seq, product);
            }
            None => {
                self.next_seq += 1;
                self.seq_by_id.insert(product.id.0.clone(), self.next_seq);
                self.products.insert(self.next_seq, product);
            }
        }
    }
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryCatalogStore {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.seq_by_id.get(id.as_str()).and_then(|seq| state.products.get(seq)).cloned())
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.products.values().cloned().collect())
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.retired.contains(product.id.as_str()) {
            return Err(RepositoryError::Conflict(format!(
                "product id `{}` was deleted and cannot be reused",
                product.id
            )));
        }
        state.insert_product(product);
        Ok(())
    }

    async fn delete(&self, id: &ProductId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(seq) = state.seq_by_id.remove(id.as_str()) else {
            return Ok(false);
        };
        state.products.remove(&seq);
        state.retired.insert(id.0.clone());

        for row in state.provider_rows.iter_mut() {
            if row.associated_product_id.as_ref() == Some(id) {
                row.clear_association();
                row.version += 1;
            }
        }

        Ok(true)
    }

    async fn scan(&self, predicate: &ProductPredicate<'_>) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.products.values().filter(|product| predicate(product)).cloned().collect())
    }
}

#[async_trait::async_trait]
impl DataProviderProductRepository for InMemoryCatalogStore {
    async fn find_by_key(
        &self,
        key: &ProviderKey,
    ) -> Result<Option<DataProviderProduct>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.row_by_key.get(key).map(|index| state.provider_rows[*index].clone()))
    }

    async fn query(
        &self,
        query: &ProviderProductQuery,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.provider_rows.iter().filter(|row| query.matches(row)).cloned().collect())
    }

    async fn find_by_associated_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .provider_rows
            .iter()
            .filter(|row| row.associated_product_id.as_ref() == Some(product_id))
            .cloned()
            .collect())
    }

    async fn upsert(
        &self,
        mut row: DataProviderProduct,
        expected_version: Option<i64>,
    ) -> Result<DataProviderProduct, RepositoryError> {
        let mut state = self.state.write().await;
        let key = row.key();

        if let Some(product_id) = &row.associated_product_id {
            if !state.seq_by_id.contains_key(product_id.as_str()) {
                return Err(RepositoryError::Conflict(format!(
                    "associated product `{product_id}` no longer exists"
                )));
            }
        }

        match (state.row_by_key.get(&key).copied(), expected_version) {
            (None, None) => {
                row.version = 1;
                let index = state.provider_rows.len();
                state.provider_rows.push(row.clone());
                state.row_by_key.insert(key, index);
                Ok(row)
            }
            (Some(index), Some(expected)) if state.provider_rows[index].version == expected => {
                let stored = &mut state.provider_rows[index];
                row.imported_at = stored.imported_at;
                row.version = expected + 1;
                *stored = row.clone();
                Ok(row)
            }
            (Some(_), None) => Err(RepositoryError::Conflict(format!(
                "provider product `{key}` was inserted concurrently"
            ))),
            (_, Some(expected)) => Err(RepositoryError::Conflict(format!(
                "provider product `{key}` changed since version {expected}"
            ))),
        }
    }
}
