use catalink_core::domain::product::Product;

use crate::repositories::{ProductRepository, RepositoryError};

/// Demo catalog that lines up with `sample-data/products.json`: one GTID
/// match, one attribute match and one shared GTID that makes an import
/// record ambiguous.
pub struct DemoCatalog;

impl DemoCatalog {
    pub fn products() -> Vec<Product> {
        vec![
            Product::new("DEMO-0001")
                .with_gtid("04012345000019")
                .with_attribute("Category", "Tools")
                .with_attribute("brand", "Voltix")
                .with_attribute("weight", "1.8"),
            Product::new("DEMO-0002")
                .with_attribute("brand", "Northfield")
                .with_attribute("material", "oak")
                .with_attribute("color", "natural")
                .with_attribute("weight", "12"),
            Product::new("DEMO-0003")
                .with_gtid("0000001")
                .with_attribute("Category", "Fasteners")
                .with_attribute("size", "M6"),
            Product::new("DEMO-0004")
                .with_gtid("0000001")
                .with_attribute("Category", "Fasteners")
                .with_attribute("size", "M8"),
            Product::new("DEMO-0005")
                .with_attribute("brand", "Voltix")
                .with_attribute("color", "red")
                .with_attribute("weight", "0.4"),
        ]
    }

    /// Saves every demo product. Re-running overwrites them in place.
    pub async fn load(repo: &dyn ProductRepository) -> Result<SeedResult, RepositoryError> {
        let mut product_ids = Vec::new();
        for product in Self::products() {
            product_ids.push(product.id.0.clone());
            repo.save(product).await?;
        }
        Ok(SeedResult { product_ids })
    }

    pub async fn verify(repo: &dyn ProductRepository) -> Result<VerificationResult, RepositoryError> {
        let mut missing = Vec::new();
        for product in Self::products() {
            if repo.find_by_id(&product.id).await?.is_none() {
                missing.push(product.id.0);
            }
        }
        Ok(VerificationResult { missing })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub product_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub missing: Vec<String>,
}

impl VerificationResult {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::DemoCatalog;
    use crate::repositories::{InMemoryCatalogStore, ProductRepository};

    #[tokio::test]
    async fn seeding_is_repeatable_and_verifiable() {
        let store = InMemoryCatalogStore::new();

        let first = DemoCatalog::load(&store).await.expect("seed");
        DemoCatalog::load(&store).await.expect("reseed");

        assert_eq!(first.product_ids.len(), 5);
        assert_eq!(store.list().await.expect("list").len(), 5);
        assert!(DemoCatalog::verify(&store).await.expect("verify").is_complete());
    }

    #[tokio::test]
    async fn verification_lists_missing_demo_products() {
        let store = InMemoryCatalogStore::new();
        DemoCatalog::load(&store).await.expect("seed");
        store.delete(&DemoCatalog::products()[1].id).await.expect("delete");

        let verification = DemoCatalog::verify(&store).await.expect("verify");
        assert!(!verification.is_complete());
        assert_eq!(verification.missing, vec!["DEMO-0002".to_string()]);
    }
}
