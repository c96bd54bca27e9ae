use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use catalink_core::domain::product::{Product, ProductId};
use catalink_core::domain::provider::{AssociationStrategy, DataProviderProduct, ProviderKey};
use catalink_db::repositories::ProductPredicate;
use catalink_db::{
    connect_with_settings, migrations, DataProviderProductRepository, DemoCatalog,
    InMemoryCatalogStore, ProductRepository, ProviderProductQuery, RepositoryError,
    SqlDataProviderProductRepository, SqlProductRepository,
};
use catalink_importer::{ImportRunner, ImportSettings, JsonFileSource, RunError};

fn runner(store: &Arc<InMemoryCatalogStore>) -> ImportRunner {
    ImportRunner::new(store.clone(), store.clone(), ImportSettings::default())
}

fn key(external_id: &str) -> ProviderKey {
    ProviderKey::new("JsonDataProvider", external_id)
}

async fn stored_row(store: &InMemoryCatalogStore, external_id: &str) -> DataProviderProduct {
    store.find_by_key(&key(external_id)).await.expect("find row").expect("row was written")
}

#[tokio::test]
async fn gtid_match_end_to_end_is_stable_across_runs() {
    let store =
        Arc::new(InMemoryCatalogStore::with_products([Product::new("P1").with_gtid("X1")]).await);
    let runner = runner(&store);
    let payload = br#"[{"externalId": "E1", "globalTradeIdentifier": "X1"}]"#;

    let first = runner.run(payload).await.expect("first run");
    let first_row = stored_row(&store, "E1").await;
    let second = runner.run(payload).await.expect("second run");
    let second_row = stored_row(&store, "E1").await;

    for result in [&first, &second] {
        assert_eq!(result.total_products(), 1);
        assert_eq!(result.associated_products(), 1);
        assert_eq!(result.not_associated_products(), 0);
        assert!(result.errors().is_empty());
        assert!(result.end_time() >= result.start_time());
    }

    assert_eq!(second_row.associated_product_id, Some(ProductId::from("P1")));
    assert_eq!(second_row.association_strategy, Some(AssociationStrategy::GtidExact));
    assert_eq!(second_row.imported_at, first_row.imported_at);
    assert!(second_row.last_updated_at >= first_row.last_updated_at);
    assert_eq!(store.query(&ProviderProductQuery::default()).await.expect("rows").len(), 1);
}

#[tokio::test]
async fn shared_gtid_is_reported_as_ambiguous_and_left_unassociated() {
    let store = Arc::new(
        InMemoryCatalogStore::with_products([
            Product::new("P1").with_gtid("0000001"),
            Product::new("P2").with_gtid("0000001"),
        ])
        .await,
    );

    let result = runner(&store)
        .run(br#"[{"externalId": "E1", "globalTradeIdentifier": "0000001"}]"#)
        .await
        .expect("run");

    assert_eq!(result.total_products(), 1);
    assert_eq!(result.associated_products(), 0);
    assert_eq!(result.not_associated_products(), 1);
    assert_eq!(result.errors().len(), 1);
    assert!(result.errors()[0].contains("P1"));
    assert!(result.errors()[0].contains("P2"));
    assert!(result.errors()[0].contains("0000001"));

    let row = stored_row(&store, "E1").await;
    assert_eq!(row.associated_product_id, None);
    assert_eq!(row.association_strategy, None);
}

#[tokio::test]
async fn sample_payload_is_idempotent_against_the_demo_catalog() {
    let store = Arc::new(InMemoryCatalogStore::new());
    DemoCatalog::load(store.as_ref()).await.expect("seed");
    let runner = runner(&store);
    let payload = include_bytes!("../../../sample-data/products.json");

    let first = runner.run(payload).await.expect("first run");
    let first_rows = store.query(&ProviderProductQuery::default()).await.expect("rows");
    let second = runner.run(payload).await.expect("second run");
    let second_rows = store.query(&ProviderProductQuery::default()).await.expect("rows");

    assert_eq!(first.total_products(), 5);
    assert_eq!(first.associated_products(), 2);
    assert_eq!(first.not_associated_products(), 3);
    assert_eq!(
        first.associated_products() + first.not_associated_products(),
        first.total_products()
    );
    assert_eq!(first.errors().len(), 2);
    assert!(first.errors()[0].starts_with("record #2 "));
    assert!(first.errors()[1].starts_with("record #4:"));

    assert_eq!(second.total_products(), first.total_products());
    assert_eq!(second.associated_products(), first.associated_products());
    assert_eq!(second.errors(), first.errors());

    assert_eq!(first_rows.len(), second_rows.len());
    for (before, after) in first_rows.iter().zip(&second_rows) {
        assert_eq!(before.key(), after.key());
        assert_eq!(before.associated_product_id, after.associated_product_id);
        assert_eq!(before.association_strategy, after.association_strategy);
        assert_eq!(before.imported_at, after.imported_at);
        assert_eq!(before.attributes, after.attributes);
    }

    let matched_by_attributes = stored_row(&store, "JDP-1002").await;
    assert_eq!(matched_by_attributes.associated_product_id, Some(ProductId::from("DEMO-0002")));
    assert_eq!(
        matched_by_attributes.association_strategy,
        Some(AssociationStrategy::AttributeMatch)
    );
}

#[tokio::test]
async fn gtid_match_copies_enrichment_attributes_once() {
    let store = Arc::new(
        InMemoryCatalogStore::with_products([Product::new("P1")
            .with_gtid("X1")
            .with_attribute("Category", "tools")
            .with_attribute("brand", "Acme")])
        .await,
    );
    let payload = br#"[{
        "externalId": "E1",
        "globalTradeIdentifier": "X1",
        "attributes": [
            {"name": "category", "value": "garden"},
            {"name": "Category", "value": "ignored"},
            {"name": "brand", "value": "Other"}
        ]
    }]"#;

    runner(&store).run(payload).await.expect("run");

    let product = store.find_by_id(&ProductId::from("P1")).await.expect("find").expect("product");
    let categories: Vec<_> =
        product.attributes_named("Category").map(|attribute| attribute.value.as_str()).collect();
    assert_eq!(categories, vec!["garden"]);
    let brands: Vec<_> =
        product.attributes_named("brand").map(|attribute| attribute.value.as_str()).collect();
    assert_eq!(brands, vec!["Acme"]);
}

#[tokio::test]
async fn enrichment_does_not_move_associations_on_the_next_run() {
    let store = Arc::new(
        InMemoryCatalogStore::with_products([Product::new("P1")
            .with_gtid("X1")
            .with_attribute("Category", "tools")
            .with_attribute("brand", "Acme")
            .with_attribute("color", "red")
            .with_attribute("size", "L")])
        .await,
    );
    let runner = runner(&store);
    let payload = br#"[
        {"externalId": "A", "globalTradeIdentifier": "X1", "attributes": {"Category": "garden"}},
        {"externalId": "B", "attributes": {
            "Category": "garden", "brand": "Acme", "color": "red", "size": "L", "pattern": "plain"
        }}
    ]"#;

    let first = runner.run(payload).await.expect("first run");
    let second = runner.run(payload).await.expect("second run");

    for result in [&first, &second] {
        assert_eq!(result.total_products(), 2);
        assert_eq!(result.associated_products(), 1);
        assert_eq!(result.not_associated_products(), 1);
    }
    let row = stored_row(&store, "B").await;
    assert_eq!(row.associated_product_id, None);
    assert_eq!(row.association_strategy, None);

    let product = store.find_by_id(&ProductId::from("P1")).await.expect("find").expect("product");
    let categories: Vec<_> =
        product.attributes_named("Category").map(|attribute| attribute.value.as_str()).collect();
    assert_eq!(categories, vec!["garden"]);
}

#[tokio::test]
async fn first_record_in_payload_order_decides_enriched_value() {
    let store =
        Arc::new(InMemoryCatalogStore::with_products([Product::new("P1").with_gtid("X1")]).await);
    let records: Vec<_> = (0..12)
        .map(|index| {
            serde_json::json!({
                "externalId": format!("E{index}"),
                "globalTradeIdentifier": "X1",
                "attributes": {"Category": format!("value-{index}")}
            })
        })
        .collect();
    let payload = serde_json::to_vec(&records).expect("payload");
    let settings = ImportSettings { workers: 4, ..ImportSettings::default() };
    let runner = ImportRunner::new(store.clone(), store.clone(), settings);

    for _ in 0..2 {
        let result = runner.run(&payload).await.expect("run");
        assert_eq!(result.associated_products(), 12);
        assert!(result.errors().is_empty());

        let product =
            store.find_by_id(&ProductId::from("P1")).await.expect("find").expect("product");
        let categories: Vec<_> = product
            .attributes_named("Category")
            .map(|attribute| attribute.value.as_str())
            .collect();
        assert_eq!(categories, vec!["value-0"]);
    }
}

#[tokio::test]
async fn attribute_match_does_not_enrich() {
    let store = Arc::new(
        InMemoryCatalogStore::with_products([Product::new("P1")
            .with_attribute("brand", "Acme")
            .with_attribute("color", "red")
            .with_attribute("size", "L")
            .with_attribute("weight", "2")])
        .await,
    );
    let payload = br#"[{
        "externalId": "E1",
        "attributes": {"brand": "Acme", "color": "red", "size": "L", "weight": "2", "Category": "garden"}
    }]"#;

    let result = runner(&store).run(payload).await.expect("run");

    assert_eq!(result.associated_products(), 1);
    let row = stored_row(&store, "E1").await;
    assert_eq!(row.association_strategy, Some(AssociationStrategy::AttributeMatch));
    let product = store.find_by_id(&ProductId::from("P1")).await.expect("find").expect("product");
    assert_eq!(product.attributes_named("Category").count(), 0);
}

#[tokio::test]
async fn repeated_keys_in_one_payload_update_a_single_row() {
    let store = Arc::new(InMemoryCatalogStore::new());
    let payload = br#"[
        {"externalId": "E1", "attributes": {"color": "red"}},
        {"externalId": "E1", "attributes": {"color": "blue"}},
        {"externalId": "E1", "attributes": {"color": "green"}}
    ]"#;

    let result = runner(&store).run(payload).await.expect("run");

    assert_eq!(result.total_products(), 3);
    assert!(result.errors().is_empty());
    let rows = store.query(&ProviderProductQuery::default()).await.expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].version, 3);
}

#[tokio::test]
async fn record_errors_follow_payload_order_with_many_workers() {
    let store = Arc::new(InMemoryCatalogStore::new());
    let records: Vec<_> = (0..20)
        .map(|index| {
            if index % 2 == 1 {
                serde_json::json!({"attributes": {"n": index.to_string()}})
            } else {
                serde_json::json!({"externalId": format!("E{index}")})
            }
        })
        .collect();
    let payload = serde_json::to_vec(&records).expect("payload");
    let settings = ImportSettings { workers: 4, ..ImportSettings::default() };

    let result = ImportRunner::new(store.clone(), store.clone(), settings)
        .run(&payload)
        .await
        .expect("run");

    assert_eq!(result.total_products(), 20);
    assert_eq!(result.errors().len(), 10);
    for (position, message) in result.errors().iter().enumerate() {
        let expected = format!("record #{}:", position * 2 + 1);
        assert!(message.starts_with(&expected), "{message} should start with {expected}");
    }
}

#[tokio::test]
async fn unparseable_payloads_fail_the_run() {
    let store = Arc::new(InMemoryCatalogStore::new());
    let runner = runner(&store);

    assert!(matches!(runner.run(b"not json").await, Err(RunError::Payload(_))));
    assert!(matches!(runner.run(br#"{"externalId": "E1"}"#).await, Err(RunError::PayloadShape)));
    assert!(store.query(&ProviderProductQuery::default()).await.expect("rows").is_empty());
}

#[tokio::test]
async fn closed_storage_fails_the_run() {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    let runner = ImportRunner::new(
        Arc::new(SqlProductRepository::new(pool.clone())),
        Arc::new(SqlDataProviderProductRepository::new(pool.clone())),
        ImportSettings::default(),
    );
    pool.close().await;

    let result = runner.run(br#"[{"externalId": "E1"}]"#).await;
    assert!(matches!(result, Err(RunError::Storage(_))));
}

#[tokio::test]
async fn sqlite_backed_run_persists_rows() {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    let products = Arc::new(SqlProductRepository::new(pool.clone()));
    let rows = Arc::new(SqlDataProviderProductRepository::new(pool));
    products.save(Product::new("P1").with_gtid("X1")).await.expect("save");
    let runner = ImportRunner::new(products, rows.clone(), ImportSettings::default());

    let payload = br#"[{"externalId": "E1", "globalTradeIdentifier": "X1"}]"#;
    runner.run(payload).await.expect("first run");
    let result = runner.run(payload).await.expect("second run");

    assert_eq!(result.associated_products(), 1);
    let row = rows.find_by_key(&key("E1")).await.expect("find").expect("row");
    assert_eq!(row.version, 2);
    assert_eq!(row.associated_product_id, Some(ProductId::from("P1")));
}

#[tokio::test]
async fn run_timeout_is_a_run_failure() {
    let store = Arc::new(InMemoryCatalogStore::new());
    let slow = Arc::new(SlowCatalog { inner: store.clone(), delay: Duration::from_secs(5) });
    let settings =
        ImportSettings { timeout: Duration::from_millis(50), ..ImportSettings::default() };

    let result = ImportRunner::new(slow, store, settings).run(b"[]").await;
    assert!(matches!(result, Err(RunError::Timeout(_))));
}

#[tokio::test]
async fn concurrent_writer_is_reported_as_a_conflict() {
    let store =
        Arc::new(InMemoryCatalogStore::with_products([Product::new("P1").with_gtid("X1")]).await);
    let racing = Arc::new(RacingRows { inner: store.clone() });

    let result = ImportRunner::new(store.clone(), racing, ImportSettings::default())
        .run(
            br#"[{"externalId": "E1", "globalTradeIdentifier": "X1",
                  "attributes": {"Category": "garden"}}]"#,
        )
        .await
        .expect("run");

    assert_eq!(result.total_products(), 1);
    assert_eq!(result.associated_products(), 0);
    assert_eq!(result.not_associated_products(), 1);
    assert_eq!(
        result.errors(),
        &["record #0 (JsonDataProvider/E1): storage conflict: provider product \
           `JsonDataProvider/E1` was inserted concurrently"
            .to_string()]
    );
    let product = store.find_by_id(&ProductId::from("P1")).await.expect("find").expect("product");
    assert_eq!(product.attributes_named("Category").count(), 0);
}

#[tokio::test]
async fn file_source_runs_and_missing_file_fails() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("products.json");
    fs::write(&path, br#"[{"externalId": "E1"}]"#).expect("write payload");
    let store = Arc::new(InMemoryCatalogStore::new());
    let runner = runner(&store);

    let result = runner.run_source(&JsonFileSource::new(&path)).await.expect("run");
    assert_eq!(result.not_associated_products(), 1);

    let missing = runner.run_source(&JsonFileSource::new(dir.path().join("absent.json"))).await;
    assert!(matches!(missing, Err(RunError::SourceUnavailable(_))));
}

/// Catalog whose listing outlives any reasonable run timeout.
struct SlowCatalog {
    inner: Arc<InMemoryCatalogStore>,
    delay: Duration,
}

#[async_trait]
impl ProductRepository for SlowCatalog {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        tokio::time::sleep(self.delay).await;
        ProductRepository::list(self.inner.as_ref()).await
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        self.inner.save(product).await
    }

    async fn delete(&self, id: &ProductId) -> Result<bool, RepositoryError> {
        self.inner.delete(id).await
    }

    async fn scan(&self, predicate: &ProductPredicate<'_>) -> Result<Vec<Product>, RepositoryError> {
        self.inner.scan(predicate).await
    }
}

/// Lets a rival writer land the same key just before every write.
struct RacingRows {
    inner: Arc<InMemoryCatalogStore>,
}

#[async_trait]
impl DataProviderProductRepository for RacingRows {
    async fn find_by_key(
        &self,
        key: &ProviderKey,
    ) -> Result<Option<DataProviderProduct>, RepositoryError> {
        self.inner.find_by_key(key).await
    }

    async fn query(
        &self,
        query: &ProviderProductQuery,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError> {
        self.inner.query(query).await
    }

    async fn find_by_associated_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError> {
        self.inner.find_by_associated_product(product_id).await
    }

    async fn upsert(
        &self,
        row: DataProviderProduct,
        expected_version: Option<i64>,
    ) -> Result<DataProviderProduct, RepositoryError> {
        self.inner.upsert(row.clone(), expected_version).await?;
        self.inner.upsert(row, expected_version).await
    }
}
