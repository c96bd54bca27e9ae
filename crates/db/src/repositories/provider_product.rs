use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use catalink_core::domain::product::ProductId;
use catalink_core::domain::provider::{
    AssociationStrategy, DataProviderAttribute, DataProviderProduct, ProviderKey,
};

use super::{DataProviderProductRepository, ProviderProductQuery, RepositoryError};
use crate::DbPool;

const ROW_COLUMNS: &str = "data_provider_id, external_id, global_trade_identifier, imported_at,
     last_updated_at, association_strategy, associated_product_id, version";

pub struct SqlDataProviderProductRepository {
    pool: DbPool,
}

impl SqlDataProviderProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(
        &self,
        rows: Vec<SqliteRow>,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let attribute_rows = sqlx::query(
            "SELECT data_provider_id, external_id, name, value
             FROM data_provider_attribute
             ORDER BY data_provider_id, external_id, position",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut attributes: HashMap<ProviderKey, Vec<DataProviderAttribute>> = HashMap::new();
        for row in &attribute_rows {
            let key = ProviderKey::new(
                decode::<String>(row, "data_provider_id")?,
                decode::<String>(row, "external_id")?,
            );
            attributes.entry(key).or_default().push(attribute_from_row(row)?);
        }

        rows.iter()
            .map(|row| -> Result<DataProviderProduct, RepositoryError> {
                let mut product = row_to_provider_product(row)?;
                product.attributes = attributes.remove(&product.key()).unwrap_or_default();
                Ok(product)
            })
            .collect()
    }
}

fn decode<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn attribute_from_row(row: &SqliteRow) -> Result<DataProviderAttribute, RepositoryError> {
    Ok(DataProviderAttribute::new(decode::<String>(row, "name")?, decode::<String>(row, "value")?))
}

fn row_to_provider_product(row: &SqliteRow) -> Result<DataProviderProduct, RepositoryError> {
    let strategy: Option<String> = decode(row, "association_strategy")?;
    let association_strategy = match strategy {
        Some(name) => Some(AssociationStrategy::parse(&name).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown association strategy `{name}`"))
        })?),
        None => None,
    };
    let imported_at: String = decode(row, "imported_at")?;
    let last_updated_at: String = decode(row, "last_updated_at")?;

    Ok(DataProviderProduct {
        data_provider_id: decode(row, "data_provider_id")?,
        external_id: decode(row, "external_id")?,
        global_trade_identifier: decode(row, "global_trade_identifier")?,
        imported_at: parse_timestamp(&imported_at, "imported_at")?,
        last_updated_at: parse_timestamp(&last_updated_at, "last_updated_at")?,
        association_strategy,
        associated_product_id: decode::<Option<String>>(row, "associated_product_id")?
            .map(ProductId),
        attributes: Vec::new(),
        version: decode(row, "version")?,
    })
}

/// A dangling product link means the product was deleted mid-import.
fn map_write_error(error: sqlx::Error, key: &ProviderKey) -> RepositoryError {
    match &error {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::Conflict(
            format!("associated product for `{key}` no longer exists"),
        ),
        _ => RepositoryError::Database(error),
    }
}

#[async_trait::async_trait]
impl DataProviderProductRepository for SqlDataProviderProductRepository {
    async fn find_by_key(
        &self,
        key: &ProviderKey,
    ) -> Result<Option<DataProviderProduct>, RepositoryError> {
        let Some(row) = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM data_provider_product
             WHERE data_provider_id = ? AND external_id = ?"
        ))
        .bind(&key.data_provider_id)
        .bind(&key.external_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let mut product = row_to_provider_product(&row)?;
        product.attributes = sqlx::query(
            "SELECT name, value FROM data_provider_attribute
             WHERE data_provider_id = ? AND external_id = ?
             ORDER BY position",
        )
        .bind(&key.data_provider_id)
        .bind(&key.external_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(attribute_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(product))
    }

    async fn query(
        &self,
        query: &ProviderProductQuery,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM data_provider_product
             WHERE (? IS NULL OR data_provider_id = ?)
               AND (? IS NULL OR (associated_product_id IS NOT NULL) = ?)
             ORDER BY rowid"
        ))
        .bind(query.data_provider_id.as_deref())
        .bind(query.data_provider_id.as_deref())
        .bind(query.associated)
        .bind(query.associated)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn find_by_associated_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<DataProviderProduct>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM data_provider_product
             WHERE associated_product_id = ?
             ORDER BY rowid"
        ))
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn upsert(
        &self,
        mut row: DataProviderProduct,
        expected_version: Option<i64>,
    ) -> Result<DataProviderProduct, RepositoryError> {
        let key = row.key();
        let strategy = row.association_strategy.map(|strategy| strategy.as_str());
        let associated = row.associated_product_id.as_ref().map(ProductId::as_str);
        let mut tx = self.pool.begin().await?;

        match expected_version {
            None => {
                let inserted = sqlx::query(
                    "INSERT INTO data_provider_product
                         (data_provider_id, external_id, global_trade_identifier, imported_at,
                          last_updated_at, association_strategy, associated_product_id, version)
                     VALUES (?, ?, ?, ?, ?, ?, ?, 1)
                     ON CONFLICT(data_provider_id, external_id) DO NOTHING",
                )
                .bind(&row.data_provider_id)
                .bind(&row.external_id)
                .bind(&row.global_trade_identifier)
                .bind(row.imported_at.to_rfc3339())
                .bind(row.last_updated_at.to_rfc3339())
                .bind(strategy)
                .bind(associated)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_write_error(e, &key))?
                .rows_affected();

                if inserted == 0 {
                    return Err(RepositoryError::Conflict(format!(
                        "provider product `{key}` was inserted concurrently"
                    )));
                }
                row.version = 1;
            }
            Some(expected) => {
                let updated = sqlx::query(
                    "UPDATE data_provider_product
                     SET global_trade_identifier = ?,
                         last_updated_at = ?,
                         association_strategy = ?,
                         associated_product_id = ?,
                         version = version + 1
                     WHERE data_provider_id = ? AND external_id = ? AND version = ?",
                )
                .bind(&row.global_trade_identifier)
                .bind(row.last_updated_at.to_rfc3339())
                .bind(strategy)
                .bind(associated)
                .bind(&row.data_provider_id)
                .bind(&row.external_id)
                .bind(expected)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_write_error(e, &key))?
                .rows_affected();

                if updated == 0 {
                    return Err(RepositoryError::Conflict(format!(
                        "provider product `{key}` changed since version {expected}"
                    )));
                }

                let imported_at: String = sqlx::query(
                    "SELECT imported_at FROM data_provider_product
                     WHERE data_provider_id = ? AND external_id = ?",
                )
                .bind(&row.data_provider_id)
                .bind(&row.external_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("imported_at")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                row.imported_at = parse_timestamp(&imported_at, "imported_at")?;
                row.version = expected + 1;

                sqlx::query(
                    "DELETE FROM data_provider_attribute
                     WHERE data_provider_id = ? AND external_id = ?",
                )
                .bind(&row.data_provider_id)
                .bind(&row.external_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        for (position, attribute) in row.attributes.iter().enumerate() {
            sqlx::query(
                "INSERT INTO data_provider_attribute
                     (data_provider_id, external_id, position, name, value)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&row.data_provider_id)
            .bind(&row.external_id)
            .bind(position as i64)
            .bind(&attribute.name)
            .bind(&attribute.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use catalink_core::domain::product::{Product, ProductId};
    use catalink_core::domain::provider::{
        AssociationStrategy, DataProviderAttribute, DataProviderProduct, ProviderKey,
    };

    use super::SqlDataProviderProductRepository;
    use crate::repositories::{
        DataProviderProductRepository, ProductRepository, ProviderProductQuery, RepositoryError,
        SqlProductRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> (SqlProductRepository, SqlDataProviderProductRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        (SqlProductRepository::new(pool.clone()), SqlDataProviderProductRepository::new(pool))
    }

    fn row(external_id: &str, associated: Option<&str>) -> DataProviderProduct {
        let now = Utc::now();
        DataProviderProduct {
            data_provider_id: "JsonDataProvider".to_string(),
            external_id: external_id.to_string(),
            global_trade_identifier: Some("X1".to_string()),
            imported_at: now,
            last_updated_at: now,
            association_strategy: associated.map(|_| AssociationStrategy::GtidExact),
            associated_product_id: associated.map(ProductId::from),
            attributes: vec![
                DataProviderAttribute::new("Category", "tools"),
                DataProviderAttribute::new("color", "red"),
            ],
            version: 0,
        }
    }

    #[tokio::test]
    async fn insert_then_compare_and_swap_update() {
        let (products, rows) = setup().await;
        products.save(Product::new("P1").with_gtid("X1")).await.expect("save product");

        let inserted = rows.upsert(row("E-1", Some("P1")), None).await.expect("insert");
        assert_eq!(inserted.version, 1);

        let mut update = row("E-1", None);
        update.imported_at = inserted.imported_at + Duration::days(3);
        update.last_updated_at = inserted.last_updated_at + Duration::seconds(5);
        update.attributes.pop();
        let updated = rows.upsert(update, Some(1)).await.expect("update");
        assert_eq!(updated.version, 2);

        let stored = rows
            .find_by_key(&ProviderKey::new("JsonDataProvider", "E-1"))
            .await
            .expect("find")
            .expect("row exists");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.imported_at.timestamp(), inserted.imported_at.timestamp());
        assert!(stored.last_updated_at > stored.imported_at);
        assert_eq!(stored.associated_product_id, None);
        assert_eq!(stored.attributes, vec![DataProviderAttribute::new("Category", "tools")]);
    }

    #[tokio::test]
    async fn stale_and_duplicate_writes_are_conflicts() {
        let (_, rows) = setup().await;
        rows.upsert(row("E-1", None), None).await.expect("insert");

        let duplicate = rows.upsert(row("E-1", None), None).await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

        rows.upsert(row("E-1", None), Some(1)).await.expect("update");
        let stale = rows.upsert(row("E-1", None), Some(1)).await;
        assert!(matches!(stale, Err(RepositoryError::Conflict(_))));

        let all = rows.query(&ProviderProductQuery::default()).await.expect("query");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn link_to_missing_product_is_a_conflict() {
        let (_, rows) = setup().await;
        let result = rows.upsert(row("E-1", Some("P404")), None).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn deleting_a_product_clears_association_and_bumps_version() {
        let (products, rows) = setup().await;
        products.save(Product::new("P1")).await.expect("save product");
        rows.upsert(row("E-1", Some("P1")), None).await.expect("insert");

        assert_eq!(
            rows.find_by_associated_product(&ProductId::from("P1")).await.expect("linked").len(),
            1
        );
        assert!(products.delete(&ProductId::from("P1")).await.expect("delete"));

        let stored = rows
            .find_by_key(&ProviderKey::new("JsonDataProvider", "E-1"))
            .await
            .expect("find")
            .expect("row survives");
        assert_eq!(stored.associated_product_id, None);
        assert_eq!(stored.association_strategy, None);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn query_filters_by_provider_and_association_in_import_order() {
        let (products, rows) = setup().await;
        products.save(Product::new("P1")).await.expect("save product");
        rows.upsert(row("E-2", None), None).await.expect("insert");
        rows.upsert(row("E-1", Some("P1")), None).await.expect("insert");
        let mut other = row("E-3", None);
        other.data_provider_id = "OtherProvider".to_string();
        rows.upsert(other, None).await.expect("insert");

        let all = rows.query(&ProviderProductQuery::default()).await.expect("query");
        let keys: Vec<_> = all.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(keys, vec!["E-2", "E-1", "E-3"]);
        assert_eq!(all[1].attributes.len(), 2);

        let unassociated = rows
            .query(&ProviderProductQuery {
                data_provider_id: Some("JsonDataProvider".to_string()),
                associated: Some(false),
            })
            .await
            .expect("query");
        assert_eq!(unassociated.len(), 1);
        assert_eq!(unassociated[0].external_id, "E-2");
    }
}
