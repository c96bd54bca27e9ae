use std::collections::HashMap;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use catalink_core::domain::product::{Product, ProductAttribute, ProductId};
use catalink_core::filter::ProductFilter;

use super::{ProductPredicate, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Loads products (already in `seq` order) together with their attributes.
    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Product>, RepositoryError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut attributes = self.load_attributes().await?;
        rows.iter()
            .map(|row| -> Result<Product, RepositoryError> {
                let id: String = decode(row, "internal_id")?;
                let global_trade_identifier: Option<String> =
                    decode(row, "global_trade_identifier")?;
                Ok(Product {
                    attributes: attributes.remove(&id).unwrap_or_default(),
                    id: ProductId(id),
                    global_trade_identifier,
                })
            })
            .collect()
    }

    async fn load_attributes(
        &self,
    ) -> Result<HashMap<String, Vec<ProductAttribute>>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_id, name, value FROM product_attribute ORDER BY product_id, position",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<String, Vec<ProductAttribute>> = HashMap::new();
        for row in &rows {
            let product_id: String = decode(row, "product_id")?;
            grouped.entry(product_id).or_default().push(attribute_from_row(row)?);
        }
        Ok(grouped)
    }
}

fn attribute_from_row(row: &SqliteRow) -> Result<ProductAttribute, RepositoryError> {
    Ok(ProductAttribute::new(decode::<String>(row, "name")?, decode::<String>(row, "value")?))
}

fn decode<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let Some(row) = sqlx::query(
            "SELECT internal_id, global_trade_identifier FROM product WHERE internal_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let attributes = sqlx::query(
            "SELECT name, value FROM product_attribute WHERE product_id = ? ORDER BY position",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(attribute_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Product {
            id: ProductId(decode(&row, "internal_id")?),
            global_trade_identifier: decode(&row, "global_trade_identifier")?,
            attributes,
        }))
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows =
            sqlx::query("SELECT internal_id, global_trade_identifier FROM product ORDER BY seq")
                .fetch_all(&self.pool)
                .await?;
        self.hydrate(rows).await
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let retired = sqlx::query("SELECT 1 FROM retired_product_id WHERE internal_id = ?")
            .bind(product.id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if retired.is_some() {
            return Err(RepositoryError::Conflict(format!(
                "product id `{}` was deleted and cannot be reused",
                product.id
            )));
        }

        sqlx::query(
            "INSERT INTO product (internal_id, global_trade_identifier)
             VALUES (?, ?)
             ON CONFLICT(internal_id) DO UPDATE SET
                 global_trade_identifier = excluded.global_trade_identifier",
        )
        .bind(product.id.as_str())
        .bind(product.gtid())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM product_attribute WHERE product_id = ?")
            .bind(product.id.as_str())
            .execute(&mut *tx)
            .await?;

        for (position, attribute) in product.attributes.iter().enumerate() {
            sqlx::query(
                "INSERT INTO product_attribute (product_id, position, name, value)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(product.id.as_str())
            .bind(position as i64)
            .bind(&attribute.name)
            .bind(&attribute.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &ProductId) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Must run before the delete: the FK would null the link but keep the strategy.
        let cleared = sqlx::query(
            "UPDATE data_provider_product
             SET associated_product_id = NULL,
                 association_strategy = NULL,
                 version = version + 1
             WHERE associated_product_id = ?",
        )
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let deleted = sqlx::query("DELETE FROM product WHERE internal_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO retired_product_id (internal_id, retired_at) VALUES (?, ?)
             ON CONFLICT(internal_id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            event_name = "catalog.product.deleted",
            product_id = %id,
            cleared_associations = cleared,
            "product deleted"
        );
        Ok(true)
    }

    async fn scan(&self, predicate: &ProductPredicate<'_>) -> Result<Vec<Product>, RepositoryError> {
        let mut products = self.list().await?;
        products.retain(|product| predicate(product));
        Ok(products)
    }

    async fn find_matching(&self, filter: &ProductFilter) -> Result<Vec<Product>, RepositoryError> {
        let rows = match filter.global_trade_identifier.as_deref() {
            Some(gtid) => {
                sqlx::query(
                    "SELECT internal_id, global_trade_identifier FROM product
                     WHERE global_trade_identifier = ?
                     ORDER BY seq",
                )
                .bind(gtid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT internal_id, global_trade_identifier FROM product ORDER BY seq")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut products = self.hydrate(rows).await?;
        products.retain(|product| filter.matches(product));
        Ok(products)
    }
}
