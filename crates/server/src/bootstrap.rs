use std::sync::Arc;

use catalink_core::config::{AppConfig, ConfigError, LoadOptions};
use catalink_db::{
    connect_with_config, migrations, DataProviderProductRepository, DbPool, ProductRepository,
    SqlDataProviderProductRepository, SqlProductRepository,
};
use catalink_importer::{ImportRunner, ImportSettings};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api_state: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        database_url = %config.database.url,
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let products: Arc<dyn ProductRepository> = Arc::new(SqlProductRepository::new(db_pool.clone()));
    let provider_products: Arc<dyn DataProviderProductRepository> =
        Arc::new(SqlDataProviderProductRepository::new(db_pool.clone()));
    let importer = Arc::new(ImportRunner::new(
        products.clone(),
        provider_products.clone(),
        ImportSettings::from_config(&config),
    ));
    let api_state = ApiState {
        products,
        provider_products,
        importer,
        import_source: config.import.source_path.clone(),
    };

    Ok(Application { config, db_pool, api_state })
}
