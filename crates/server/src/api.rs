//! JSON API over the catalog, provider rows and the import runner.
//!
//! - `GET    /api/products`                            list in catalog order
//! - `POST   /api/products`                            create, id assigned here
//! - `GET    /api/products/search?term=`               substring search
//! - `POST   /api/products/filter`                     GTID/attribute filter
//! - `GET    /api/products/{id}`                       fetch one
//! - `PUT    /api/products/{id}`                       replace GTID and attributes
//! - `DELETE /api/products/{id}`                       delete and clear associations
//! - `GET    /api/products/{id}/dataprovider-products` provider rows linked to a product
//! - `GET    /api/dataprovider-products`               provider rows, optionally filtered
//! - `POST   /api/dataprovider/import/json`            import the configured payload file

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use catalink_core::domain::product::{Product, ProductDraft, ProductId};
use catalink_core::domain::provider::DataProviderProduct;
use catalink_core::errors::{ApplicationError, InterfaceError};
use catalink_core::filter::{ProductFilter, ProductFilterRequest};
use catalink_core::import::ImportResult;
use catalink_db::{DataProviderProductRepository, ProductRepository, ProviderProductQuery};
use catalink_importer::{ImportRunner, JsonFileSource, RunError};

#[derive(Clone)]
pub struct ApiState {
    pub products: Arc<dyn ProductRepository>,
    pub provider_products: Arc<dyn DataProviderProductRepository>,
    pub importer: Arc<ImportRunner>,
    pub import_source: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub term: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProductParams {
    pub provider_id: Option<String>,
    pub associated: Option<bool>,
}

/// A provider row with its associated product looked up at response time.
/// A dangling id renders as `associatedProduct: null`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProviderProductView {
    #[serde(flatten)]
    pub row: DataProviderProduct,
    pub associated_product: Option<Product>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route("/api/products/search", get(search_products))
        .route("/api/products/filter", post(filter_products))
        .route(
            "/api/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/api/products/{id}/dataprovider-products", get(product_provider_products))
        .route("/api/dataprovider-products", get(list_provider_products))
        .route("/api/dataprovider/import/json", post(import_json))
        .with_state(state)
}

async fn list_products(State(state): State<ApiState>) -> ApiResult<Json<Vec<Product>>> {
    let products = state.products.list().await.map_err(|err| reject(err.into()))?;
    Ok(Json(products))
}

async fn get_product(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Json<Product>> {
    let id = ProductId(id);
    match state.products.find_by_id(&id).await.map_err(|err| reject(err.into()))? {
        Some(product) => Ok(Json(product)),
        None => Err(product_not_found(&id)),
    }
}

async fn create_product(
    State(state): State<ApiState>,
    Json(draft): Json<ProductDraft>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let product = draft.into_product(ProductId::generate());
    state.products.save(product.clone()).await.map_err(|err| reject(err.into()))?;

    info!(
        event_name = "catalog.product.created",
        correlation_id = %product.id,
        attributes = product.attributes.len(),
        "product created"
    );
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(draft): Json<ProductDraft>,
) -> ApiResult<Json<Product>> {
    let id = ProductId(id);
    if state.products.find_by_id(&id).await.map_err(|err| reject(err.into()))?.is_none() {
        return Err(product_not_found(&id));
    }

    let product = draft.into_product(id);
    state.products.save(product.clone()).await.map_err(|err| reject(err.into()))?;
    Ok(Json(product))
}

async fn delete_product(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<StatusCode> {
    let id = ProductId(id);
    if state.products.delete(&id).await.map_err(|err| reject(err.into()))? {
        info!(event_name = "catalog.product.removed", correlation_id = %id, "product deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(product_not_found(&id))
    }
}

async fn search_products(
    Query(params): Query<SearchParams>,
    State(state): State<ApiState>,
) -> ApiResult<Json<Vec<Product>>> {
    let term = params.term.unwrap_or_default();
    let products = state.products.search(&term).await.map_err(|err| reject(err.into()))?;
    Ok(Json(products))
}

async fn filter_products(
    State(state): State<ApiState>,
    Json(request): Json<ProductFilterRequest>,
) -> ApiResult<Json<Vec<Product>>> {
    let filter = ProductFilter::try_from(request).map_err(|err| reject(err.into()))?;
    let products = state.products.find_matching(&filter).await.map_err(|err| reject(err.into()))?;
    Ok(Json(products))
}

async fn list_provider_products(
    Query(params): Query<ProviderProductParams>,
    State(state): State<ApiState>,
) -> ApiResult<Json<Vec<DataProviderProductView>>> {
    let query =
        ProviderProductQuery { data_provider_id: params.provider_id, associated: params.associated };
    let rows = state.provider_products.query(&query).await.map_err(|err| reject(err.into()))?;
    Ok(Json(resolve_views(&state, rows).await?))
}

async fn product_provider_products(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Json<Vec<DataProviderProductView>>> {
    let id = ProductId(id);
    let Some(product) = state.products.find_by_id(&id).await.map_err(|err| reject(err.into()))?
    else {
        return Err(product_not_found(&id));
    };

    let rows = state
        .provider_products
        .find_by_associated_product(&id)
        .await
        .map_err(|err| reject(err.into()))?;
    let views = rows
        .into_iter()
        .map(|row| DataProviderProductView { row, associated_product: Some(product.clone()) })
        .collect();
    Ok(Json(views))
}

async fn import_json(State(state): State<ApiState>) -> ApiResult<(StatusCode, Json<ImportResult>)> {
    let source = JsonFileSource::new(&state.import_source);
    match state.importer.run_source(&source).await {
        Ok(result) if result.has_errors() => Ok((StatusCode::MULTI_STATUS, Json(result))),
        Ok(result) => Ok((StatusCode::OK, Json(result))),
        Err(err) => Err(reject_run(err)),
    }
}

async fn resolve_views(
    state: &ApiState,
    rows: Vec<DataProviderProduct>,
) -> ApiResult<Vec<DataProviderProductView>> {
    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        let associated_product = match &row.associated_product_id {
            Some(product_id) => {
                state.products.find_by_id(product_id).await.map_err(|err| reject(err.into()))?
            }
            None => None,
        };
        views.push(DataProviderProductView { row, associated_product });
    }
    Ok(views)
}

fn product_not_found(id: &ProductId) -> (StatusCode, Json<ApiError>) {
    reject(ApplicationError::NotFound(format!("product `{id}`")))
}

fn reject(error: ApplicationError) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id());
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = %interface.correlation_id(),
            error = %interface,
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            correlation_id = %interface.correlation_id(),
            error = %interface,
            "request rejected"
        );
    }

    (
        status,
        Json(ApiError {
            error: interface.user_message().to_string(),
            detail: interface.message().to_string(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}

/// Run failures carry their own status so clients can tell a bad payload
/// from an outage.
fn reject_run(error: RunError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        RunError::Payload(_) | RunError::PayloadShape => StatusCode::UNPROCESSABLE_ENTITY,
        RunError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        RunError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        RunError::SourceUnavailable(_) | RunError::WorkerPool(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let (_, Json(mut body)) = reject(error.into());
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        body.error = "The import payload could not be read as product records.".to_string();
    }
    (status, Json(body))
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}
