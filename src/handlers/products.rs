use crate::{
    auth::AdminUser,
    errors::ServiceError,
    handlers::common::{created_response, no_content_response, success_response},
    services::catalog::ProductInput,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
}

pub fn admin_products_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/products", get(list_all_products).post(create_product))
        .route("/admin/products/low-stock", get(low_stock))
        .route(
            "/admin/products/:id",
            put(update_product).delete(delete_product),
        )
}

/// Storefront listing
async fn list_products(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let products = state.services.catalog.list_available().await?;
    Ok(success_response(products))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.catalog.get(id).await?))
}

async fn list_all_products(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.catalog.list_all().await?))
}

#[derive(Debug, Deserialize)]
struct LowStockQuery {
    #[serde(default = "default_threshold")]
    threshold: i32,
}

fn default_threshold() -> i32 {
    5
}

async fn low_stock(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<LowStockQuery>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.catalog.low_stock(query.threshold).await?,
    ))
}

async fn create_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<ProductInput>,
) -> Result<Response, ServiceError> {
    let product = state.services.catalog.create(payload).await?;
    Ok(created_response(product))
}

async fn update_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProductInput>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.catalog.update(id, payload).await?,
    ))
}

async fn delete_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.catalog.delete(id).await?;
    Ok(no_content_response())
}
