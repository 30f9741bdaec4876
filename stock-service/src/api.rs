use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use shared::broker::TraceContext;
use shared::client::{ReserveStockResponse, StockItemsRequest};
use shared::ApiError;
use tracing::{info_span, Instrument};

use crate::commands::{Application, ConfirmStockReservation, GetStock, ReserveStock};
use crate::domain::StockRecord;

#[derive(Clone)]
pub struct AppState {
    pub app: Application,
}

#[derive(Debug, Deserialize)]
pub struct GetStockParams {
    /// Comma separated product ids.
    pub ids: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/stock", get(get_stock))
        .route("/stock/reserve", post(reserve_stock))
        .route("/stock/confirm", post(confirm_stock_reservation))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn reserve_stock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StockItemsRequest>,
) -> Result<Json<ReserveStockResponse>, ApiError> {
    let trace = TraceContext::from_http(&headers);
    let items = state
        .app
        .commands
        .reserve_stock
        .handle(ReserveStock { items: request.items })
        .instrument(info_span!("reserve_stock", trace_id = %trace.trace_id()))
        .await?;

    Ok(Json(ReserveStockResponse { items }))
}

pub async fn confirm_stock_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StockItemsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let trace = TraceContext::from_http(&headers);
    state
        .app
        .commands
        .confirm_stock_reservation
        .handle(ConfirmStockReservation { items: request.items })
        .instrument(info_span!("confirm_stock_reservation", trace_id = %trace.trace_id()))
        .await?;

    Ok(Json(serde_json::json!({ "status": "confirmed" })))
}

pub async fn get_stock(
    State(state): State<AppState>,
    Query(params): Query<GetStockParams>,
) -> Result<Json<Vec<StockRecord>>, ApiError> {
    let product_ids = params
        .ids
        .split(',')
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    let records = state.app.queries.get_stock.handle(GetStock { product_ids }).await?;
    Ok(Json(records))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "stock-service"
    }))
}
