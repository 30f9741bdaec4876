use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::broker::TraceContext;
use shared::{ApiError, ErrorKind, ItemWithQuantity, Order};
use tracing::{info_span, Instrument};

use crate::commands::{Application, CreateOrder, GetCustomerOrder, UpdateOrder};

#[derive(Clone)]
pub struct AppState {
    pub app: Application,
    /// Where the customer lands after checkout.
    pub success_url_base: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<ItemWithQuantity>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub customer_id: String,
    pub order_id: String,
    pub redirect_url: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/customers/:customer_id/orders", post(create_order))
        .route("/customers/:customer_id/orders/:order_id", get(get_customer_order))
        .route("/orders/:order_id", put(update_order))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, ApiError> {
    let trace = TraceContext::from_http(&headers);
    let span = info_span!("create_order", customer_id = %customer_id, trace_id = %trace.trace_id());

    let result = state
        .app
        .commands
        .create_order
        .handle(CreateOrder {
            customer_id: customer_id.clone(),
            items: request.items,
            trace,
        })
        .instrument(span)
        .await?;

    let redirect_url = format!(
        "{}/success?customer_id={}&order_id={}",
        state.success_url_base.trim_end_matches('/'),
        customer_id,
        result.order_id
    );
    Ok(Json(CreateOrderResponse {
        customer_id,
        order_id: result.order_id,
        redirect_url,
    }))
}

pub async fn get_customer_order(
    State(state): State<AppState>,
    Path((customer_id, order_id)): Path<(String, String)>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .app
        .queries
        .get_customer_order
        .handle(GetCustomerOrder { order_id, customer_id })
        .await?;
    Ok(Json(order))
}

pub async fn update_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
    Json(order): Json<Order>,
) -> Result<Json<Order>, ApiError> {
    if order.id != order_id {
        return Err(ApiError::new(
            ErrorKind::Validation,
            format!("order id {} in body does not match path {}", order.id, order_id),
        ));
    }

    let trace = TraceContext::from_http(&headers);
    let updated = state
        .app
        .commands
        .update_order
        .handle(UpdateOrder { order })
        .instrument(info_span!("update_order", order_id = %order_id, trace_id = %trace.trace_id()))
        .await?;
    Ok(Json(updated))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "order-service"
    }))
}
