use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use shared::broker::TraceContext;
use shared::ApiError;
use tracing::{info_span, Instrument};

use crate::commands::{Application, ConfirmOutcome, ConfirmPayment, PaymentConfirmation};

#[derive(Clone)]
pub struct AppState {
    pub app: Application,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/webhook", post(handle_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(confirmation): Json<PaymentConfirmation>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let trace = TraceContext::from_http(&headers);
    let span = info_span!("payment_webhook", order_id = %confirmation.order_id, trace_id = %trace.trace_id());

    let outcome = state
        .app
        .commands
        .confirm_payment
        .handle(ConfirmPayment { confirmation, trace })
        .instrument(span)
        .await?;

    let status = match outcome {
        ConfirmOutcome::Published => "published",
        ConfirmOutcome::Ignored => "ignored",
    };
    Ok(Json(serde_json::json!({ "status": status })))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "payment-service"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::RecordingOrders;
    use crate::domain::InMemoryProcessor;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use shared::broker::{InMemoryBroker, Subscription, EVENT_ORDER_PAID};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn webhook(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn paid_webhook_fans_out_order_paid() {
        let broker = InMemoryBroker::new();
        let stock = Subscription::fan_out(EVENT_ORDER_PAID, "stock");
        let kitchen = Subscription::fan_out(EVENT_ORDER_PAID, "kitchen");
        broker.declare(&stock);
        broker.declare(&kitchen);
        let app = Application::new(
            Arc::new(InMemoryProcessor::new("http://pay.local")),
            Arc::new(RecordingOrders::default()),
            Arc::new(broker.clone()),
        );
        let router = create_router(AppState { app });

        let response = router
            .oneshot(webhook(serde_json::json!({
                "order_id": "o1",
                "customer_id": "c1",
                "payment_status": "paid",
                "items": [{"product_id": "p1", "quantity": 2, "price_id": "price_p1"}],
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(broker.queue_len(&stock.queue), 1);
        assert_eq!(broker.queue_len(&kitchen.queue), 1);
    }

    #[tokio::test]
    async fn webhook_without_order_id_is_bad_request() {
        let app = Application::new(
            Arc::new(InMemoryProcessor::new("http://pay.local")),
            Arc::new(RecordingOrders::default()),
            Arc::new(InMemoryBroker::new()),
        );
        let response = create_router(AppState { app })
            .oneshot(webhook(serde_json::json!({
                "order_id": "",
                "customer_id": "c1",
                "payment_status": "paid",
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn paid_webhook_without_items_is_bad_request() {
        let broker = InMemoryBroker::new();
        let stock = Subscription::fan_out(EVENT_ORDER_PAID, "stock");
        broker.declare(&stock);
        let app = Application::new(
            Arc::new(InMemoryProcessor::new("http://pay.local")),
            Arc::new(RecordingOrders::default()),
            Arc::new(broker.clone()),
        );
        let response = create_router(AppState { app })
            .oneshot(webhook(serde_json::json!({
                "order_id": "o1",
                "customer_id": "c1",
                "payment_status": "paid",
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(broker.queue_len(&stock.queue), 0);
    }
}
