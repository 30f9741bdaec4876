//! Contracts for calling other services, with HTTP/JSON implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::broker::TraceContext;
use crate::entity::{Item, ItemWithQuantity, Order};
use crate::error::{Classify, ErrorKind, ErrorResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockItemsRequest {
    pub items: Vec<ItemWithQuantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveStockResponse {
    pub items: Vec<Item>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{service} rejected the request ({status}): {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        kind: ErrorKind,
        message: String,
    },
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl Classify for ClientError {
    fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Rejected { kind, .. } => *kind,
            ClientError::Transport { .. } => ErrorKind::Unavailable,
        }
    }
}

#[async_trait]
pub trait StockService: Send + Sync {
    /// Reserves the items and returns them priced.
    async fn reserve_stock(&self, trace: &TraceContext, items: &[ItemWithQuantity]) -> Result<Vec<Item>, ClientError>;

    async fn confirm_stock_reservation(&self, trace: &TraceContext, items: &[ItemWithQuantity]) -> Result<(), ClientError>;
}

#[async_trait]
pub trait OrderService: Send + Sync {
    /// Submits the full desired state of an order; the order service decides
    /// whether the status transition is legal.
    async fn update_order(&self, trace: &TraceContext, order: &Order) -> Result<(), ClientError>;
}

const STOCK_SERVICE: &str = "stock-service";
const ORDER_SERVICE: &str = "order-service";

fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> ClientError {
    move |source| ClientError::Transport { service, source }
}

async fn check(service: &'static str, response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let (kind, message) = match response.json::<ErrorResponse>().await {
        Ok(body) => (body.kind, body.error),
        Err(_) => (ErrorKind::from_status(status), format!("HTTP {status}")),
    };
    Err(ClientError::Rejected {
        service,
        status,
        kind,
        message,
    })
}

#[derive(Debug, Clone)]
pub struct HttpStockClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpStockClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StockService for HttpStockClient {
    async fn reserve_stock(&self, trace: &TraceContext, items: &[ItemWithQuantity]) -> Result<Vec<Item>, ClientError> {
        let response = self
            .http
            .post(format!("{}/stock/reserve", self.base_url))
            .headers(trace.to_http_headers())
            .json(&StockItemsRequest { items: items.to_vec() })
            .send()
            .await
            .map_err(transport(STOCK_SERVICE))?;

        let body: ReserveStockResponse = check(STOCK_SERVICE, response)
            .await?
            .json()
            .await
            .map_err(transport(STOCK_SERVICE))?;
        Ok(body.items)
    }

    async fn confirm_stock_reservation(&self, trace: &TraceContext, items: &[ItemWithQuantity]) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/stock/confirm", self.base_url))
            .headers(trace.to_http_headers())
            .json(&StockItemsRequest { items: items.to_vec() })
            .send()
            .await
            .map_err(transport(STOCK_SERVICE))?;

        check(STOCK_SERVICE, response).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpOrderClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpOrderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OrderService for HttpOrderClient {
    async fn update_order(&self, trace: &TraceContext, order: &Order) -> Result<(), ClientError> {
        let response = self
            .http
            .put(format!("{}/orders/{}", self.base_url, order.id))
            .headers(trace.to_http_headers())
            .json(order)
            .send()
            .await
            .map_err(transport(ORDER_SERVICE))?;

        check(ORDER_SERVICE, response).await?;
        Ok(())
    }
}
