use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::PaymentResult;
use uuid::Uuid;

use crate::checkout::{CheckoutOrchestrator, CheckoutReceipt, CheckoutRequest, Resolution};
use crate::error::CheckoutError;
use crate::order::Order;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CheckoutOrchestrator>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolutionResponse {
    pub order: Order,
    pub applied: bool,
}

impl From<Resolution> for ResolutionResponse {
    fn from(resolution: Resolution) -> Self {
        let applied = resolution.is_applied();
        Self {
            order: resolution.into_order(),
            applied,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<i32>,
}

pub struct ApiError(pub CheckoutError);

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            CheckoutError::Validation(_)
            | CheckoutError::UserNotFound(_)
            | CheckoutError::ProductNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CheckoutError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            CheckoutError::InsufficientStock { .. } => StatusCode::CONFLICT,
            CheckoutError::InvalidTransition { order_id, actual, to } => {
                tracing::error!(%order_id, %actual, %to, "rejected order transition");
                StatusCode::CONFLICT
            }
            CheckoutError::ServiceUnavailable { service, reason } => {
                tracing::warn!(service, %reason, "dependency unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
            CheckoutError::Inventory(_) | CheckoutError::Store(_) => {
                tracing::error!(error = %err, "order request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut body = ErrorResponse {
            error: err.to_string(),
            product_id: None,
            requested: None,
            available: None,
            shortfall: err.shortfall(),
        };
        if let CheckoutError::InsufficientStock {
            product_id,
            requested,
            available,
        } = err
        {
            body.product_id = Some(product_id);
            body.requested = Some(requested);
            body.available = Some(available);
        }
        (status, Json(body)).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:order_id", get(show_order))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/orders/:order_id/ship", post(ship_order))
        .route("/orders/:order_id/deliver", post(deliver_order))
        .route("/orders/:order_id/return", post(return_order))
        .route("/payment-results", post(payment_result))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let receipt = state.orchestrator.checkout(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn show_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orchestrator.order(order_id).await?))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ResolutionResponse>, ApiError> {
    Ok(Json(state.orchestrator.cancel(order_id).await?.into()))
}

async fn ship_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orchestrator.ship(order_id).await?))
}

async fn deliver_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orchestrator.deliver(order_id).await?))
}

async fn return_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orchestrator.mark_returned(order_id).await?))
}

/// Direct delivery of a payment outcome, for deployments without the broker.
async fn payment_result(
    State(state): State<AppState>,
    Json(result): Json<PaymentResult>,
) -> Result<Json<ResolutionResponse>, ApiError> {
    Ok(Json(state.orchestrator.on_payment_result(result).await?.into()))
}

pub async fn health_check() -> &'static str {
    "OK"
}
