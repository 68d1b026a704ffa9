use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{
    InventoryLedger, InventoryLevel, LedgerError, ReservationRequest, ReservationToken,
    ResolveOutcome, RestockRequest,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn InventoryLedger>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub outcome: ResolveOutcome,
}

/// Ledger errors are returned verbatim as the JSON body so remote ledgers can
/// reconstruct them.
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::InvalidQuantity { .. } | LedgerError::CapacityExceeded { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            LedgerError::ProductNotFound { .. } => StatusCode::NOT_FOUND,
            LedgerError::InsufficientStock { .. } | LedgerError::ReservationResolved { .. } => {
                StatusCode::CONFLICT
            }
            LedgerError::Unavailable { reason } => {
                tracing::error!(%reason, "inventory storage failure");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(self.0)).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/reservations", post(reserve))
        .route("/reservations/release", post(release))
        .route("/reservations/confirm", post(confirm))
        .route("/inventory/:product_id", get(level).put(restock))
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

async fn reserve(
    State(state): State<AppState>,
    Json(request): Json<ReservationRequest>,
) -> Result<(StatusCode, Json<ReservationToken>), ApiError> {
    let token = state
        .ledger
        .reserve(request.order_id, request.product_id, request.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(token)))
}

async fn release(
    State(state): State<AppState>,
    Json(token): Json<ReservationToken>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let outcome = state.ledger.release(&token).await?;
    Ok(Json(ResolveResponse { outcome }))
}

async fn confirm(
    State(state): State<AppState>,
    Json(token): Json<ReservationToken>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let outcome = state.ledger.confirm_deduct(&token).await?;
    Ok(Json(ResolveResponse { outcome }))
}

async fn restock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<RestockRequest>,
) -> Result<Json<InventoryLevel>, ApiError> {
    let level = state.ledger.restock(product_id, request.quantity).await?;
    Ok(Json(level))
}

async fn level(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<InventoryLevel>, ApiError> {
    Ok(Json(state.ledger.level(product_id).await?))
}

pub async fn health_check() -> &'static str {
    "OK"
}
