use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;
use crate::models::Payment;
use crate::publisher::ResultPublisher;
use crate::service::{InitiatePayment, PaymentService, WebhookNotification, WebhookOutcome};
use crate::store::PaymentStore;

pub struct AppState<S, P> {
    pub service: Arc<PaymentService<S, P>>,
}

impl<S, P> Clone for AppState<S, P> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitiatePaymentResponse {
    pub transaction_ref: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    pub applied: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = match &self {
            PaymentError::InvalidAmount
            | PaymentError::MissingPaymentMethod
            | PaymentError::NonTerminalStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            PaymentError::Storage(_) | PaymentError::Publish(_) => {
                tracing::error!(error = %self, "payment request failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn create_router<S, P>(state: AppState<S, P>) -> Router
where
    S: PaymentStore + 'static,
    P: ResultPublisher + 'static,
{
    Router::new()
        .route("/payments", post(initiate::<S, P>))
        .route("/payments/webhook", post(webhook::<S, P>))
        .route("/payments/:transaction_ref", get(show::<S, P>))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn initiate<S, P>(
    State(state): State<AppState<S, P>>,
    Json(request): Json<InitiatePayment>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), PaymentError>
where
    S: PaymentStore,
    P: ResultPublisher,
{
    let payment = state.service.initiate(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(InitiatePaymentResponse {
            transaction_ref: payment.transaction_ref,
            status: payment.status,
        }),
    ))
}

/// Callback endpoint for the card processor. Delivery is at-least-once; a
/// repeated delivery answers 200 with `applied: false`.
async fn webhook<S, P>(
    State(state): State<AppState<S, P>>,
    Json(notification): Json<WebhookNotification>,
) -> Result<Json<WebhookResponse>, PaymentError>
where
    S: PaymentStore,
    P: ResultPublisher,
{
    let outcome = state.service.handle_webhook(notification).await?;
    let applied = matches!(outcome, WebhookOutcome::Applied(_));
    Ok(Json(WebhookResponse {
        status: outcome.payment().status.clone(),
        applied,
    }))
}

async fn show<S, P>(
    State(state): State<AppState<S, P>>,
    Path(transaction_ref): Path<String>,
) -> Result<Json<Payment>, PaymentError>
where
    S: PaymentStore,
    P: ResultPublisher,
{
    state
        .service
        .store()
        .find_by_ref(&transaction_ref)
        .await?
        .map(Json)
        .ok_or(PaymentError::UnknownTransaction(transaction_ref))
}

pub async fn health_check() -> &'static str {
    "OK"
}
