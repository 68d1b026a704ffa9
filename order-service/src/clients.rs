//! HTTP clients for the services order-service depends on.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{
    InventoryLedger, InventoryLevel, LedgerError, ReservationRequest, ReservationToken,
    ResolveOutcome, RestockRequest,
};
use uuid::Uuid;

use crate::collaborators::{PaymentGateway, ProductCatalog, UserDirectory};
use crate::error::CollaboratorError;

fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Inventory ledger served by inventory-service.
#[derive(Clone)]
pub struct HttpInventoryLedger {
    http_client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ResolveBody {
    outcome: ResolveOutcome,
}

impl HttpInventoryLedger {
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }

    /// Decodes a success body, or the `LedgerError` the service returned.
    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, LedgerError> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(LedgerError::unavailable);
        }
        let body = response.text().await.map_err(LedgerError::unavailable)?;
        Err(serde_json::from_str::<LedgerError>(&body).unwrap_or_else(|_| {
            LedgerError::unavailable(format!("inventory-service answered {status}: {body}"))
        }))
    }

    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LedgerError> {
        let response = self
            .http_client
            .post(join(&self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(LedgerError::unavailable)?;
        Self::decode(response).await
    }
}

#[async_trait]
impl InventoryLedger for HttpInventoryLedger {
    async fn reserve(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ReservationToken, LedgerError> {
        self.post(
            "/reservations",
            &ReservationRequest {
                order_id,
                product_id,
                quantity,
            },
        )
        .await
    }

    async fn release(&self, token: &ReservationToken) -> Result<ResolveOutcome, LedgerError> {
        let body: ResolveBody = self.post("/reservations/release", token).await?;
        Ok(body.outcome)
    }

    async fn confirm_deduct(&self, token: &ReservationToken) -> Result<ResolveOutcome, LedgerError> {
        let body: ResolveBody = self.post("/reservations/confirm", token).await?;
        Ok(body.outcome)
    }

    async fn restock(&self, product_id: Uuid, quantity: i32) -> Result<InventoryLevel, LedgerError> {
        let response = self
            .http_client
            .put(join(&self.base_url, &format!("/inventory/{product_id}")))
            .json(&RestockRequest { quantity })
            .send()
            .await
            .map_err(LedgerError::unavailable)?;
        Self::decode(response).await
    }

    async fn level(&self, product_id: Uuid) -> Result<InventoryLevel, LedgerError> {
        let response = self
            .http_client
            .get(join(&self.base_url, &format!("/inventory/{product_id}")))
            .send()
            .await
            .map_err(LedgerError::unavailable)?;
        Self::decode(response).await
    }
}

fn unexpected(service: &str, status: StatusCode) -> CollaboratorError {
    if status.is_server_error() {
        CollaboratorError::Unavailable(format!("{service} answered {status}"))
    } else {
        CollaboratorError::Rejected(format!("{service} answered {status}"))
    }
}

#[derive(Deserialize)]
struct ProductBody {
    price: BigDecimal,
}

#[derive(Clone)]
pub struct HttpProductCatalog {
    http_client: Client,
    base_url: String,
}

impl HttpProductCatalog {
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    async fn price(&self, product_id: Uuid) -> Result<BigDecimal, CollaboratorError> {
        let response = self
            .http_client
            .get(join(&self.base_url, &format!("/products/{product_id}")))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(CollaboratorError::NotFound),
            status if status.is_success() => Ok(response.json::<ProductBody>().await?.price),
            status => Err(unexpected("product catalog", status)),
        }
    }
}

#[derive(Clone)]
pub struct HttpUserDirectory {
    http_client: Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn exists(&self, user_id: Uuid) -> Result<bool, CollaboratorError> {
        let response = self
            .http_client
            .get(join(&self.base_url, &format!("/users/{user_id}")))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(unexpected("user directory", status)),
        }
    }
}

#[derive(Serialize)]
struct InitiateBody<'a> {
    order_id: Uuid,
    amount: &'a BigDecimal,
    payment_method: &'a str,
}

#[derive(Deserialize)]
struct InitiatedBody {
    transaction_ref: String,
}

/// Client for payment-service `POST /payments`.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http_client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate(
        &self,
        order_id: Uuid,
        amount: &BigDecimal,
        payment_method: &str,
    ) -> Result<String, CollaboratorError> {
        let response = self
            .http_client
            .post(join(&self.base_url, "/payments"))
            .json(&InitiateBody {
                order_id,
                amount,
                payment_method,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(unexpected("payment-service", status));
        }
        Ok(response.json::<InitiatedBody>().await?.transaction_ref)
    }
}
