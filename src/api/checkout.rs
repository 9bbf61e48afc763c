use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::checkout::flow::{CheckoutFlow, CheckoutOutcome, NewCheckout};
use crate::checkout::ledger::{BillingInterval, FulfillmentOp, PaymentKind};
use crate::middleware::error::{get_request_id_from_headers, json_error_response, ErrorResponse};
use crate::store::LedgerStore;

pub struct CheckoutApiState {
    pub flow: Arc<CheckoutFlow>,
    pub store: Arc<dyn LedgerStore>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub reference: Option<String>,
    pub price: String,
    pub currency: String,
    #[serde(default = "default_payment_type")]
    pub payment_type: String,
    pub frequency: Option<String>,
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_keys: HashMap<String, String>,
    pub email: String,
    pub callback_url: String,
    pub fulfillment: FulfillmentOp,
    pub meta: Option<JsonValue>,
}

fn default_payment_type() -> String {
    "onetime".to_string()
}

#[derive(Debug, Serialize)]
pub struct CheckoutStatusResponse {
    pub reference: String,
    pub provider: String,
    pub state: String,
    pub paid: bool,
    pub price: String,
    pub currency: String,
    pub payment_type: String,
    pub provider_subscription_id: Option<String>,
}

/// POST /api/checkouts
///
/// Always responds 200 with the uniform outcome shape; `status: 0` carries
/// the failure message and a safe redirect target.
pub async fn create_checkout(
    State(state): State<Arc<CheckoutApiState>>,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Json<CheckoutOutcome> {
    let failure =
        |message: String| Json(CheckoutOutcome::failure(state.flow.home_url(), message));

    let price = match BigDecimal::from_str(payload.price.trim()) {
        Ok(price) => price,
        Err(_) => return failure(format!("invalid price: {}", payload.price)),
    };
    let Some(payment_kind) = PaymentKind::parse(&payload.payment_type) else {
        return failure(format!("invalid payment_type: {}", payload.payment_type));
    };
    let frequency = match payload.frequency.as_deref() {
        Some(value) => match BillingInterval::parse(value) {
            Some(frequency) => Some(frequency),
            None => return failure(format!("invalid frequency: {}", value)),
        },
        None => None,
    };
    let provider = match state.flow.resolve_provider(payload.provider.as_deref()) {
        Ok(provider) => provider,
        Err(e) => return failure(e.user_message()),
    };

    info!(provider = %provider, "checkout requested");

    let outcome = state
        .flow
        .start(NewCheckout {
            reference: payload.reference,
            price,
            currency: payload.currency,
            payment_kind,
            frequency,
            provider,
            provider_keys: payload.provider_keys,
            email: payload.email,
            callback_url: payload.callback_url,
            fulfillment: payload.fulfillment,
            meta: payload.meta.unwrap_or_else(|| serde_json::json!({})),
        })
        .await;

    Json(outcome)
}

/// GET /api/checkouts/{reference}
pub async fn checkout_status(
    State(state): State<Arc<CheckoutApiState>>,
    Path(reference): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<Json<CheckoutStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let request_id = get_request_id_from_headers(&headers);

    let ledger = state
        .store
        .find_by_reference(&reference)
        .await
        .map_err(|e| {
            json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                request_id.clone(),
            )
        })?
        .ok_or_else(|| {
            json_error_response(StatusCode::NOT_FOUND, "unknown checkout", request_id.clone())
        })?;

    Ok(Json(CheckoutStatusResponse {
        reference: ledger.reference,
        provider: ledger.provider.to_string(),
        state: ledger.state.to_string(),
        paid: ledger.paid,
        price: ledger.price.to_string(),
        currency: ledger.currency,
        payment_type: ledger.payment_kind.as_str().to_string(),
        provider_subscription_id: ledger.provider_subscription_id,
    }))
}

/// POST /api/checkouts/{reference}/cancel
pub async fn cancel_checkout(
    State(state): State<Arc<CheckoutApiState>>,
    Path(reference): Path<String>,
) -> Json<CheckoutOutcome> {
    Json(state.flow.cancel(&reference).await)
}
