use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::services::webhook_processor::{WebhookProcessor, WebhookProcessorError};

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

/// POST /webhooks/{provider}
///
/// The raw body is passed through untouched; signature schemes cover the
/// exact bytes the provider sent.
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(provider): Path<String>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!(provider = %provider, "received webhook");

    let signature = signature_header(&provider, &headers);
    if signature.is_none() && provider != "flutterwave" {
        warn!(provider = %provider, "missing webhook signature");
        return (StatusCode::UNAUTHORIZED, "Missing signature").into_response();
    }

    match state
        .processor
        .process(&provider, signature.as_deref(), &body)
        .await
    {
        Ok(disposition) => {
            info!(provider = %provider, disposition = ?disposition, "webhook processed");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(WebhookProcessorError::InvalidSignature) => {
            warn!(provider = %provider, "invalid webhook signature");
            (StatusCode::UNAUTHORIZED, "Invalid signature").into_response()
        }
        Err(WebhookProcessorError::UnknownProvider(name)) => {
            warn!(provider = %name, "webhook for unknown provider");
            (StatusCode::NOT_FOUND, "Unknown provider").into_response()
        }
        Err(e) => {
            // Non-2xx so the provider redelivers once the fault clears.
            error!(provider = %provider, error = %e, "webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed").into_response()
        }
    }
}

fn signature_header(provider: &str, headers: &axum::http::HeaderMap) -> Option<String> {
    let name = match provider {
        "stripe" => "stripe-signature",
        "paystack" => "x-paystack-signature",
        "flutterwave" => "verif-hash",
        "razorpay" => "x-razorpay-signature",
        _ => return None,
    };
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_header_names_match_provider_documentation() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("stripe-signature", "t=1,v1=abc".parse().unwrap());
        headers.insert("x-paystack-signature", "deadbeef".parse().unwrap());
        headers.insert("verif-hash", "hash".parse().unwrap());
        headers.insert("x-razorpay-signature", "cafe".parse().unwrap());

        assert_eq!(
            signature_header("stripe", &headers).as_deref(),
            Some("t=1,v1=abc")
        );
        assert_eq!(
            signature_header("paystack", &headers).as_deref(),
            Some("deadbeef")
        );
        assert_eq!(
            signature_header("flutterwave", &headers).as_deref(),
            Some("hash")
        );
        assert_eq!(
            signature_header("razorpay", &headers).as_deref(),
            Some("cafe")
        );
        assert_eq!(signature_header("paypal", &headers), None);
    }
}
