use crate::checkout::amount::to_minor_units;
use crate::checkout::ledger::{BillingInterval, CheckoutLedger};
use crate::providers::error::{PaymentError, PaymentResult};
use crate::providers::provider::PaymentProvider;
use crate::providers::types::{
    CheckoutSession, FulfillmentEvent, ProviderName, VerifyOutcome, WebhookOutcome,
    WebhookVerification,
};
use crate::providers::utils::{hmac_sha256_hex, secure_eq, ApiAuth, PaymentHttpClient};
use crate::providers::verify_return_url;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Replay window for signed webhook events.
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub webhook_tolerance_secs: i64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            return_url: verify_return_url("stripe"),
            timeout_secs: 30,
            max_retries: 2,
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
                field: Some("STRIPE_SECRET_KEY".to_string()),
            })?;
        let webhook_secret =
            std::env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| PaymentError::ValidationError {
                message: "STRIPE_WEBHOOK_SECRET environment variable is required".to_string(),
                field: Some("STRIPE_WEBHOOK_SECRET".to_string()),
            })?;

        Ok(Self {
            secret_key,
            webhook_secret,
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            return_url: verify_return_url("stripe"),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("STRIPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
            webhook_tolerance_secs: std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(DEFAULT_WEBHOOK_TOLERANCE_SECS),
        })
    }

    /// Apply per-checkout credential overrides (multi-tenant keys).
    pub fn apply_overrides(&mut self, keys: &HashMap<String, String>) {
        if let Some(secret) = keys.get("secret_key") {
            self.secret_key = secret.clone();
        }
        if let Some(secret) = keys.get("webhook_secret") {
            self.webhook_secret = secret.clone();
        }
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    http: PaymentHttpClient,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> ApiAuth<'_> {
        ApiAuth::Bearer(&self.config.secret_key)
    }

    fn interval(frequency: BillingInterval) -> &'static str {
        match frequency {
            BillingInterval::Monthly => "month",
            BillingInterval::Yearly => "year",
        }
    }

    fn field(name: &str, value: impl Into<String>) -> (String, String) {
        (name.to_string(), value.into())
    }

    /// Find the price carrying this plan key, or create it. Lookup keys
    /// are unique per Stripe account, so identical recurring checkouts
    /// converge on one price object.
    async fn resolve_price(
        &self,
        ledger: &CheckoutLedger,
        amount_minor: i64,
        plan_key: &str,
    ) -> PaymentResult<String> {
        let frequency = ledger.frequency.ok_or(PaymentError::ValidationError {
            message: "recurring checkout requires a frequency".to_string(),
            field: Some("frequency".to_string()),
        })?;

        let existing: StripeList<StripePrice> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &format!(
                    "{}?lookup_keys[]={}&limit=1",
                    self.endpoint("/v1/prices"),
                    plan_key
                ),
                self.auth(),
                None,
            )
            .await?;
        if let Some(price) = existing.data.into_iter().next() {
            return Ok(price.id);
        }

        let form = vec![
            Self::field("currency", ledger.currency.to_lowercase()),
            Self::field("unit_amount", amount_minor.to_string()),
            Self::field("recurring[interval]", Self::interval(frequency)),
            Self::field("lookup_key", plan_key),
            Self::field("product_data[name]", ledger.description()),
        ];
        let created: StripePrice = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/prices"),
                self.auth(),
                &form,
            )
            .await?;
        info!(plan_key = %plan_key, price_id = %created.id, "stripe price created");
        Ok(created.id)
    }

    fn success_url(&self, reference: &str) -> String {
        format!("{}?sxref={}", self.config.return_url, reference)
    }

    fn cancel_url(&self, reference: &str) -> String {
        format!("{}?sxref={}&cancelled=1", self.config.return_url, reference)
    }
}

#[async_trait]
impl PaymentProvider for StripeGateway {
    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "CAD", "AUD", "JPY", "NGN", "INR", "KES", "ZAR"]
    }

    async fn create_checkout(&self, ledger: &CheckoutLedger) -> PaymentResult<CheckoutSession> {
        let amount_minor = to_minor_units(&ledger.price, &ledger.currency)?;

        let mut form = vec![
            Self::field("success_url", self.success_url(&ledger.reference)),
            Self::field("cancel_url", self.cancel_url(&ledger.reference)),
            Self::field("customer_email", &ledger.email),
            Self::field("client_reference_id", &ledger.reference),
            Self::field("metadata[sxref]", &ledger.reference),
            Self::field("line_items[0][quantity]", "1"),
        ];

        match ledger.plan_key() {
            Some(plan_key) => {
                let price_id = self.resolve_price(ledger, amount_minor, &plan_key).await?;
                form.push(Self::field("mode", "subscription"));
                form.push(Self::field("line_items[0][price]", price_id));
                form.push(Self::field(
                    "subscription_data[metadata][sxref]",
                    &ledger.reference,
                ));
            }
            None => {
                form.push(Self::field("mode", "payment"));
                form.push(Self::field(
                    "line_items[0][price_data][currency]",
                    ledger.currency.to_lowercase(),
                ));
                form.push(Self::field(
                    "line_items[0][price_data][unit_amount]",
                    amount_minor.to_string(),
                ));
                form.push(Self::field(
                    "line_items[0][price_data][product_data][name]",
                    ledger.description(),
                ));
            }
        }

        let session: StripeCheckoutSessionData = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/checkout/sessions"),
                self.auth(),
                &form,
            )
            .await?;

        let redirect_url = session.url.ok_or(PaymentError::ProviderError {
            provider: "stripe".to_string(),
            message: "checkout session has no hosted URL".to_string(),
            provider_code: None,
            retryable: false,
        })?;

        info!(reference = %ledger.reference, session_id = %session.id, "stripe checkout created");

        Ok(CheckoutSession {
            redirect_url,
            provider_session_id: Some(session.id),
        })
    }

    async fn verify(
        &self,
        ledger: &CheckoutLedger,
        _params: &HashMap<String, String>,
    ) -> PaymentResult<VerifyOutcome> {
        let session_id =
            ledger
                .provider_session_id
                .as_deref()
                .ok_or(PaymentError::ValidationError {
                    message: "ledger has no stripe session to verify".to_string(),
                    field: Some("provider_session_id".to_string()),
                })?;

        let session: StripeCheckoutSessionData = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/checkout/sessions/{}", session_id)),
                self.auth(),
                None,
            )
            .await?;

        let paid = session.payment_status.as_deref() == Some("paid");
        let failed = session.status.as_deref() == Some("expired");

        Ok(VerifyOutcome {
            paid,
            failed,
            provider_subscription_id: session.subscription,
            failure_reason: failed.then(|| "checkout session expired".to_string()),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerification> {
        let header = match SignatureHeader::parse(signature) {
            Some(header) => header,
            None => {
                return Ok(WebhookVerification {
                    valid: false,
                    reason: Some("malformed Stripe-Signature header".to_string()),
                })
            }
        };

        let age = chrono::Utc::now().timestamp() - header.timestamp;
        if age.abs() > self.config.webhook_tolerance_secs {
            return Ok(WebhookVerification {
                valid: false,
                reason: Some(format!(
                    "webhook timestamp outside tolerance ({}s old)",
                    age
                )),
            });
        }

        let signed_payload = format!(
            "{}.{}",
            header.timestamp,
            String::from_utf8_lossy(payload)
        );
        let expected = hmac_sha256_hex(signed_payload.as_bytes(), &self.config.webhook_secret);
        let valid = !expected.is_empty()
            && header
                .signatures
                .iter()
                .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()));

        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid stripe signature".to_string())
            },
        })
    }

    async fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookOutcome> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let object = parsed
            .get("data")
            .and_then(|v| v.get("object"))
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let (reference, subscription_id) = match event_type.as_str() {
            "checkout.session.completed" => {
                let reference = object
                    .get("metadata")
                    .and_then(|m| m.get("sxref"))
                    .and_then(|v| v.as_str())
                    .or_else(|| object.get("client_reference_id").and_then(|v| v.as_str()))
                    .map(|v| v.to_string());
                let subscription = object
                    .get("subscription")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string());
                (reference, subscription)
            }
            "invoice.paid" => {
                let reference = object
                    .get("subscription_details")
                    .and_then(|d| d.get("metadata"))
                    .and_then(|m| m.get("sxref"))
                    .and_then(|v| v.as_str())
                    .or_else(|| {
                        object
                            .get("metadata")
                            .and_then(|m| m.get("sxref"))
                            .and_then(|v| v.as_str())
                    })
                    .map(|v| v.to_string());
                let subscription = object
                    .get("subscription")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string());
                (reference, subscription)
            }
            _ => (None, None),
        };

        match reference {
            Some(reference) => Ok(WebhookOutcome::Fulfillment(FulfillmentEvent {
                provider: ProviderName::Stripe,
                reference,
                provider_subscription_id: subscription_id,
            })),
            None => Ok(WebhookOutcome::Ignored { event_type }),
        }
    }

    async fn cancel_subscription(&self, ledger: &CheckoutLedger) -> PaymentResult<()> {
        let Some(subscription_id) = ledger.provider_subscription_id.as_deref() else {
            return Ok(());
        };

        let _cancelled: StripeSubscription = self
            .http
            .request_json(
                reqwest::Method::DELETE,
                &self.endpoint(&format!("/v1/subscriptions/{}", subscription_id)),
                self.auth(),
                None,
            )
            .await?;
        info!(
            reference = %ledger.reference,
            subscription_id = %subscription_id,
            "stripe subscription cancelled"
        );
        Ok(())
    }
}

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

impl SignatureHeader {
    fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }
        match (timestamp, signatures.is_empty()) {
            (Some(timestamp), false) => Some(Self {
                timestamp,
                signatures,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionData {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    #[allow(dead_code)]
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            base_url: "https://api.stripe.com".to_string(),
            return_url: "https://checkout.linkpage.example/pay/stripe/verify".to_string(),
            timeout_secs: 5,
            max_retries: 1,
            webhook_tolerance_secs: 300,
        })
        .expect("gateway init should succeed")
    }

    fn signed_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        format!(
            "t={},v1={}",
            timestamp,
            hmac_sha256_hex(signed_payload.as_bytes(), secret)
        )
    }

    #[test]
    fn webhook_signature_accepts_fresh_valid_header() {
        let gateway = gateway();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = signed_header(payload, "whsec_test", chrono::Utc::now().timestamp());
        let result = gateway
            .verify_webhook(payload, &header)
            .expect("verification should not error");
        assert!(result.valid);
    }

    #[test]
    fn webhook_signature_rejects_wrong_secret() {
        let gateway = gateway();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = signed_header(payload, "whsec_other", chrono::Utc::now().timestamp());
        let result = gateway
            .verify_webhook(payload, &header)
            .expect("verification should not error");
        assert!(!result.valid);
    }

    #[test]
    fn webhook_signature_rejects_stale_timestamp() {
        let gateway = gateway();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let stale = chrono::Utc::now().timestamp() - 3600;
        let header = signed_header(payload, "whsec_test", stale);
        let result = gateway
            .verify_webhook(payload, &header)
            .expect("verification should not error");
        assert!(!result.valid);
    }

    #[test]
    fn webhook_signature_rejects_malformed_header() {
        let gateway = gateway();
        let result = gateway
            .verify_webhook(b"{}", "not-a-signature-header")
            .expect("verification should not error");
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn session_completed_event_maps_to_fulfillment() {
        let gateway = gateway();
        let payload = br#"{
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_1",
                "client_reference_id": "sx_abc123",
                "metadata": {"sxref": "sx_abc123"},
                "subscription": "sub_123"
            }}
        }"#;
        let outcome = gateway
            .parse_webhook_event(payload)
            .await
            .expect("parse should succeed");
        match outcome {
            WebhookOutcome::Fulfillment(event) => {
                assert_eq!(event.reference, "sx_abc123");
                assert_eq!(event.provider_subscription_id.as_deref(), Some("sub_123"));
            }
            other => panic!("expected fulfillment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invoice_paid_event_reads_subscription_metadata() {
        let gateway = gateway();
        let payload = br#"{
            "type": "invoice.paid",
            "data": {"object": {
                "subscription": "sub_456",
                "subscription_details": {"metadata": {"sxref": "sx_recurring"}}
            }}
        }"#;
        let outcome = gateway
            .parse_webhook_event(payload)
            .await
            .expect("parse should succeed");
        match outcome {
            WebhookOutcome::Fulfillment(event) => {
                assert_eq!(event.reference, "sx_recurring");
                assert_eq!(event.provider_subscription_id.as_deref(), Some("sub_456"));
            }
            other => panic!("expected fulfillment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unrelated_events_are_ignored() {
        let gateway = gateway();
        let payload = br#"{"type":"customer.created","data":{"object":{}}}"#;
        let outcome = gateway
            .parse_webhook_event(payload)
            .await
            .expect("parse should succeed");
        assert!(matches!(outcome, WebhookOutcome::Ignored { event_type } if event_type == "customer.created"));
    }

    #[test]
    fn signature_header_parses_multiple_candidates() {
        let header = SignatureHeader::parse("t=1700000000,v1=aaa,v1=bbb,v0=ccc")
            .expect("header should parse");
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.signatures, vec!["aaa".to_string(), "bbb".to_string()]);
        assert!(SignatureHeader::parse("v1=aaa").is_none());
        assert!(SignatureHeader::parse("t=123").is_none());
    }
}
