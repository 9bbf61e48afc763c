use crate::checkout::amount::to_minor_units;
use crate::checkout::ledger::{BillingInterval, CheckoutLedger};
use crate::providers::error::{PaymentError, PaymentResult};
use crate::providers::provider::PaymentProvider;
use crate::providers::types::{
    CheckoutSession, FulfillmentEvent, ProviderName, VerifyOutcome, WebhookOutcome,
    WebhookVerification,
};
use crate::providers::utils::{verify_hmac_sha512_hex, ApiAuth, PaymentHttpClient};
use crate::providers::verify_return_url;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            return_url: verify_return_url("paystack"),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            return_url: verify_return_url("paystack"),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            secret_key,
        })
    }

    pub fn apply_overrides(&mut self, keys: &HashMap<String, String>) {
        if let Some(secret) = keys.get("secret_key") {
            self.secret_key = secret.clone();
        }
        if let Some(secret) = keys.get("webhook_secret") {
            self.webhook_secret = Some(secret.clone());
        }
    }
}

pub struct PaystackGateway {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> ApiAuth<'_> {
        ApiAuth::Bearer(&self.config.secret_key)
    }

    fn interval(frequency: BillingInterval) -> &'static str {
        match frequency {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "annually",
        }
    }

    fn provider_failure(message: String) -> PaymentError {
        PaymentError::ProviderError {
            provider: "paystack".to_string(),
            message,
            provider_code: None,
            retryable: false,
        }
    }

    /// Find a plan matching (amount, currency, interval), or create one.
    async fn resolve_plan(
        &self,
        ledger: &CheckoutLedger,
        amount_minor: i64,
        plan_key: &str,
    ) -> PaymentResult<String> {
        let frequency = ledger.frequency.ok_or(PaymentError::ValidationError {
            message: "recurring checkout requires a frequency".to_string(),
            field: Some("frequency".to_string()),
        })?;
        let interval = Self::interval(frequency);

        let existing: PaystackEnvelope<Vec<PaystackPlanData>> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &format!(
                    "{}?interval={}&amount={}",
                    self.endpoint("/plan"),
                    interval,
                    amount_minor
                ),
                self.auth(),
                None,
            )
            .await?;
        if !existing.status {
            return Err(Self::provider_failure(existing.message));
        }
        if let Some(plan) = existing.data.into_iter().find(|plan| {
            plan.amount == amount_minor
                && plan.interval == interval
                && plan.currency.eq_ignore_ascii_case(&ledger.currency)
        }) {
            return Ok(plan.plan_code);
        }

        let payload = serde_json::json!({
            "name": plan_key,
            "amount": amount_minor,
            "interval": interval,
            "currency": ledger.currency,
        });
        let created: PaystackEnvelope<PaystackPlanData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/plan"),
                self.auth(),
                Some(&payload),
            )
            .await?;
        if !created.status {
            return Err(Self::provider_failure(created.message));
        }
        info!(plan_key = %plan_key, plan_code = %created.data.plan_code, "paystack plan created");
        Ok(created.data.plan_code)
    }
}

#[async_trait]
impl PaymentProvider for PaystackGateway {
    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["NGN", "GHS", "ZAR", "KES", "USD"]
    }

    async fn create_checkout(&self, ledger: &CheckoutLedger) -> PaymentResult<CheckoutSession> {
        let amount_minor = to_minor_units(&ledger.price, &ledger.currency)?;

        let mut payload = serde_json::json!({
            "email": ledger.email,
            "amount": amount_minor,
            "currency": ledger.currency,
            "reference": ledger.reference,
            "callback_url": format!("{}?sxref={}", self.config.return_url, ledger.reference),
            "metadata": {
                "sxref": ledger.reference,
                "title": ledger.description(),
            },
        });

        if let Some(plan_key) = ledger.plan_key() {
            let plan_code = self.resolve_plan(ledger, amount_minor, &plan_key).await?;
            payload["plan"] = serde_json::json!(plan_code);
        }

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                self.auth(),
                Some(&payload),
            )
            .await?;
        if !raw.status {
            return Err(Self::provider_failure(raw.message));
        }

        info!(reference = %ledger.reference, "paystack checkout created");

        Ok(CheckoutSession {
            redirect_url: raw.data.authorization_url,
            provider_session_id: Some(raw.data.reference),
        })
    }

    async fn verify(
        &self,
        ledger: &CheckoutLedger,
        _params: &HashMap<String, String>,
    ) -> PaymentResult<VerifyOutcome> {
        let raw: PaystackEnvelope<PaystackVerifyData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", ledger.reference)),
                self.auth(),
                None,
            )
            .await?;
        if !raw.status {
            return Err(Self::provider_failure(raw.message));
        }

        let paid = raw.data.status == "success";
        let failed = matches!(raw.data.status.as_str(), "failed" | "abandoned" | "reversed");

        Ok(VerifyOutcome {
            paid,
            failed,
            provider_subscription_id: raw.data.subscription_code,
            failure_reason: failed.then(|| {
                raw.data
                    .gateway_response
                    .unwrap_or_else(|| "payment not successful".to_string())
            }),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerification> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        let valid = verify_hmac_sha512_hex(payload, secret, signature);
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid paystack signature".to_string())
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
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        if event_type != "charge.success" {
            return Ok(WebhookOutcome::Ignored { event_type });
        }

        let data = parsed
            .get("data")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let reference = data
            .get("reference")
            .and_then(|v| v.as_str())
            .or_else(|| {
                data.get("metadata")
                    .and_then(|m| m.get("sxref"))
                    .and_then(|v| v.as_str())
            })
            .map(|v| v.to_string());

        match reference {
            Some(reference) => Ok(WebhookOutcome::Fulfillment(FulfillmentEvent {
                provider: ProviderName::Paystack,
                reference,
                provider_subscription_id: data
                    .get("subscription_code")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string()),
            })),
            None => Ok(WebhookOutcome::Ignored { event_type }),
        }
    }

    async fn cancel_subscription(&self, ledger: &CheckoutLedger) -> PaymentResult<()> {
        let Some(subscription_code) = ledger.provider_subscription_id.as_deref() else {
            return Ok(());
        };

        // Disabling needs the subscription's email token, which only the
        // fetch endpoint returns.
        let subscription: PaystackEnvelope<PaystackSubscriptionData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/subscription/{}", subscription_code)),
                self.auth(),
                None,
            )
            .await?;
        if !subscription.status {
            return Err(Self::provider_failure(subscription.message));
        }

        let payload = serde_json::json!({
            "code": subscription_code,
            "token": subscription.data.email_token,
        });
        let disabled: PaystackEnvelope<JsonValue> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/subscription/disable"),
                self.auth(),
                Some(&payload),
            )
            .await?;
        if !disabled.status {
            return Err(Self::provider_failure(disabled.message));
        }

        info!(
            reference = %ledger.reference,
            subscription_code = %subscription_code,
            "paystack subscription disabled"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    status: String,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    subscription_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackPlanData {
    plan_code: String,
    amount: i64,
    interval: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PaystackSubscriptionData {
    email_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::utils::hmac_sha512_hex;

    fn gateway() -> PaystackGateway {
        PaystackGateway::new(PaystackConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: Some("whsec_test".to_string()),
            base_url: "https://api.paystack.co".to_string(),
            return_url: "https://checkout.linkpage.example/pay/paystack/verify".to_string(),
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn webhook_signature_validation_accepts_valid_hmac() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success"}"#;
        let signature = hmac_sha512_hex(payload, "whsec_test");
        let result = gateway
            .verify_webhook(payload, &signature)
            .expect("verification should not error");
        assert!(result.valid);
    }

    #[test]
    fn webhook_signature_validation_rejects_invalid_hmac() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success"}"#;
        let result = gateway
            .verify_webhook(payload, "invalid_signature")
            .expect("verification should not error");
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn charge_success_event_maps_to_fulfillment() {
        let gateway = gateway();
        let payload = br#"{
            "event": "charge.success",
            "data": {
                "reference": "sx_abc123",
                "status": "success",
                "subscription_code": "SUB_xyz"
            }
        }"#;
        let outcome = gateway
            .parse_webhook_event(payload)
            .await
            .expect("parse should succeed");
        match outcome {
            WebhookOutcome::Fulfillment(event) => {
                assert_eq!(event.reference, "sx_abc123");
                assert_eq!(event.provider_subscription_id.as_deref(), Some("SUB_xyz"));
            }
            other => panic!("expected fulfillment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_success_events_are_ignored() {
        let gateway = gateway();
        let payload = br#"{"event":"transfer.success","data":{"reference":"sx_abc123"}}"#;
        let outcome = gateway
            .parse_webhook_event(payload)
            .await
            .expect("parse should succeed");
        assert!(matches!(outcome, WebhookOutcome::Ignored { event_type } if event_type == "transfer.success"));
    }

    #[test]
    fn interval_maps_to_paystack_vocabulary() {
        assert_eq!(PaystackGateway::interval(BillingInterval::Monthly), "monthly");
        assert_eq!(PaystackGateway::interval(BillingInterval::Yearly), "annually");
    }
}
