use crate::checkout::amount::to_minor_units;
use crate::checkout::ledger::{BillingInterval, CheckoutLedger};
use crate::providers::error::{PaymentError, PaymentResult};
use crate::providers::provider::PaymentProvider;
use crate::providers::types::{
    CheckoutSession, FulfillmentEvent, ProviderName, VerifyOutcome, WebhookOutcome,
    WebhookVerification,
};
use crate::providers::utils::{verify_hmac_sha256_hex, ApiAuth, PaymentHttpClient};
use crate::providers::verify_return_url;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Razorpay subscriptions are created with a fixed cycle count.
const MONTHLY_CYCLES: u32 = 120;
const YEARLY_CYCLES: u32 = 10;

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.razorpay.com".to_string(),
            return_url: verify_return_url("razorpay"),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl RazorpayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let key_id =
            std::env::var("RAZORPAY_KEY_ID").map_err(|_| PaymentError::ValidationError {
                message: "RAZORPAY_KEY_ID environment variable is required".to_string(),
                field: Some("RAZORPAY_KEY_ID".to_string()),
            })?;
        let key_secret =
            std::env::var("RAZORPAY_KEY_SECRET").map_err(|_| PaymentError::ValidationError {
                message: "RAZORPAY_KEY_SECRET environment variable is required".to_string(),
                field: Some("RAZORPAY_KEY_SECRET".to_string()),
            })?;
        let webhook_secret =
            std::env::var("RAZORPAY_WEBHOOK_SECRET").map_err(|_| PaymentError::ValidationError {
                message: "RAZORPAY_WEBHOOK_SECRET environment variable is required".to_string(),
                field: Some("RAZORPAY_WEBHOOK_SECRET".to_string()),
            })?;

        Ok(Self {
            key_id,
            key_secret,
            webhook_secret,
            base_url: std::env::var("RAZORPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            return_url: verify_return_url("razorpay"),
            timeout_secs: std::env::var("RAZORPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("RAZORPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }

    pub fn apply_overrides(&mut self, keys: &HashMap<String, String>) {
        if let Some(key_id) = keys.get("key_id") {
            self.key_id = key_id.clone();
        }
        if let Some(secret) = keys.get("key_secret") {
            self.key_secret = secret.clone();
        }
        if let Some(secret) = keys.get("webhook_secret") {
            self.webhook_secret = secret.clone();
        }
    }
}

pub struct RazorpayGateway {
    config: RazorpayConfig,
    http: PaymentHttpClient,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(RazorpayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> ApiAuth<'_> {
        ApiAuth::Basic(&self.config.key_id, Some(&self.config.key_secret))
    }

    fn period(frequency: BillingInterval) -> &'static str {
        match frequency {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    fn cycles(frequency: BillingInterval) -> u32 {
        match frequency {
            BillingInterval::Monthly => MONTHLY_CYCLES,
            BillingInterval::Yearly => YEARLY_CYCLES,
        }
    }

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
        let period = Self::period(frequency);

        let existing: RazorpayCollection<RazorpayPlan> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &format!("{}?count=100", self.endpoint("/v1/plans")),
                self.auth(),
                None,
            )
            .await?;
        if let Some(plan) = existing.items.into_iter().find(|plan| {
            plan.period == period
                && plan.interval == 1
                && plan.item.amount == amount_minor
                && plan.item.currency.eq_ignore_ascii_case(&ledger.currency)
        }) {
            return Ok(plan.id);
        }

        let payload = serde_json::json!({
            "period": period,
            "interval": 1,
            "item": {
                "name": plan_key,
                "amount": amount_minor,
                "currency": ledger.currency,
            },
        });
        let created: RazorpayPlan = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/plans"),
                self.auth(),
                Some(&payload),
            )
            .await?;
        info!(plan_key = %plan_key, plan_id = %created.id, "razorpay plan created");
        Ok(created.id)
    }
}

#[async_trait]
impl PaymentProvider for RazorpayGateway {
    fn name(&self) -> ProviderName {
        ProviderName::Razorpay
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["INR", "USD"]
    }

    async fn create_checkout(&self, ledger: &CheckoutLedger) -> PaymentResult<CheckoutSession> {
        let amount_minor = to_minor_units(&ledger.price, &ledger.currency)?;

        match ledger.plan_key() {
            Some(plan_key) => {
                let plan_id = self.resolve_plan(ledger, amount_minor, &plan_key).await?;
                let frequency = ledger.frequency.ok_or(PaymentError::ValidationError {
                    message: "recurring checkout requires a frequency".to_string(),
                    field: Some("frequency".to_string()),
                })?;

                let payload = serde_json::json!({
                    "plan_id": plan_id,
                    "total_count": Self::cycles(frequency),
                    "customer_notify": 1,
                    "notes": {
                        "sxref": ledger.reference,
                        "email": ledger.email,
                    },
                });
                let subscription: RazorpaySubscription = self
                    .http
                    .request_json(
                        reqwest::Method::POST,
                        &self.endpoint("/v1/subscriptions"),
                        self.auth(),
                        Some(&payload),
                    )
                    .await?;

                let redirect_url =
                    subscription
                        .short_url
                        .clone()
                        .ok_or(PaymentError::ProviderError {
                            provider: "razorpay".to_string(),
                            message: "subscription has no hosted URL".to_string(),
                            provider_code: None,
                            retryable: false,
                        })?;

                info!(
                    reference = %ledger.reference,
                    subscription_id = %subscription.id,
                    "razorpay subscription checkout created"
                );

                Ok(CheckoutSession {
                    redirect_url,
                    provider_session_id: Some(subscription.id),
                })
            }
            None => {
                let payload = serde_json::json!({
                    "amount": amount_minor,
                    "currency": ledger.currency,
                    "description": ledger.description(),
                    "reference_id": ledger.reference,
                    "customer": {
                        "email": ledger.email,
                    },
                    "callback_url": format!(
                        "{}?sxref={}",
                        self.config.return_url, ledger.reference
                    ),
                    "callback_method": "get",
                    "notes": {
                        "sxref": ledger.reference,
                    },
                });
                let link: RazorpayPaymentLink = self
                    .http
                    .request_json(
                        reqwest::Method::POST,
                        &self.endpoint("/v1/payment_links"),
                        self.auth(),
                        Some(&payload),
                    )
                    .await?;

                info!(reference = %ledger.reference, link_id = %link.id, "razorpay payment link created");

                Ok(CheckoutSession {
                    redirect_url: link.short_url,
                    provider_session_id: Some(link.id),
                })
            }
        }
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
                    message: "ledger has no razorpay session to verify".to_string(),
                    field: Some("provider_session_id".to_string()),
                })?;

        if ledger.is_recurring() {
            let subscription: RazorpaySubscription = self
                .http
                .request_json(
                    reqwest::Method::GET,
                    &self.endpoint(&format!("/v1/subscriptions/{}", session_id)),
                    self.auth(),
                    None,
                )
                .await?;
            let status = subscription.status.as_deref().unwrap_or("unknown");
            let paid = matches!(status, "active" | "authenticated" | "completed");
            let failed = matches!(status, "halted" | "cancelled" | "expired");
            Ok(VerifyOutcome {
                paid,
                failed,
                provider_subscription_id: paid.then(|| subscription.id.clone()),
                failure_reason: failed.then(|| format!("subscription is {}", status)),
            })
        } else {
            let link: RazorpayPaymentLink = self
                .http
                .request_json(
                    reqwest::Method::GET,
                    &self.endpoint(&format!("/v1/payment_links/{}", session_id)),
                    self.auth(),
                    None,
                )
                .await?;
            let status = link.status.as_deref().unwrap_or("unknown");
            let paid = status == "paid";
            let failed = matches!(status, "cancelled" | "expired");
            Ok(VerifyOutcome {
                paid,
                failed,
                provider_subscription_id: None,
                failure_reason: failed.then(|| format!("payment link is {}", status)),
            })
        }
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerification> {
        let valid = verify_hmac_sha256_hex(payload, &self.config.webhook_secret, signature);
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid razorpay signature".to_string())
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

        let (reference, subscription_id) = match event_type.as_str() {
            "payment_link.paid" => {
                let entity = parsed
                    .get("payload")
                    .and_then(|p| p.get("payment_link"))
                    .and_then(|p| p.get("entity"))
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));
                let reference = entity
                    .get("reference_id")
                    .and_then(|v| v.as_str())
                    .or_else(|| {
                        entity
                            .get("notes")
                            .and_then(|n| n.get("sxref"))
                            .and_then(|v| v.as_str())
                    })
                    .map(|v| v.to_string());
                (reference, None)
            }
            "subscription.charged" => {
                let entity = parsed
                    .get("payload")
                    .and_then(|p| p.get("subscription"))
                    .and_then(|p| p.get("entity"))
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));
                let reference = entity
                    .get("notes")
                    .and_then(|n| n.get("sxref"))
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string());
                let subscription = entity
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string());
                (reference, subscription)
            }
            _ => (None, None),
        };

        match reference {
            Some(reference) => Ok(WebhookOutcome::Fulfillment(FulfillmentEvent {
                provider: ProviderName::Razorpay,
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

        let payload = serde_json::json!({ "cancel_at_cycle_end": 0 });
        let _cancelled: RazorpaySubscription = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/subscriptions/{}/cancel", subscription_id)),
                self.auth(),
                Some(&payload),
            )
            .await?;

        info!(
            reference = %ledger.reference,
            subscription_id = %subscription_id,
            "razorpay subscription cancelled"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RazorpayCollection<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RazorpayPlan {
    id: String,
    period: String,
    interval: u32,
    item: RazorpayPlanItem,
}

#[derive(Debug, Deserialize)]
struct RazorpayPlanItem {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayPaymentLink {
    id: String,
    short_url: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpaySubscription {
    id: String,
    #[serde(default)]
    short_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}
