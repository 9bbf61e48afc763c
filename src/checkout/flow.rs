use crate::checkout::dispatcher::FulfillmentDispatcher;
use crate::checkout::ledger::{
    new_reference, BillingInterval, CheckoutLedger, CheckoutState, FulfillmentOp, PaymentKind,
};
use crate::providers::error::{PaymentError, PaymentResult};
use crate::providers::registry::ProviderRegistry;
use crate::providers::types::{FulfillmentEvent, ProviderName};
use crate::store::LedgerStore;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Uniform result shape consumed by both the JSON API and redirect-based
/// web flows. `status` is 1 on success and 0 on failure; failures carry a
/// safe redirect target instead of raising.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutOutcome {
    pub redirect: String,
    pub status: u8,
    pub response: String,
}

impl CheckoutOutcome {
    pub fn success(redirect: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            redirect: redirect.into(),
            status: 1,
            response: response.into(),
        }
    }

    pub fn failure(redirect: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            redirect: redirect.into(),
            status: 0,
            response: response.into(),
        }
    }
}

/// Checkout creation input, as received from the surrounding product.
#[derive(Debug, Clone)]
pub struct NewCheckout {
    pub reference: Option<String>,
    pub price: BigDecimal,
    pub currency: String,
    pub payment_kind: PaymentKind,
    pub frequency: Option<BillingInterval>,
    pub provider: ProviderName,
    pub provider_keys: HashMap<String, String>,
    pub email: String,
    pub callback_url: String,
    pub fulfillment: FulfillmentOp,
    pub meta: JsonValue,
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Where failed checkout creations send the payer.
    pub home_url: String,
    /// Where failed verifications send the payer, with a message appended.
    pub error_url: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            home_url: "/".to_string(),
            error_url: "/pay/error".to_string(),
        }
    }
}

pub struct CheckoutFlow {
    store: Arc<dyn LedgerStore>,
    registry: Arc<ProviderRegistry>,
    dispatcher: Arc<FulfillmentDispatcher>,
    config: FlowConfig,
}

impl CheckoutFlow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        registry: Arc<ProviderRegistry>,
        dispatcher: Arc<FulfillmentDispatcher>,
        config: FlowConfig,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            config,
        }
    }

    pub fn home_url(&self) -> &str {
        &self.config.home_url
    }

    pub fn resolve_provider(&self, name: Option<&str>) -> PaymentResult<ProviderName> {
        match name {
            Some(value) => ProviderName::from_str(value),
            None => self
                .registry
                .default_provider()
                .map(|provider| provider.name()),
        }
    }

    fn validate(request: &NewCheckout) -> PaymentResult<()> {
        if request.price <= BigDecimal::from(0) {
            return Err(PaymentError::ValidationError {
                message: "price must be greater than zero".to_string(),
                field: Some("price".to_string()),
            });
        }
        if request.currency.trim().len() != 3 {
            return Err(PaymentError::ValidationError {
                message: format!("invalid currency code: {}", request.currency),
                field: Some("currency".to_string()),
            });
        }
        if !request.email.contains('@') {
            return Err(PaymentError::ValidationError {
                message: "payer email is required".to_string(),
                field: Some("email".to_string()),
            });
        }
        if request.callback_url.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "callback_url is required".to_string(),
                field: Some("callback_url".to_string()),
            });
        }
        if request.fulfillment.op.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "fulfillment operation is required".to_string(),
                field: Some("fulfillment.op".to_string()),
            });
        }
        if request.payment_kind == PaymentKind::Recurring && request.frequency.is_none() {
            return Err(PaymentError::ValidationError {
                message: "recurring checkout requires a frequency".to_string(),
                field: Some("frequency".to_string()),
            });
        }
        Ok(())
    }

    fn build_ledger(request: NewCheckout) -> CheckoutLedger {
        let now = Utc::now();
        CheckoutLedger {
            id: Uuid::new_v4(),
            reference: request.reference.unwrap_or_else(new_reference),
            price: request.price,
            currency: request.currency.trim().to_uppercase(),
            payment_kind: request.payment_kind,
            frequency: match request.payment_kind {
                PaymentKind::Recurring => request.frequency,
                PaymentKind::Onetime => None,
            },
            provider: request.provider,
            provider_keys: request.provider_keys,
            email: request.email,
            callback_url: request.callback_url,
            fulfillment: request.fulfillment,
            provider_session_id: None,
            provider_subscription_id: None,
            paid: false,
            state: CheckoutState::Created,
            meta: request.meta,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a checkout and hand back the provider redirect. Every
    /// failure becomes a `status: 0` outcome pointing home; nothing from
    /// the provider layer escapes as an error.
    pub async fn start(&self, request: NewCheckout) -> CheckoutOutcome {
        if let Err(e) = Self::validate(&request) {
            return CheckoutOutcome::failure(&self.config.home_url, e.user_message());
        }

        let ledger = Self::build_ledger(request);

        let provider = match self.registry.provider_for_ledger(&ledger) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(reference = %ledger.reference, error = %e, "provider unavailable");
                return CheckoutOutcome::failure(&self.config.home_url, e.user_message());
            }
        };

        let currency = ledger.currency.as_str();
        if !provider
            .supported_currencies()
            .iter()
            .any(|supported| *supported == currency)
        {
            return CheckoutOutcome::failure(
                &self.config.home_url,
                format!("{} does not support {}", ledger.provider, currency),
            );
        }

        if let Err(e) = self.store.insert(&ledger).await {
            error!(reference = %ledger.reference, error = %e, "failed to persist checkout");
            return CheckoutOutcome::failure(&self.config.home_url, "could not start checkout");
        }

        match provider.create_checkout(&ledger).await {
            Ok(session) => {
                if let Err(e) = self
                    .store
                    .record_session(
                        &ledger.reference,
                        CheckoutState::AwaitingRedirect,
                        session.provider_session_id.as_deref(),
                    )
                    .await
                {
                    error!(reference = %ledger.reference, error = %e, "failed to record session");
                    return CheckoutOutcome::failure(
                        &self.config.home_url,
                        "could not start checkout",
                    );
                }
                info!(
                    reference = %ledger.reference,
                    provider = %ledger.provider,
                    "checkout created"
                );
                CheckoutOutcome::success(session.redirect_url, "checkout created")
            }
            Err(e) => {
                warn!(
                    reference = %ledger.reference,
                    provider = %ledger.provider,
                    error = %e,
                    "checkout creation failed"
                );
                let _ = self.store.mark_failed(&ledger.reference).await;
                CheckoutOutcome::failure(&self.config.home_url, e.user_message())
            }
        }
    }

    /// Browser-return confirmation. Returns the redirect target for the
    /// payer: the ledger's callback URL with `sxref` appended on success,
    /// the configured error destination with a message otherwise.
    pub async fn verify_return(
        &self,
        provider_name: &str,
        reference: &str,
        params: &HashMap<String, String>,
    ) -> String {
        let provider_name = match ProviderName::from_str(provider_name) {
            Ok(name) => name,
            Err(e) => return self.error_redirect(&e.user_message()),
        };

        let ledger = match self.store.find_by_reference(reference).await {
            Ok(Some(ledger)) => ledger,
            Ok(None) => return self.error_redirect("unknown checkout"),
            Err(e) => {
                error!(reference = %reference, error = %e, "ledger lookup failed");
                return self.error_redirect("could not verify payment");
            }
        };
        if ledger.provider != provider_name {
            return self.error_redirect("unknown checkout");
        }

        // The webhook may already have won the race.
        if ledger.paid {
            return append_query(&ledger.callback_url, "sxref", reference);
        }

        let provider = match self.registry.provider_for_ledger(&ledger) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(reference = %reference, error = %e, "provider unavailable");
                return self.error_redirect(&e.user_message());
            }
        };

        match provider.verify(&ledger, params).await {
            Ok(outcome) if outcome.paid => {
                let event = FulfillmentEvent {
                    provider: provider_name,
                    reference: reference.to_string(),
                    provider_subscription_id: outcome.provider_subscription_id,
                };
                // Payment is confirmed even if dispatch hits a transient
                // store error; the provider webhook will redeliver.
                if let Err(e) = self.dispatcher.dispatch(&event).await {
                    error!(reference = %reference, error = %e, "fulfillment dispatch failed");
                }
                append_query(&ledger.callback_url, "sxref", reference)
            }
            Ok(outcome) if outcome.failed => {
                let _ = self.store.mark_failed(reference).await;
                let message = outcome
                    .failure_reason
                    .unwrap_or_else(|| "payment was not successful".to_string());
                self.error_redirect(&message)
            }
            Ok(_) => self.error_redirect("payment is not confirmed yet"),
            Err(e) => {
                warn!(reference = %reference, error = %e, "verification failed");
                self.error_redirect(&e.user_message())
            }
        }
    }

    /// Cancel a recurring subscription. Provider-side failure is logged
    /// and swallowed: the local downgrade must not be blocked by a third
    /// party being unreachable.
    pub async fn cancel(&self, reference: &str) -> CheckoutOutcome {
        let ledger = match self.store.find_by_reference(reference).await {
            Ok(Some(ledger)) => ledger,
            Ok(None) => {
                return CheckoutOutcome::failure(&self.config.home_url, "unknown checkout")
            }
            Err(e) => {
                error!(reference = %reference, error = %e, "ledger lookup failed");
                return CheckoutOutcome::failure(&self.config.home_url, "could not cancel");
            }
        };

        if !ledger.is_recurring() || !ledger.paid {
            return CheckoutOutcome::failure(
                &self.config.home_url,
                "checkout is not an active subscription",
            );
        }

        match self.registry.provider_for_ledger(&ledger) {
            Ok(provider) => {
                if let Err(e) = provider.cancel_subscription(&ledger).await {
                    warn!(
                        reference = %reference,
                        provider = %ledger.provider,
                        error = %e,
                        "provider-side cancellation failed, continuing"
                    );
                }
            }
            Err(e) => {
                warn!(reference = %reference, error = %e, "provider unavailable for cancellation");
            }
        }

        if let Err(e) = self.store.mark_cancelled(reference).await {
            error!(reference = %reference, error = %e, "failed to record cancellation");
            return CheckoutOutcome::failure(&self.config.home_url, "could not cancel");
        }

        info!(reference = %reference, "subscription cancelled");
        CheckoutOutcome::success(&self.config.home_url, "subscription cancelled")
    }

    fn error_redirect(&self, message: &str) -> String {
        append_query(&self.config.error_url, "message", message)
    }
}

fn append_query(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, separator, key, encode_query_component(value))
}

fn encode_query_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b' ' => encoded.push('+'),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::fulfillment::{FulfillmentRegistry, LogFulfillment};
    use crate::providers::gateways::StripeConfig;
    use crate::providers::registry::ProviderSettings;
    use crate::store::MemoryLedgerStore;

    fn flow_with_unreachable_provider() -> (CheckoutFlow, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new());
        // Points at a closed local port so provider calls fail fast.
        let settings = ProviderSettings {
            default_provider: Some(ProviderName::Stripe),
            enabled_providers: vec![ProviderName::Stripe],
            stripe: Some(StripeConfig {
                secret_key: "sk_test".to_string(),
                webhook_secret: "whsec_test".to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
                timeout_secs: 1,
                max_retries: 0,
                ..StripeConfig::default()
            }),
            ..ProviderSettings::default()
        };
        let registry = Arc::new(ProviderRegistry::with_settings(settings));
        let mut fulfillment = FulfillmentRegistry::new();
        fulfillment.register("activate_plan", Arc::new(LogFulfillment));
        let dispatcher = Arc::new(FulfillmentDispatcher::new(
            store.clone(),
            Arc::new(fulfillment),
        ));
        let flow = CheckoutFlow::new(
            store.clone(),
            registry,
            dispatcher,
            FlowConfig {
                home_url: "https://linkpage.example".to_string(),
                error_url: "https://linkpage.example/pay/error".to_string(),
            },
        );
        (flow, store)
    }

    fn request() -> NewCheckout {
        NewCheckout {
            reference: Some("sx_flow".to_string()),
            price: BigDecimal::from(25),
            currency: "USD".to_string(),
            payment_kind: PaymentKind::Onetime,
            frequency: None,
            provider: ProviderName::Stripe,
            provider_keys: HashMap::new(),
            email: "payer@example.com".to_string(),
            callback_url: "https://linkpage.example/thanks".to_string(),
            fulfillment: FulfillmentOp {
                op: "activate_plan".to_string(),
                args: serde_json::json!({}),
            },
            meta: serde_json::json!({"title": "One-time purchase"}),
        }
    }

    #[tokio::test]
    async fn provider_failure_yields_soft_failure_not_error() {
        let (flow, store) = flow_with_unreachable_provider();

        let outcome = flow.start(request()).await;
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.redirect, "https://linkpage.example");
        assert!(!outcome.response.is_empty());

        // The attempt is recorded and marked failed.
        let ledger = store.find_by_reference("sx_flow").await.unwrap().unwrap();
        assert_eq!(ledger.state, CheckoutState::Failed);
        assert!(!ledger.paid);
    }

    #[tokio::test]
    async fn invalid_request_fails_before_any_persistence() {
        let (flow, store) = flow_with_unreachable_provider();

        let mut bad = request();
        bad.email = "not-an-email".to_string();
        let outcome = flow.start(bad).await;
        assert_eq!(outcome.status, 0);
        assert!(store.find_by_reference("sx_flow").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recurring_without_frequency_is_rejected() {
        let (flow, _store) = flow_with_unreachable_provider();

        let mut bad = request();
        bad.payment_kind = PaymentKind::Recurring;
        bad.frequency = None;
        let outcome = flow.start(bad).await;
        assert_eq!(outcome.status, 0);
        assert!(outcome.response.contains("frequency"));
    }

    #[tokio::test]
    async fn unsupported_currency_is_rejected() {
        let (flow, _store) = flow_with_unreachable_provider();

        let mut bad = request();
        bad.currency = "XXX".to_string();
        let outcome = flow.start(bad).await;
        assert_eq!(outcome.status, 0);
        assert!(outcome.response.contains("XXX"));
    }

    #[tokio::test]
    async fn verify_return_for_paid_ledger_skips_the_provider() {
        let (flow, store) = flow_with_unreachable_provider();
        let mut ledger = crate::checkout::ledger::tests::sample_ledger();
        ledger.paid = true;
        ledger.state = CheckoutState::Paid;
        store.insert(&ledger).await.unwrap();

        let target = flow
            .verify_return("stripe", "sx_abc123", &HashMap::new())
            .await;
        assert_eq!(
            target,
            "https://linkpage.example/thanks?sxref=sx_abc123"
        );
    }

    #[tokio::test]
    async fn verify_return_for_unknown_reference_redirects_to_error_page() {
        let (flow, _store) = flow_with_unreachable_provider();
        let target = flow
            .verify_return("stripe", "sx_missing", &HashMap::new())
            .await;
        assert!(target.starts_with("https://linkpage.example/pay/error?message="));
    }

    #[tokio::test]
    async fn cancel_requires_a_paid_recurring_ledger() {
        let (flow, store) = flow_with_unreachable_provider();
        store
            .insert(&crate::checkout::ledger::tests::sample_ledger())
            .await
            .unwrap();

        let outcome = flow.cancel("sx_abc123").await;
        assert_eq!(outcome.status, 0);
    }

    #[tokio::test]
    async fn cancel_proceeds_locally_when_provider_is_unreachable() {
        let (flow, store) = flow_with_unreachable_provider();
        let mut ledger = crate::checkout::ledger::tests::sample_ledger();
        ledger.paid = true;
        ledger.state = CheckoutState::Paid;
        ledger.provider_subscription_id = Some("sub_1".to_string());
        store.insert(&ledger).await.unwrap();

        let outcome = flow.cancel("sx_abc123").await;
        assert_eq!(outcome.status, 1);

        let cancelled = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert_eq!(cancelled.state, CheckoutState::Cancelled);
        assert!(cancelled.paid);
    }

    #[test]
    fn query_appending_handles_existing_parameters() {
        assert_eq!(
            append_query("https://a.example/cb", "sxref", "sx_1"),
            "https://a.example/cb?sxref=sx_1"
        );
        assert_eq!(
            append_query("https://a.example/cb?x=1", "sxref", "sx_1"),
            "https://a.example/cb?x=1&sxref=sx_1"
        );
        assert_eq!(
            append_query("/err", "message", "card declined (50%)"),
            "/err?message=card+declined+%2850%25%29"
        );
    }
}
