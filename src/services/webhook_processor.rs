use crate::checkout::dispatcher::{DispatchError, DispatchOutcome, FulfillmentDispatcher};
use crate::providers::error::PaymentError;
use crate::providers::provider::PaymentProvider;
use crate::providers::registry::ProviderRegistry;
use crate::providers::types::{ProviderName, WebhookOutcome};
use crate::store::LedgerStore;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Processing error: {0}")]
    Processing(String),
}

/// How a verified webhook was resolved. All variants are acknowledged with
/// a 2xx; only errors make the provider retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    Fulfilled,
    Duplicate,
    Ignored,
    UnknownReference,
}

pub struct WebhookProcessor {
    registry: Arc<ProviderRegistry>,
    dispatcher: Arc<FulfillmentDispatcher>,
    store: Arc<dyn LedgerStore>,
}

impl WebhookProcessor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        dispatcher: Arc<FulfillmentDispatcher>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            store,
        }
    }

    pub async fn process(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookDisposition, WebhookProcessorError> {
        let provider = ProviderName::from_str(provider_name)
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;
        let signature = signature.unwrap_or("");

        let adapter = self
            .registry
            .provider(provider)
            .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;

        let adapter = self
            .verify_signature(provider, adapter, signature, payload)
            .await?;

        let event = match adapter.parse_webhook_event(payload).await {
            Ok(event) => event,
            Err(PaymentError::WebhookVerificationError { message }) => {
                error!(provider = %provider, message = %message, "webhook failed verification");
                return Err(WebhookProcessorError::InvalidSignature);
            }
            Err(e) => return Err(WebhookProcessorError::Processing(e.to_string())),
        };

        match event {
            WebhookOutcome::Ignored { event_type } => {
                info!(provider = %provider, event_type = %event_type, "webhook event ignored");
                Ok(WebhookDisposition::Ignored)
            }
            WebhookOutcome::Fulfillment(event) => match self.dispatcher.dispatch(&event).await {
                Ok(DispatchOutcome::Fulfilled) => Ok(WebhookDisposition::Fulfilled),
                Ok(DispatchOutcome::AlreadyPaid) => Ok(WebhookDisposition::Duplicate),
                Ok(DispatchOutcome::UnknownReference) => Ok(WebhookDisposition::UnknownReference),
                Err(DispatchError::Store(e)) => Err(WebhookProcessorError::Store(e.to_string())),
                Err(DispatchError::Fulfillment(e)) => {
                    Err(WebhookProcessorError::Processing(e.to_string()))
                }
            },
        }
    }

    /// Verify with platform credentials first. When that fails and the
    /// payload's reference points at a ledger carrying tenant keys, verify
    /// once more with the tenant's secret before giving up.
    async fn verify_signature(
        &self,
        provider: ProviderName,
        adapter: Box<dyn PaymentProvider>,
        signature: &str,
        payload: &[u8],
    ) -> Result<Box<dyn PaymentProvider>, WebhookProcessorError> {
        let verification = adapter
            .verify_webhook(payload, signature)
            .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;
        if verification.valid {
            return Ok(adapter);
        }

        if let Some(tenant_adapter) = self
            .tenant_adapter(provider, payload)
            .await
            .map_err(|e| WebhookProcessorError::Store(e.to_string()))?
        {
            let tenant_verification = tenant_adapter
                .verify_webhook(payload, signature)
                .map_err(|e| WebhookProcessorError::Processing(e.to_string()))?;
            if tenant_verification.valid {
                return Ok(tenant_adapter);
            }
        }

        warn!(
            provider = %provider,
            reason = verification.reason.as_deref().unwrap_or("unknown"),
            "invalid webhook signature"
        );
        Err(WebhookProcessorError::InvalidSignature)
    }

    async fn tenant_adapter(
        &self,
        provider: ProviderName,
        payload: &[u8],
    ) -> Result<Option<Box<dyn PaymentProvider>>, crate::store::StoreError> {
        // The payload is untrusted at this point; it is only used to look
        // up which tenant's secret to verify against, never acted on.
        let Ok(parsed) = serde_json::from_slice::<JsonValue>(payload) else {
            return Ok(None);
        };
        let Some(reference) = peek_reference(provider, &parsed) else {
            return Ok(None);
        };
        let Some(ledger) = self.store.find_by_reference(&reference).await? else {
            return Ok(None);
        };
        if ledger.provider != provider || ledger.provider_keys.is_empty() {
            return Ok(None);
        }
        Ok(self.registry.provider_for_ledger(&ledger).ok())
    }
}

/// Pull the checkout reference out of a raw payload without trusting it.
fn peek_reference(provider: ProviderName, payload: &JsonValue) -> Option<String> {
    let as_string = |v: &JsonValue| v.as_str().map(|s| s.to_string());
    match provider {
        ProviderName::Stripe => {
            let object = payload.get("data")?.get("object")?;
            object
                .get("metadata")
                .and_then(|m| m.get("sxref"))
                .and_then(as_string)
                .or_else(|| object.get("client_reference_id").and_then(as_string))
                .or_else(|| {
                    object
                        .get("subscription_details")
                        .and_then(|d| d.get("metadata"))
                        .and_then(|m| m.get("sxref"))
                        .and_then(as_string)
                })
        }
        ProviderName::Paystack => payload.get("data")?.get("reference").and_then(as_string),
        ProviderName::Flutterwave => payload.get("data")?.get("tx_ref").and_then(as_string),
        ProviderName::Razorpay => {
            let body = payload.get("payload")?;
            body.get("payment_link")
                .and_then(|p| p.get("entity"))
                .and_then(|e| e.get("reference_id"))
                .and_then(as_string)
                .or_else(|| {
                    body.get("subscription")
                        .and_then(|p| p.get("entity"))
                        .and_then(|e| e.get("notes"))
                        .and_then(|n| n.get("sxref"))
                        .and_then(as_string)
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::fulfillment::{FulfillmentError, FulfillmentHandler, FulfillmentRegistry};
    use crate::checkout::ledger::tests::sample_ledger;
    use crate::checkout::ledger::CheckoutLedger;
    use crate::providers::gateways::PaystackConfig;
    use crate::providers::registry::ProviderSettings;
    use crate::providers::utils::hmac_sha512_hex;
    use crate::store::MemoryLedgerStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FulfillmentHandler for CountingHandler {
        async fn fulfill(&self, _ledger: &CheckoutLedger) -> Result<(), FulfillmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn processor() -> (WebhookProcessor, Arc<MemoryLedgerStore>, Arc<AtomicUsize>) {
        let store = Arc::new(MemoryLedgerStore::new());
        let settings = ProviderSettings {
            default_provider: Some(ProviderName::Paystack),
            enabled_providers: vec![ProviderName::Paystack],
            paystack: Some(PaystackConfig {
                secret_key: "sk_platform".to_string(),
                webhook_secret: Some("whsec_platform".to_string()),
                ..PaystackConfig::default()
            }),
            ..ProviderSettings::default()
        };
        let registry = Arc::new(ProviderRegistry::with_settings(settings));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fulfillment = FulfillmentRegistry::new();
        fulfillment.register(
            "activate_plan",
            Arc::new(CountingHandler {
                calls: calls.clone(),
            }),
        );
        let dispatcher = Arc::new(FulfillmentDispatcher::new(
            store.clone(),
            Arc::new(fulfillment),
        ));
        let processor = WebhookProcessor::new(registry, dispatcher, store.clone());
        (processor, store, calls)
    }

    fn paystack_ledger() -> CheckoutLedger {
        let mut ledger = sample_ledger();
        ledger.provider = ProviderName::Paystack;
        ledger
    }

    const CHARGE_SUCCESS: &[u8] =
        br#"{"event":"charge.success","data":{"reference":"sx_abc123","status":"success"}}"#;

    #[tokio::test]
    async fn verified_webhook_fulfills_once_then_reports_duplicates() {
        let (processor, store, calls) = processor();
        store.insert(&paystack_ledger()).await.unwrap();
        let signature = hmac_sha512_hex(CHARGE_SUCCESS, "whsec_platform");

        let first = processor
            .process("paystack", Some(&signature), CHARGE_SUCCESS)
            .await
            .unwrap();
        assert_eq!(first, WebhookDisposition::Fulfilled);

        let second = processor
            .process("paystack", Some(&signature), CHARGE_SUCCESS)
            .await
            .unwrap();
        assert_eq!(second, WebhookDisposition::Duplicate);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let ledger = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert!(ledger.paid);
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_and_state_unchanged() {
        let (processor, store, calls) = processor();
        store.insert(&paystack_ledger()).await.unwrap();

        let result = processor
            .process("paystack", Some("wrong"), CHARGE_SUCCESS)
            .await;
        assert!(matches!(
            result,
            Err(WebhookProcessorError::InvalidSignature)
        ));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let ledger = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert!(!ledger.paid);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let (processor, _store, _calls) = processor();
        let result = processor.process("paystack", None, CHARGE_SUCCESS).await;
        assert!(matches!(
            result,
            Err(WebhookProcessorError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn tenant_webhook_secret_is_honored() {
        let (processor, store, calls) = processor();
        let mut ledger = paystack_ledger();
        ledger
            .provider_keys
            .insert("webhook_secret".to_string(), "whsec_tenant".to_string());
        store.insert(&ledger).await.unwrap();

        // Signed with the tenant's secret, not the platform's.
        let signature = hmac_sha512_hex(CHARGE_SUCCESS, "whsec_tenant");
        let disposition = processor
            .process("paystack", Some(&signature), CHARGE_SUCCESS)
            .await
            .unwrap();
        assert_eq!(disposition, WebhookDisposition::Fulfilled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_reference_is_acknowledged_without_side_effects() {
        let (processor, _store, calls) = processor();
        let payload =
            br#"{"event":"charge.success","data":{"reference":"sx_foreign","status":"success"}}"#;
        let signature = hmac_sha512_hex(payload, "whsec_platform");

        let disposition = processor
            .process("paystack", Some(&signature), payload)
            .await
            .unwrap();
        assert_eq!(disposition, WebhookDisposition::UnknownReference);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unrelated_event_types_are_ignored() {
        let (processor, store, calls) = processor();
        store.insert(&paystack_ledger()).await.unwrap();
        let payload = br#"{"event":"subscription.create","data":{"reference":"sx_abc123"}}"#;
        let signature = hmac_sha512_hex(payload, "whsec_platform");

        let disposition = processor
            .process("paystack", Some(&signature), payload)
            .await
            .unwrap();
        assert_eq!(disposition, WebhookDisposition::Ignored);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_provider_name_is_an_error() {
        let (processor, _store, _calls) = processor();
        let result = processor.process("paypal", Some("sig"), b"{}").await;
        assert!(matches!(
            result,
            Err(WebhookProcessorError::UnknownProvider(_))
        ));
    }

    #[test]
    fn peek_reference_reads_provider_specific_paths() {
        let stripe = serde_json::json!({
            "data": {"object": {"metadata": {"sxref": "sx_s"}}}
        });
        assert_eq!(
            peek_reference(ProviderName::Stripe, &stripe).as_deref(),
            Some("sx_s")
        );

        let razorpay = serde_json::json!({
            "payload": {"subscription": {"entity": {"notes": {"sxref": "sx_r"}}}}
        });
        assert_eq!(
            peek_reference(ProviderName::Razorpay, &razorpay).as_deref(),
            Some("sx_r")
        );

        assert_eq!(
            peek_reference(ProviderName::Paystack, &serde_json::json!({})),
            None
        );
    }
}
