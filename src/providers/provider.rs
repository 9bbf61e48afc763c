use crate::checkout::ledger::CheckoutLedger;
use crate::providers::error::PaymentResult;
use crate::providers::types::{
    CheckoutSession, ProviderName, VerifyOutcome, WebhookOutcome, WebhookVerification,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// A payment gateway driven through the common checkout lifecycle.
///
/// Implementations translate the generic ledger entry into provider
/// requests and provider webhook payloads back into generic fulfillment
/// events. Provider failures are returned as `PaymentError`, never as
/// provider-specific types.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    fn supported_currencies(&self) -> &'static [&'static str];

    /// Create a provider-hosted checkout. For recurring ledgers this
    /// resolves-or-creates the provider-side plan first.
    async fn create_checkout(&self, ledger: &CheckoutLedger) -> PaymentResult<CheckoutSession>;

    /// Active confirmation on the payer's browser return. Runs
    /// concurrently with webhook delivery; callers must treat the result
    /// as racing against `parse_webhook_event`.
    async fn verify(
        &self,
        ledger: &CheckoutLedger,
        params: &HashMap<String, String>,
    ) -> PaymentResult<VerifyOutcome>;

    /// Authenticity check of an inbound webhook before any payload parse.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerification>;

    /// Parse a verified webhook payload. Only the provider's own
    /// payment-success event types produce a fulfillment event; everything
    /// else is `Ignored`.
    async fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookOutcome>;

    /// Best-effort provider-side cancellation of a recurring subscription.
    /// No-ops when the ledger has no subscription id.
    async fn cancel_subscription(&self, ledger: &CheckoutLedger) -> PaymentResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::FulfillmentEvent;

    struct MockProvider;

    #[async_trait]
    impl PaymentProvider for MockProvider {
        fn name(&self) -> ProviderName {
            ProviderName::Paystack
        }

        fn supported_currencies(&self) -> &'static [&'static str] {
            &["NGN", "USD"]
        }

        async fn create_checkout(
            &self,
            ledger: &CheckoutLedger,
        ) -> PaymentResult<CheckoutSession> {
            Ok(CheckoutSession {
                redirect_url: format!("https://example.com/pay/{}", ledger.reference),
                provider_session_id: Some("mock_session".to_string()),
            })
        }

        async fn verify(
            &self,
            _ledger: &CheckoutLedger,
            _params: &HashMap<String, String>,
        ) -> PaymentResult<VerifyOutcome> {
            Ok(VerifyOutcome {
                paid: true,
                failed: false,
                provider_subscription_id: None,
                failure_reason: None,
            })
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> PaymentResult<WebhookVerification> {
            Ok(WebhookVerification {
                valid: true,
                reason: None,
            })
        }

        async fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<WebhookOutcome> {
            Ok(WebhookOutcome::Fulfillment(FulfillmentEvent {
                provider: ProviderName::Paystack,
                reference: "sx_mock".to_string(),
                provider_subscription_id: None,
            }))
        }

        async fn cancel_subscription(&self, _ledger: &CheckoutLedger) -> PaymentResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn PaymentProvider> = Box::new(MockProvider);
        let ledger = crate::checkout::ledger::tests::sample_ledger();

        let session = provider
            .create_checkout(&ledger)
            .await
            .expect("checkout creation should succeed");
        assert!(session.redirect_url.contains(&ledger.reference));

        let outcome = provider
            .verify(&ledger, &HashMap::new())
            .await
            .expect("verification should succeed");
        assert!(outcome.paid);
    }
}
