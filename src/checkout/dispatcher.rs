use crate::checkout::fulfillment::{FulfillmentError, FulfillmentRegistry};
use crate::providers::types::FulfillmentEvent;
use crate::store::{ClaimOutcome, LedgerStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fulfillment(#[from] FulfillmentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This call won the claim and ran the fulfillment operation.
    Fulfilled,
    /// Another delivery already claimed the ledger; nothing ran.
    AlreadyPaid,
    /// No ledger matches the reference. Terminal no-op: cross-tenant and
    /// stale webhooks are expected, not actionable.
    UnknownReference,
}

/// Invokes the ledger's fulfillment operation at most once per reference.
///
/// Both confirmation paths (browser-return verify and webhook) funnel
/// through here; the store's conditional claim decides the winner, so
/// redundant and concurrent deliveries are safe.
pub struct FulfillmentDispatcher {
    store: Arc<dyn LedgerStore>,
    registry: Arc<FulfillmentRegistry>,
}

impl FulfillmentDispatcher {
    pub fn new(store: Arc<dyn LedgerStore>, registry: Arc<FulfillmentRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn dispatch(
        &self,
        event: &FulfillmentEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(ledger) = self.store.find_by_reference(&event.reference).await? else {
            info!(
                reference = %event.reference,
                provider = %event.provider,
                "fulfillment event for unknown reference, dropping"
            );
            return Ok(DispatchOutcome::UnknownReference);
        };

        // Resolve before claiming: a misregistered operation must not burn
        // the one-shot claim.
        let handler = self.registry.resolve(&ledger.fulfillment.op)?;

        match self
            .store
            .claim_paid(
                &event.reference,
                event.provider_subscription_id.as_deref(),
            )
            .await?
        {
            ClaimOutcome::Claimed(claimed) => {
                handler.fulfill(&claimed).await?;
                info!(
                    reference = %claimed.reference,
                    provider = %event.provider,
                    op = %claimed.fulfillment.op,
                    "checkout fulfilled"
                );
                Ok(DispatchOutcome::Fulfilled)
            }
            ClaimOutcome::AlreadyPaid => {
                info!(
                    reference = %event.reference,
                    provider = %event.provider,
                    "duplicate fulfillment event, ledger already paid"
                );
                Ok(DispatchOutcome::AlreadyPaid)
            }
            ClaimOutcome::NotFound => {
                warn!(
                    reference = %event.reference,
                    "ledger disappeared between lookup and claim"
                );
                Ok(DispatchOutcome::UnknownReference)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::fulfillment::FulfillmentHandler;
    use crate::checkout::ledger::tests::sample_ledger;
    use crate::providers::types::ProviderName;
    use crate::store::MemoryLedgerStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FulfillmentHandler for CountingHandler {
        async fn fulfill(
            &self,
            _ledger: &crate::checkout::ledger::CheckoutLedger,
        ) -> Result<(), FulfillmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher_with_counter() -> (FulfillmentDispatcher, Arc<MemoryLedgerStore>, Arc<AtomicUsize>)
    {
        let store = Arc::new(MemoryLedgerStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = FulfillmentRegistry::new();
        registry.register(
            "activate_plan",
            Arc::new(CountingHandler {
                calls: calls.clone(),
            }),
        );
        let dispatcher = FulfillmentDispatcher::new(store.clone(), Arc::new(registry));
        (dispatcher, store, calls)
    }

    fn event(reference: &str) -> FulfillmentEvent {
        FulfillmentEvent {
            provider: ProviderName::Stripe,
            reference: reference.to_string(),
            provider_subscription_id: Some("sub_1".to_string()),
        }
    }

    #[tokio::test]
    async fn redelivered_events_fulfill_exactly_once() {
        let (dispatcher, store, calls) = dispatcher_with_counter();
        store.insert(&sample_ledger()).await.unwrap();

        for delivery in 0..5 {
            let outcome = dispatcher.dispatch(&event("sx_abc123")).await.unwrap();
            if delivery == 0 {
                assert_eq!(outcome, DispatchOutcome::Fulfilled);
            } else {
                assert_eq!(outcome, DispatchOutcome::AlreadyPaid);
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let ledger = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert!(ledger.paid);
        assert_eq!(ledger.provider_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn concurrent_verify_and_webhook_race_fulfills_once() {
        let (dispatcher, store, calls) = dispatcher_with_counter();
        store.insert(&sample_ledger()).await.unwrap();

        let event_a = event("sx_abc123");
        let event_b = event("sx_abc123");
        let (first, second) = tokio::join!(
            dispatcher.dispatch(&event_a),
            dispatcher.dispatch(&event_b),
        );

        let outcomes = [first.unwrap(), second.unwrap()];
        assert!(outcomes.contains(&DispatchOutcome::Fulfilled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let ledger = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert!(ledger.paid);
    }

    #[tokio::test]
    async fn unknown_reference_is_a_silent_no_op() {
        let (dispatcher, store, calls) = dispatcher_with_counter();

        let outcome = dispatcher.dispatch(&event("sx_foreign")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::UnknownReference);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store
            .find_by_reference("sx_foreign")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unregistered_operation_does_not_claim_the_ledger() {
        let store = Arc::new(MemoryLedgerStore::new());
        let mut sample = sample_ledger();
        sample.fulfillment.op = "unregistered".to_string();
        store.insert(&sample).await.unwrap();

        let dispatcher =
            FulfillmentDispatcher::new(store.clone(), Arc::new(FulfillmentRegistry::new()));
        let result = dispatcher.dispatch(&event("sx_abc123")).await;
        assert!(matches!(
            result,
            Err(DispatchError::Fulfillment(
                FulfillmentError::UnknownOperation(_)
            ))
        ));

        // The claim is still available once the handler is registered.
        let ledger = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert!(!ledger.paid);
    }
}
