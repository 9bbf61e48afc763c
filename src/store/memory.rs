use crate::checkout::ledger::{CheckoutLedger, CheckoutState};
use crate::store::{ClaimOutcome, LedgerStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory ledger store for tests and keyless local development. The
/// claim is a compare-and-swap under one lock, giving the same
/// single-writer-wins behavior as the conditional update in Postgres.
#[derive(Default)]
pub struct MemoryLedgerStore {
    ledgers: Mutex<HashMap<String, CheckoutLedger>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CheckoutLedger>> {
        match self.ledgers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert(&self, ledger: &CheckoutLedger) -> Result<(), StoreError> {
        let mut ledgers = self.lock();
        if ledgers.contains_key(&ledger.reference) {
            return Err(StoreError::DuplicateReference(ledger.reference.clone()));
        }
        ledgers.insert(ledger.reference.clone(), ledger.clone());
        Ok(())
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<CheckoutLedger>, StoreError> {
        Ok(self.lock().get(reference).cloned())
    }

    async fn record_session(
        &self,
        reference: &str,
        state: CheckoutState,
        provider_session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut ledgers = self.lock();
        if let Some(ledger) = ledgers.get_mut(reference) {
            ledger.state = state;
            if let Some(session_id) = provider_session_id {
                ledger.provider_session_id = Some(session_id.to_string());
            }
            ledger.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, reference: &str) -> Result<(), StoreError> {
        let mut ledgers = self.lock();
        if let Some(ledger) = ledgers.get_mut(reference) {
            if !ledger.paid {
                ledger.state = CheckoutState::Failed;
                ledger.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn claim_paid(
        &self,
        reference: &str,
        provider_subscription_id: Option<&str>,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut ledgers = self.lock();
        match ledgers.get_mut(reference) {
            None => Ok(ClaimOutcome::NotFound),
            Some(ledger) if ledger.paid => Ok(ClaimOutcome::AlreadyPaid),
            Some(ledger) => {
                ledger.paid = true;
                ledger.state = CheckoutState::Paid;
                if let Some(subscription_id) = provider_subscription_id {
                    ledger.provider_subscription_id = Some(subscription_id.to_string());
                }
                ledger.updated_at = Utc::now();
                Ok(ClaimOutcome::Claimed(ledger.clone()))
            }
        }
    }

    async fn mark_cancelled(&self, reference: &str) -> Result<(), StoreError> {
        let mut ledgers = self.lock();
        if let Some(ledger) = ledgers.get_mut(reference) {
            if ledger.paid {
                ledger.state = CheckoutState::Cancelled;
                ledger.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::ledger::tests::sample_ledger;

    #[tokio::test]
    async fn claim_is_granted_exactly_once() {
        let store = MemoryLedgerStore::new();
        store.insert(&sample_ledger()).await.unwrap();

        let first = store.claim_paid("sx_abc123", Some("sub_1")).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        let second = store.claim_paid("sx_abc123", Some("sub_1")).await.unwrap();
        assert!(matches!(second, ClaimOutcome::AlreadyPaid));

        let ledger = store
            .find_by_reference("sx_abc123")
            .await
            .unwrap()
            .expect("ledger should exist");
        assert!(ledger.paid);
        assert_eq!(ledger.state, CheckoutState::Paid);
        assert_eq!(ledger.provider_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn claim_of_unknown_reference_reports_not_found() {
        let store = MemoryLedgerStore::new();
        let outcome = store.claim_paid("sx_missing", None).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::NotFound));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryLedgerStore::new();
        store.insert(&sample_ledger()).await.unwrap();
        assert!(matches!(
            store.insert(&sample_ledger()).await,
            Err(StoreError::DuplicateReference(_))
        ));
    }

    #[tokio::test]
    async fn paid_ledger_is_never_demoted_to_failed() {
        let store = MemoryLedgerStore::new();
        store.insert(&sample_ledger()).await.unwrap();
        store.claim_paid("sx_abc123", None).await.unwrap();
        store.mark_failed("sx_abc123").await.unwrap();

        let ledger = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert!(ledger.paid);
        assert_eq!(ledger.state, CheckoutState::Paid);
    }

    #[tokio::test]
    async fn cancellation_keeps_paid_true() {
        let store = MemoryLedgerStore::new();
        store.insert(&sample_ledger()).await.unwrap();
        store.claim_paid("sx_abc123", Some("sub_1")).await.unwrap();
        store.mark_cancelled("sx_abc123").await.unwrap();

        let ledger = store.find_by_reference("sx_abc123").await.unwrap().unwrap();
        assert!(ledger.paid);
        assert_eq!(ledger.state, CheckoutState::Cancelled);
    }
}
