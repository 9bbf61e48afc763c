use crate::checkout::ledger::{
    BillingInterval, CheckoutLedger, CheckoutState, FulfillmentOp, PaymentKind,
};
use crate::providers::types::ProviderName;
use crate::store::{ClaimOutcome, LedgerStore, StoreError};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

const LEDGER_COLUMNS: &str = "id, reference, price, currency, payment_kind, frequency, provider, \
     provider_keys, email, callback_url, fulfillment, provider_session_id, \
     provider_subscription_id, paid, state, meta, created_at, updated_at";

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    id: Uuid,
    reference: String,
    price: BigDecimal,
    currency: String,
    payment_kind: String,
    frequency: Option<String>,
    provider: String,
    provider_keys: serde_json::Value,
    email: String,
    callback_url: String,
    fulfillment: serde_json::Value,
    provider_session_id: Option<String>,
    provider_subscription_id: Option<String>,
    paid: bool,
    state: String,
    meta: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_ledger(self) -> Result<CheckoutLedger, StoreError> {
        let corrupt = |message: String| StoreError::Corrupt {
            reference: self.reference.clone(),
            message,
        };

        let payment_kind = PaymentKind::parse(&self.payment_kind)
            .ok_or_else(|| corrupt(format!("unknown payment kind '{}'", self.payment_kind)))?;
        let frequency = match &self.frequency {
            Some(value) => Some(
                BillingInterval::parse(value)
                    .ok_or_else(|| corrupt(format!("unknown frequency '{}'", value)))?,
            ),
            None => None,
        };
        let provider = ProviderName::from_str(&self.provider)
            .map_err(|_| corrupt(format!("unknown provider '{}'", self.provider)))?;
        let state = CheckoutState::parse(&self.state)
            .ok_or_else(|| corrupt(format!("unknown state '{}'", self.state)))?;
        let provider_keys: HashMap<String, String> =
            serde_json::from_value(self.provider_keys.clone())
                .map_err(|e| corrupt(format!("invalid provider_keys: {}", e)))?;
        let fulfillment: FulfillmentOp = serde_json::from_value(self.fulfillment.clone())
            .map_err(|e| corrupt(format!("invalid fulfillment descriptor: {}", e)))?;

        Ok(CheckoutLedger {
            id: self.id,
            reference: self.reference,
            price: self.price,
            currency: self.currency,
            payment_kind,
            frequency,
            provider,
            provider_keys,
            email: self.email,
            callback_url: self.callback_url,
            fulfillment,
            provider_session_id: self.provider_session_id,
            provider_subscription_id: self.provider_subscription_id,
            paid: self.paid,
            state,
            meta: self.meta,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert(&self, ledger: &CheckoutLedger) -> Result<(), StoreError> {
        let provider_keys = serde_json::to_value(&ledger.provider_keys)
            .unwrap_or_else(|_| serde_json::json!({}));
        let fulfillment = serde_json::to_value(&ledger.fulfillment).map_err(|e| {
            StoreError::Corrupt {
                reference: ledger.reference.clone(),
                message: format!("unserializable fulfillment descriptor: {}", e),
            }
        })?;

        sqlx::query(
            "INSERT INTO checkout_ledgers \
             (id, reference, price, currency, payment_kind, frequency, provider, provider_keys, \
              email, callback_url, fulfillment, provider_session_id, provider_subscription_id, \
              paid, state, meta, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(ledger.id)
        .bind(&ledger.reference)
        .bind(&ledger.price)
        .bind(&ledger.currency)
        .bind(ledger.payment_kind.as_str())
        .bind(ledger.frequency.map(|f| f.as_str()))
        .bind(ledger.provider.as_str())
        .bind(provider_keys)
        .bind(&ledger.email)
        .bind(&ledger.callback_url)
        .bind(fulfillment)
        .bind(&ledger.provider_session_id)
        .bind(&ledger.provider_subscription_id)
        .bind(ledger.paid)
        .bind(ledger.state.as_str())
        .bind(&ledger.meta)
        .bind(ledger.created_at)
        .bind(ledger.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<CheckoutLedger>, StoreError> {
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM checkout_ledgers WHERE reference = $1",
            LEDGER_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        row.map(LedgerRow::into_ledger).transpose()
    }

    async fn record_session(
        &self,
        reference: &str,
        state: CheckoutState,
        provider_session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE checkout_ledgers \
             SET state = $2, \
                 provider_session_id = COALESCE($3, provider_session_id), \
                 updated_at = NOW() \
             WHERE reference = $1",
        )
        .bind(reference)
        .bind(state.as_str())
        .bind(provider_session_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }

    async fn mark_failed(&self, reference: &str) -> Result<(), StoreError> {
        // A paid ledger is never demoted to failed, whatever arrives late.
        sqlx::query(
            "UPDATE checkout_ledgers \
             SET state = 'failed', updated_at = NOW() \
             WHERE reference = $1 AND paid = FALSE",
        )
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }

    async fn claim_paid(
        &self,
        reference: &str,
        provider_subscription_id: Option<&str>,
    ) -> Result<ClaimOutcome, StoreError> {
        let claimed = sqlx::query_as::<_, LedgerRow>(&format!(
            "UPDATE checkout_ledgers \
             SET paid = TRUE, state = 'paid', \
                 provider_subscription_id = COALESCE($2, provider_subscription_id), \
                 updated_at = NOW() \
             WHERE reference = $1 AND paid = FALSE \
             RETURNING {}",
            LEDGER_COLUMNS
        ))
        .bind(reference)
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(row.into_ledger()?));
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT paid FROM checkout_ledgers WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match exists {
            Some(_) => Ok(ClaimOutcome::AlreadyPaid),
            None => Ok(ClaimOutcome::NotFound),
        }
    }

    async fn mark_cancelled(&self, reference: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE checkout_ledgers \
             SET state = 'cancelled', updated_at = NOW() \
             WHERE reference = $1 AND paid = TRUE",
        )
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }
}
