pub mod error;
pub mod memory;
pub mod pg;

use crate::checkout::ledger::{CheckoutLedger, CheckoutState};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

pub use error::StoreError;
pub use memory::MemoryLedgerStore;
pub use pg::PgLedgerStore;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&crate::config::DatabaseConfig> for PoolConfig {
    fn from(config: &crate::config::DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }
}

pub async fn init_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, StoreError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(StoreError::from_sqlx)?;

    pool.acquire().await.map_err(StoreError::from_sqlx)?;
    info!("database pool initialized");
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(StoreError::from_sqlx)?;
    Ok(())
}

/// Outcome of the atomic paid-flag claim. `AlreadyPaid` is how the losing
/// side of the verify/webhook race learns to skip fulfillment.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(CheckoutLedger),
    AlreadyPaid,
    NotFound,
}

/// Persistence seam for checkout ledgers.
///
/// `claim_paid` is the single concurrency-critical operation: it must be a
/// conditional update (set paid where not paid) so that two racing HTTP
/// requests from different processes cannot both win. No in-memory lock
/// can provide that guarantee for the Postgres deployment.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, ledger: &CheckoutLedger) -> Result<(), StoreError>;

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<CheckoutLedger>, StoreError>;

    /// Record the provider-hosted session after checkout creation and move
    /// the ledger forward in the lifecycle.
    async fn record_session(
        &self,
        reference: &str,
        state: CheckoutState,
        provider_session_id: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn mark_failed(&self, reference: &str) -> Result<(), StoreError>;

    /// Atomically flip `paid` from false to true, recording the provider
    /// subscription id. Exactly one caller per reference ever receives
    /// `Claimed`.
    async fn claim_paid(
        &self,
        reference: &str,
        provider_subscription_id: Option<&str>,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Cancellation mutates lifecycle state only; `paid` stays true.
    async fn mark_cancelled(&self, reference: &str) -> Result<(), StoreError>;
}
