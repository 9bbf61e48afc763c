use crate::checkout::ledger::CheckoutLedger;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
pub enum FulfillmentError {
    #[error("no fulfillment handler registered for operation '{0}'")]
    UnknownOperation(String),

    #[error("fulfillment operation '{op}' failed: {message}")]
    HandlerFailed { op: String, message: String },
}

/// A named fulfillment operation. Handlers are registered once at startup;
/// the ledger's stored descriptor names which one runs and carries its
/// arguments. This is the only channel through which the surrounding
/// product learns that a purchase succeeded.
#[async_trait]
pub trait FulfillmentHandler: Send + Sync {
    async fn fulfill(&self, ledger: &CheckoutLedger) -> Result<(), FulfillmentError>;
}

/// Compile-time registry of named fulfillment operations.
#[derive(Default)]
pub struct FulfillmentRegistry {
    handlers: HashMap<String, Arc<dyn FulfillmentHandler>>,
}

impl FulfillmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        op: impl Into<String>,
        handler: Arc<dyn FulfillmentHandler>,
    ) -> &mut Self {
        self.handlers.insert(op.into(), handler);
        self
    }

    pub fn resolve(&self, op: &str) -> Result<Arc<dyn FulfillmentHandler>, FulfillmentError> {
        self.handlers
            .get(op)
            .cloned()
            .ok_or_else(|| FulfillmentError::UnknownOperation(op.to_string()))
    }

    pub fn registered_ops(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }
}

/// Default handler that records the fulfillment in the log stream. The
/// product deployment replaces this with handlers that mutate its own
/// domain (plan activation, download unlock).
pub struct LogFulfillment;

#[async_trait]
impl FulfillmentHandler for LogFulfillment {
    async fn fulfill(&self, ledger: &CheckoutLedger) -> Result<(), FulfillmentError> {
        info!(
            reference = %ledger.reference,
            op = %ledger.fulfillment.op,
            args = %ledger.fulfillment.args,
            "fulfillment executed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::ledger::tests::sample_ledger;

    #[tokio::test]
    async fn registry_resolves_registered_handlers() {
        let mut registry = FulfillmentRegistry::new();
        registry.register("activate_plan", Arc::new(LogFulfillment));

        let handler = registry
            .resolve("activate_plan")
            .expect("handler should resolve");
        handler
            .fulfill(&sample_ledger())
            .await
            .expect("log handler never fails");
    }

    #[test]
    fn unknown_operation_is_an_error() {
        let registry = FulfillmentRegistry::new();
        assert!(matches!(
            registry.resolve("missing_op"),
            Err(FulfillmentError::UnknownOperation(op)) if op == "missing_op"
        ));
    }
}
