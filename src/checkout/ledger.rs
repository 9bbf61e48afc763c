use crate::providers::types::ProviderName;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Onetime,
    Recurring,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Onetime => "onetime",
            PaymentKind::Recurring => "recurring",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "onetime" => Some(PaymentKind::Onetime),
            "recurring" => Some(PaymentKind::Recurring),
            _ => None,
        }
    }
}

/// Billing interval for recurring checkouts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(BillingInterval::Monthly),
            "yearly" => Some(BillingInterval::Yearly),
            _ => None,
        }
    }
}

/// Checkout lifecycle state.
///
/// `paid` stays true after cancellation: a cancelled subscription was still
/// paid for, it just stops recurring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    Created,
    AwaitingRedirect,
    AwaitingConfirmation,
    Paid,
    Failed,
    Cancelled,
}

impl CheckoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Created => "created",
            CheckoutState::AwaitingRedirect => "awaiting_redirect",
            CheckoutState::AwaitingConfirmation => "awaiting_confirmation",
            CheckoutState::Paid => "paid",
            CheckoutState::Failed => "failed",
            CheckoutState::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(CheckoutState::Created),
            "awaiting_redirect" => Some(CheckoutState::AwaitingRedirect),
            "awaiting_confirmation" => Some(CheckoutState::AwaitingConfirmation),
            "paid" => Some(CheckoutState::Paid),
            "failed" => Some(CheckoutState::Failed),
            "cancelled" => Some(CheckoutState::Cancelled),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> Vec<CheckoutState> {
        match self {
            CheckoutState::Created => vec![
                CheckoutState::AwaitingRedirect,
                CheckoutState::Failed,
            ],
            CheckoutState::AwaitingRedirect => vec![
                CheckoutState::AwaitingConfirmation,
                CheckoutState::Paid,
                CheckoutState::Failed,
            ],
            CheckoutState::AwaitingConfirmation => {
                vec![CheckoutState::Paid, CheckoutState::Failed]
            }
            CheckoutState::Paid => vec![CheckoutState::Cancelled],
            // Terminal states
            CheckoutState::Failed => vec![],
            CheckoutState::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, next: CheckoutState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable fulfillment operation descriptor: a named operation plus its
/// argument payload, resolved through the handler registry at dispatch
/// time. Stored instead of any in-memory callback so it survives the hours
/// or days between checkout creation and webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FulfillmentOp {
    pub op: String,
    #[serde(default)]
    pub args: JsonValue,
}

/// Persisted record of a purchase attempt. The `reference` correlates the
/// checkout across the provider redirect and the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutLedger {
    pub id: Uuid,
    pub reference: String,
    pub price: BigDecimal,
    pub currency: String,
    pub payment_kind: PaymentKind,
    pub frequency: Option<BillingInterval>,
    pub provider: ProviderName,
    /// Per-checkout credential overrides (multi-tenant keys). Keys are
    /// provider-specific setting names (`secret_key`, `webhook_secret`, ...).
    pub provider_keys: HashMap<String, String>,
    pub email: String,
    pub callback_url: String,
    pub fulfillment: FulfillmentOp,
    pub provider_session_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub paid: bool,
    pub state: CheckoutState,
    pub meta: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutLedger {
    pub fn is_recurring(&self) -> bool {
        self.payment_kind == PaymentKind::Recurring
    }

    /// Provider-facing product description, built from descriptive meta.
    pub fn description(&self) -> String {
        self.meta
            .get("title")
            .or_else(|| self.meta.get("plan_name"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("Checkout {}", self.reference))
    }

    /// Deterministic key identifying a provider-side plan by
    /// (amount, currency, interval). Recurring checkouts with the same key
    /// reuse the same plan instead of creating duplicates.
    pub fn plan_key(&self) -> Option<String> {
        let interval = self.frequency?;
        Some(format!(
            "plan_{}_{}_{}",
            self.price.normalized(),
            self.currency.to_lowercase(),
            interval.as_str()
        ))
    }

    pub fn provider_key(&self, name: &str) -> Option<&str> {
        self.provider_keys.get(name).map(|v| v.as_str())
    }
}

pub fn new_reference() -> String {
    format!("sx_{}", Uuid::new_v4().simple())
}
