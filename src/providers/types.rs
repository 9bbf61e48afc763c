use crate::providers::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Stripe,
    Paystack,
    Flutterwave,
    Razorpay,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Stripe => "stripe",
            ProviderName::Paystack => "paystack",
            ProviderName::Flutterwave => "flutterwave",
            ProviderName::Razorpay => "razorpay",
        }
    }

    pub const ALL: [ProviderName; 4] = [
        ProviderName::Stripe,
        ProviderName::Paystack,
        ProviderName::Flutterwave,
        ProviderName::Razorpay,
    ];
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(ProviderName::Stripe),
            "paystack" => Ok(ProviderName::Paystack),
            "flutterwave" => Ok(ProviderName::Flutterwave),
            "razorpay" => Ok(ProviderName::Razorpay),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Provider-hosted checkout created for a ledger entry. The payer's browser
/// is sent to `redirect_url`; `provider_session_id` is what the provider
/// knows the checkout as (session, payment link or subscription id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub redirect_url: String,
    pub provider_session_id: Option<String>,
}

/// Result of actively confirming a checkout with the provider, taken on the
/// payer's browser return. `failed` is set only when the provider reports a
/// terminal non-success status, not when confirmation is still pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub paid: bool,
    pub failed: bool,
    pub provider_subscription_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

/// A verified "payment succeeded" notification, normalized across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentEvent {
    pub provider: ProviderName,
    pub reference: String,
    pub provider_subscription_id: Option<String>,
}

/// What a provider made of an inbound webhook payload. Event types other
/// than the provider's payment-success events are ignored, never errors.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Fulfillment(FulfillmentEvent),
    Ignored { event_type: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_round_trips() {
        for provider in ProviderName::ALL {
            assert_eq!(
                ProviderName::from_str(provider.as_str()).ok(),
                Some(provider)
            );
        }
        assert!(ProviderName::from_str("paypal").is_err());
    }

    #[test]
    fn fulfillment_event_serializes_to_json() {
        let event = FulfillmentEvent {
            provider: ProviderName::Paystack,
            reference: "sx_abc123".to_string(),
            provider_subscription_id: Some("SUB_xyz".to_string()),
        };
        let json = serde_json::to_value(&event).expect("serialization should succeed");
        assert_eq!(json["provider"], "paystack");
        assert_eq!(json["reference"], "sx_abc123");
    }
}
