use crate::checkout::ledger::CheckoutLedger;
use crate::providers::error::{PaymentError, PaymentResult};
use crate::providers::gateways::{
    FlutterwaveConfig, FlutterwaveGateway, PaystackConfig, PaystackGateway, RazorpayConfig,
    RazorpayGateway, StripeConfig, StripeGateway,
};
use crate::providers::provider::PaymentProvider;
use crate::providers::types::ProviderName;
use std::str::FromStr;

/// Gateway credentials and enablement, loaded once at startup and injected
/// into adapters at construction time.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub default_provider: Option<ProviderName>,
    pub enabled_providers: Vec<ProviderName>,
    pub stripe: Option<StripeConfig>,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
    pub razorpay: Option<RazorpayConfig>,
}

impl ProviderSettings {
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "stripe,paystack,flutterwave,razorpay".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            enabled_providers.push(ProviderName::from_str(value)?);
        }

        let default_provider = match std::env::var("DEFAULT_PAYMENT_PROVIDER") {
            Ok(value) => Some(ProviderName::from_str(&value)?),
            Err(_) => enabled_providers.first().copied(),
        };
        if let Some(default) = default_provider {
            if !enabled_providers.contains(&default) {
                return Err(PaymentError::ValidationError {
                    message: "default provider must be enabled".to_string(),
                    field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
                });
            }
        }

        let mut settings = Self {
            default_provider,
            enabled_providers,
            ..Self::default()
        };
        for provider in settings.enabled_providers.clone() {
            match provider {
                ProviderName::Stripe => settings.stripe = Some(StripeConfig::from_env()?),
                ProviderName::Paystack => settings.paystack = Some(PaystackConfig::from_env()?),
                ProviderName::Flutterwave => {
                    settings.flutterwave = Some(FlutterwaveConfig::from_env()?)
                }
                ProviderName::Razorpay => settings.razorpay = Some(RazorpayConfig::from_env()?),
            }
        }
        Ok(settings)
    }
}

/// Builds gateway adapters by provider name. Checkout-scoped credential
/// overrides come from the ledger, so multi-tenant deployments can route
/// each checkout through the tenant's own account.
pub struct ProviderRegistry {
    settings: ProviderSettings,
}

impl ProviderRegistry {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            settings: ProviderSettings::from_env()?,
        })
    }

    pub fn with_settings(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    fn not_configured(provider: ProviderName) -> PaymentError {
        PaymentError::ValidationError {
            message: format!("provider {} is not configured", provider),
            field: Some("provider".to_string()),
        }
    }

    fn build(
        &self,
        provider: ProviderName,
        overrides: Option<&CheckoutLedger>,
    ) -> PaymentResult<Box<dyn PaymentProvider>> {
        if !self.settings.enabled_providers.contains(&provider) {
            return Err(PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            });
        }

        match provider {
            ProviderName::Stripe => {
                let mut config = self
                    .settings
                    .stripe
                    .clone()
                    .ok_or_else(|| Self::not_configured(provider))?;
                if let Some(ledger) = overrides {
                    config.apply_overrides(&ledger.provider_keys);
                }
                Ok(Box::new(StripeGateway::new(config)?))
            }
            ProviderName::Paystack => {
                let mut config = self
                    .settings
                    .paystack
                    .clone()
                    .ok_or_else(|| Self::not_configured(provider))?;
                if let Some(ledger) = overrides {
                    config.apply_overrides(&ledger.provider_keys);
                }
                Ok(Box::new(PaystackGateway::new(config)?))
            }
            ProviderName::Flutterwave => {
                let mut config = self
                    .settings
                    .flutterwave
                    .clone()
                    .ok_or_else(|| Self::not_configured(provider))?;
                if let Some(ledger) = overrides {
                    config.apply_overrides(&ledger.provider_keys);
                }
                Ok(Box::new(FlutterwaveGateway::new(config)?))
            }
            ProviderName::Razorpay => {
                let mut config = self
                    .settings
                    .razorpay
                    .clone()
                    .ok_or_else(|| Self::not_configured(provider))?;
                if let Some(ledger) = overrides {
                    config.apply_overrides(&ledger.provider_keys);
                }
                Ok(Box::new(RazorpayGateway::new(config)?))
            }
        }
    }

    pub fn provider(&self, provider: ProviderName) -> PaymentResult<Box<dyn PaymentProvider>> {
        self.build(provider, None)
    }

    /// Adapter configured for one specific checkout, with the ledger's
    /// per-tenant key overrides applied.
    pub fn provider_for_ledger(
        &self,
        ledger: &CheckoutLedger,
    ) -> PaymentResult<Box<dyn PaymentProvider>> {
        self.build(ledger.provider, Some(ledger))
    }

    pub fn default_provider(&self) -> PaymentResult<Box<dyn PaymentProvider>> {
        let provider = self
            .settings
            .default_provider
            .ok_or(PaymentError::ValidationError {
                message: "no default payment provider configured".to_string(),
                field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
            })?;
        self.provider(provider)
    }

    pub fn list_enabled(&self) -> Vec<ProviderName> {
        self.settings.enabled_providers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::ledger::tests::sample_ledger;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            default_provider: Some(ProviderName::Stripe),
            enabled_providers: vec![ProviderName::Stripe, ProviderName::Paystack],
            stripe: Some(StripeConfig {
                secret_key: "sk_platform".to_string(),
                webhook_secret: "whsec_platform".to_string(),
                ..StripeConfig::default()
            }),
            paystack: Some(PaystackConfig {
                secret_key: "sk_paystack".to_string(),
                ..PaystackConfig::default()
            }),
            flutterwave: None,
            razorpay: None,
        }
    }

    #[test]
    fn enabled_providers_are_constructed() {
        let registry = ProviderRegistry::with_settings(settings());
        assert!(registry.provider(ProviderName::Stripe).is_ok());
        assert!(registry.provider(ProviderName::Paystack).is_ok());
        assert_eq!(registry.list_enabled().len(), 2);
    }

    #[test]
    fn disabled_provider_is_rejected() {
        let registry = ProviderRegistry::with_settings(settings());
        assert!(matches!(
            registry.provider(ProviderName::Razorpay),
            Err(PaymentError::ValidationError { .. })
        ));
    }

    #[test]
    fn ledger_overrides_select_tenant_credentials() {
        let registry = ProviderRegistry::with_settings(settings());
        let mut ledger = sample_ledger();
        ledger
            .provider_keys
            .insert("secret_key".to_string(), "sk_tenant".to_string());

        // Building with overrides succeeds; the tenant key replaces the
        // platform key inside the adapter's config.
        assert!(registry.provider_for_ledger(&ledger).is_ok());
    }

    #[test]
    fn default_provider_resolves() {
        let registry = ProviderRegistry::with_settings(settings());
        let provider = registry.default_provider().expect("default should build");
        assert_eq!(provider.name(), ProviderName::Stripe);
    }
}
