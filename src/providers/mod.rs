pub mod error;
pub mod gateways;
pub mod provider;
pub mod registry;
pub mod types;
pub mod utils;

/// Absolute URL of the browser-return verification endpoint for a
/// provider, derived from the service's public base URL.
pub fn verify_return_url(provider: &str) -> String {
    let base = std::env::var("CHECKOUT_PUBLIC_URL")
        .unwrap_or_else(|_| "http://localhost:8000".to_string());
    format!("{}/pay/{}/verify", base.trim_end_matches('/'), provider)
}
