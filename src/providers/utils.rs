use crate::providers::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Authentication schemes used by the supported gateways. Stripe and
/// Razorpay authenticate with basic auth, Paystack and Flutterwave with a
/// bearer secret key.
#[derive(Debug, Clone, Copy)]
pub enum ApiAuth<'a> {
    Bearer(&'a str),
    Basic(&'a str, Option<&'a str>),
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

enum RequestBody<'a> {
    None,
    Json(&'a JsonValue),
    Form(&'a [(String, String)]),
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: ApiAuth<'_>,
        body: Option<&JsonValue>,
    ) -> PaymentResult<T> {
        let body = match body {
            Some(payload) => RequestBody::Json(payload),
            None => RequestBody::None,
        };
        self.request(method, url, auth, body).await
    }

    /// Form-encoded request body, used by the Stripe API which does not
    /// accept JSON request bodies.
    pub async fn request_form<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: ApiAuth<'_>,
        form: &[(String, String)],
    ) -> PaymentResult<T> {
        self.request(method, url, auth, RequestBody::Form(form))
            .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: ApiAuth<'_>,
        body: RequestBody<'_>,
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            request = match auth {
                ApiAuth::Bearer(token) => request.bearer_auth(token),
                ApiAuth::Basic(user, password) => request.basic_auth(user, password),
            };
            request = match &body {
                RequestBody::None => request,
                RequestBody::Json(payload) => request.json(payload),
                RequestBody::Form(fields) => request.form(fields),
            };

            let response = request
                .send()
                .await
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("provider request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::ProviderError {
                                provider: "http".to_string(),
                                message: format!("invalid provider JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: "provider rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "provider server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(PaymentError::ProviderError {
                        provider: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: "provider request failed".to_string(),
        }))
    }
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn hmac_sha512_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha256_hex(payload, secret);
    !computed.is_empty() && secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha512_hex(payload, secret);
    !computed.is_empty() && secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

/// Constant-time comparison for signature material.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_verification_accepts_matching_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        let signature = hmac_sha512_hex(payload, "secret");
        assert!(verify_hmac_sha512_hex(payload, "secret", &signature));
        assert!(!verify_hmac_sha512_hex(payload, "other", &signature));
    }

    #[test]
    fn hmac_verification_detects_invalid_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        assert!(!verify_hmac_sha256_hex(
            payload,
            "secret",
            "not-a-valid-signature"
        ));
        assert!(!verify_hmac_sha512_hex(
            payload,
            "secret",
            "not-a-valid-signature"
        ));
    }
}
