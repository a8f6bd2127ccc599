use crate::secrets::{SecretError, SecretFetcher};
use async_once_cell::OnceCell;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Returns whether the token proves a human submitted the form.
    ///
    /// Only a missing secret is an error. Every other failure, including the verification
    /// service being unreachable, counts as not verified.
    async fn verify(&self, token: &str, ip: Option<&str>) -> Result<bool, CaptchaError>;
}

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("Captcha secret key could not be retrieved: {0}")]
    SecretUnavailable(#[from] SecretError),
}

/// Verifies tokens against Cloudflare Turnstile's `siteverify` endpoint.
pub struct TurnstileVerifier<SecretFetcherT: SecretFetcher> {
    secret_fetcher: SecretFetcherT,
    secret_parameter_path: String,
    secret: OnceCell<String>,
    verify_url: String,
    timeout: Duration,
    client: Client,
}

impl<SecretFetcherT: SecretFetcher> TurnstileVerifier<SecretFetcherT> {
    pub fn new(
        secret_fetcher: SecretFetcherT,
        secret_parameter_path: impl Into<String>,
        verify_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            secret_fetcher,
            secret_parameter_path: secret_parameter_path.into(),
            secret: OnceCell::new(),
            verify_url: verify_url.into(),
            timeout,
            client: Client::new(),
        }
    }

    async fn secret(&self) -> Result<&str, CaptchaError> {
        let secret = self
            .secret
            .get_or_try_init(
                self.secret_fetcher
                    .get_parameter(&self.secret_parameter_path, true),
            )
            .await
            .map_err(|error| {
                error!(
                    "Could not retrieve captcha secret {}: {error}",
                    self.secret_parameter_path
                );
                error
            })?;
        Ok(secret.as_str())
    }

    async fn send_token(&self, payload: TurnstileVerifyPayload<'_>) -> Option<Response> {
        info!("Calling captcha verification endpoint.");
        match self
            .client
            .post(&self.verify_url)
            .timeout(self.timeout)
            .form(&payload)
            .send()
            .await
        {
            Ok(response) => Some(response),
            Err(error) if error.is_timeout() => {
                warn!("Captcha verification timed out after {:?}", self.timeout);
                None
            }
            Err(error) => {
                warn!("Error verifying captcha token: {error}");
                None
            }
        }
    }

    async fn process_response(response: Response) -> bool {
        if !response.status().is_success() {
            warn!(
                "Captcha verification endpoint returned status {}",
                response.status()
            );
            return false;
        }
        let response_body: TurnstileResponse = match response.json().await {
            Ok(body) => body,
            Err(error) => {
                warn!("Error reading body from captcha verification endpoint: {error}");
                return false;
            }
        };
        if !response_body.success {
            warn!(
                "Captcha token rejected: {:?}",
                response_body.error_codes
            );
        }
        response_body.success
    }
}

#[async_trait]
impl<SecretFetcherT: SecretFetcher> CaptchaVerifier for TurnstileVerifier<SecretFetcherT> {
    async fn verify(&self, token: &str, ip: Option<&str>) -> Result<bool, CaptchaError> {
        let payload = TurnstileVerifyPayload {
            secret: self.secret().await?,
            response: token,
            remoteip: ip,
        };
        let Some(response) = self.send_token(payload).await else {
            return Ok(false);
        };
        Ok(Self::process_response(response).await)
    }
}

#[derive(Serialize)]
struct TurnstileVerifyPayload<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

#[derive(Deserialize)]
struct TurnstileResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}
