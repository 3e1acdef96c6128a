//! CAPTCHA verification of job requests.

use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use std::net::IpAddr;

use crate::config::CaptchaConfig;

/// Checks a client-supplied CAPTCHA token
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// True if the token is accepted. Transport failures count as rejection.
    async fn verify(&self, token: &str, remote_ip: IpAddr) -> bool;
}

/// Google reCAPTCHA `siteverify`
pub struct RecaptchaVerifier {
    client: reqwest::Client,
    secret_key: String,
    verify_url: String,
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl RecaptchaVerifier {
    pub fn new(config: &CaptchaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: config.secret_key.clone(),
            verify_url: config.verify_url.clone(),
        }
    }

    async fn site_verify(&self, token: &str, remote_ip: IpAddr) -> Result<SiteVerifyResponse, reqwest::Error> {
        let remote_ip = remote_ip.to_string();
        self.client
            .post(&self.verify_url)
            .query(&[
                ("secret", self.secret_key.as_str()),
                ("response", token),
                ("remoteip", remote_ip.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<SiteVerifyResponse>()
            .await
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, token: &str, remote_ip: IpAddr) -> bool {
        match self.site_verify(token, remote_ip).await {
            Ok(response) => {
                if !response.success {
                    warn!("CAPTCHA rejected for {}: {:?}", remote_ip, response.error_codes);
                }
                response.success
            }
            Err(e) => {
                warn!("CAPTCHA verification request failed: {}", e);
                false
            }
        }
    }
}
