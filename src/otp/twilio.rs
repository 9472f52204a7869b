//! Twilio Verify gateway (REST, form-encoded)

use super::{GatewayError, OtpGateway};
use crate::config::OtpConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

pub struct TwilioVerifyGateway {
    client: Client,
    base_url: String,
    account_sid: String,
    auth_token: Secret<String>,
    service_sid: String,
    locale: String,
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    status: String,
}

impl TwilioVerifyGateway {
    pub fn from_config(config: &OtpConfig) -> Result<Self, GatewayError> {
        let missing = |name: &str| GatewayError::Config(format!("otp.{} is not set", name));

        let account_sid = config
            .twilio_account_sid
            .clone()
            .ok_or_else(|| missing("twilio_account_sid"))?;
        let auth_token = config
            .twilio_auth_token
            .clone()
            .ok_or_else(|| missing("twilio_auth_token"))?;
        let service_sid = config
            .twilio_verify_service_sid
            .clone()
            .ok_or_else(|| missing("twilio_verify_service_sid"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.twilio_base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            service_sid,
            locale: config.locale.clone(),
        })
    }

    fn service_url(&self, resource: &str) -> String {
        format!("{}/v2/Services/{}/{}", self.base_url, self.service_sid, resource)
    }

    async fn post_form(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(self.service_url(resource))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(form)
            .send()
            .await?;

        Ok(response)
    }

    async fn rejected(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        GatewayError::Rejected { status, message }
    }
}

#[async_trait]
impl OtpGateway for TwilioVerifyGateway {
    async fn send_code(&self, phone_e164: &str) -> Result<(), GatewayError> {
        let response = self
            .post_form(
                "Verifications",
                &[("To", phone_e164), ("Channel", "sms"), ("Locale", self.locale.as_str())],
            )
            .await?;

        if !response.status().is_success() {
            let err = Self::rejected(response).await;
            tracing::error!(error = %err, "Twilio verification send failed");
            return Err(err);
        }

        Ok(())
    }

    async fn check_code(&self, phone_e164: &str, code: &str) -> Result<bool, GatewayError> {
        let response = self
            .post_form("VerificationCheck", &[("To", phone_e164), ("Code", code)])
            .await?;

        // 验证已过期或已被使用时 Twilio 返回 404
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        if !response.status().is_success() {
            let err = Self::rejected(response).await;
            tracing::error!(error = %err, "Twilio verification check failed");
            return Err(err);
        }

        let body: VerificationResponse = response.json().await?;
        Ok(body.status == "approved")
    }
}
