//! OTP 网关适配器
//!
//! The core only relies on the boolean contract below; provider response
//! shapes stay inside each implementation.

pub mod console;
pub mod twilio;

pub use console::ConsoleOtpGateway;
pub use twilio::TwilioVerifyGateway;

use crate::{
    config::{OtpConfig, OtpProvider},
    error::AppError,
};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("OTP provider timed out")]
    Timeout,

    #[error("OTP provider transport failure: {0}")]
    Transport(String),

    #[error("OTP provider rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("OTP provider misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Config(msg) => AppError::Config(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

/// SMS verification provider
#[async_trait]
pub trait OtpGateway: Send + Sync {
    /// Dispatch a one-time code to the phone
    async fn send_code(&self, phone_e164: &str) -> Result<(), GatewayError>;

    /// Whether the provider approves `code` for the phone
    async fn check_code(&self, phone_e164: &str, code: &str) -> Result<bool, GatewayError>;
}

/// Build the gateway selected by `otp.provider`
pub fn from_config(config: &OtpConfig) -> Result<Arc<dyn OtpGateway>, AppError> {
    match config.provider {
        OtpProvider::Twilio => Ok(Arc::new(TwilioVerifyGateway::from_config(config)?)),
        OtpProvider::Console => {
            tracing::warn!("Using console OTP gateway; codes are printed to stdout");
            Ok(Arc::new(ConsoleOtpGateway::new()))
        }
    }
}
