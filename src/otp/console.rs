//! Console OTP gateway for development

use super::{GatewayError, OtpGateway};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Prints codes to stdout and checks them from memory
#[derive(Default)]
pub struct ConsoleOtpGateway {
    codes: Mutex<HashMap<String, String>>,
}

impl ConsoleOtpGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpGateway for ConsoleOtpGateway {
    async fn send_code(&self, phone_e164: &str) -> Result<(), GatewayError> {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));

        println!();
        println!("========================================");
        println!("  OTP CODE FOR: {}", phone_e164);
        println!("  CODE: {}", code);
        println!("========================================");
        println!();

        self.codes.lock().await.insert(phone_e164.to_string(), code);
        Ok(())
    }

    /// 验证成功后作废，与真实网关一致
    async fn check_code(&self, phone_e164: &str, code: &str) -> Result<bool, GatewayError> {
        let mut codes = self.codes.lock().await;
        match codes.get(phone_e164) {
            Some(expected) if expected == code => {
                codes.remove(phone_e164);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
