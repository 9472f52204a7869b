//! 手机号规范化（E.164）

use crate::{config::OtpConfig, error::AppError};
use once_cell::sync::Lazy;
use regex::Regex;

static E164_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+[1-9]\d{1,14}$").expect("E.164 pattern is valid")
});

/// Normalises user input into E.164 using a default region for local numbers
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
    local_len: usize,
}

impl PhoneNormalizer {
    pub fn new(country_code: impl Into<String>, local_len: usize) -> Self {
        Self {
            country_code: country_code.into().trim_start_matches('+').to_string(),
            local_len,
        }
    }

    pub fn from_config(config: &OtpConfig) -> Self {
        Self::new(config.default_country_code.clone(), config.local_number_length)
    }

    /// `+` 开头的号码必须已是合法 E.164；否则只接受本地号码位数
    pub fn normalize(&self, input: &str) -> Result<String, AppError> {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();

        if compact.starts_with('+') {
            if E164_REGEX.is_match(&compact) {
                return Ok(compact);
            }
            return Err(invalid_phone());
        }

        let digits: String = compact.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() == self.local_len {
            let normalized = format!("+{}{}", self.country_code, digits);
            if E164_REGEX.is_match(&normalized) {
                return Ok(normalized);
            }
        }

        Err(invalid_phone())
    }
}

fn invalid_phone() -> AppError {
    AppError::BadRequest("Invalid phone number".to_string())
}
