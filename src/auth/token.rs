//! Signed, expiring tokens (HS256)
//!
//! Tokens carry only opaque reference ids. Roles and permissions are never
//! embedded; every verification is followed by a store lookup.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Minimum signing secret length for HS256
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    InvalidToken,
}

/// Claims types share a `typ` discriminator so that a token minted for one
/// purpose never verifies as another.
pub trait TokenClaims: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn kind(&self) -> &str;
}

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Session id
    pub sid: String,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn new(session_id: Uuid, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            sid: session_id.to_string(),
            typ: Self::KIND.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }
}

impl TokenClaims for SessionClaims {
    const KIND: &'static str = "session";

    fn kind(&self) -> &str {
        &self.typ
    }
}

/// Trusted-device token claims: raw device id plus owning user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceClaims {
    pub did: String,
    pub uid: String,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
}

impl DeviceClaims {
    pub fn new(
        device_id: &str,
        user_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            did: device_id.to_string(),
            uid: user_id.to_string(),
            typ: Self::KIND.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }
}

impl TokenClaims for DeviceClaims {
    const KIND: &'static str = "device";

    fn kind(&self) -> &str {
        &self.typ
    }
}

/// Impersonation token claims: real admin and assumed identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImpersonationClaims {
    pub adm: String,
    pub tgt: String,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
}

impl ImpersonationClaims {
    pub fn new(
        admin_user_id: Uuid,
        target_user_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            adm: admin_user_id.to_string(),
            tgt: target_user_id.to_string(),
            typ: Self::KIND.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }
}

impl TokenClaims for ImpersonationClaims {
    const KIND: &'static str = "impersonation";

    fn kind(&self) -> &str {
        &self.typ
    }
}

/// HMAC token codec bound to one signing secret
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Create codec from a signing secret
    pub fn new(secret: &Secret<String>) -> Result<Self, AppError> {
        let secret = secret.expose_secret();

        if secret.len() < MIN_SECRET_LEN {
            return Err(AppError::Config(format!(
                "token signing secret too short (min {} chars)",
                MIN_SECRET_LEN
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Sign claims
    pub fn sign<C: TokenClaims>(&self, claims: &C) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode {} token: {:?}", C::KIND, e);
            AppError::from(e)
        })
    }

    /// Verify signature, expiry and token kind
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Result<C, TokenError> {
        let claims = decode::<C>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(kind = C::KIND, "Token validation failed: {:?}", e);
                TokenError::InvalidToken
            })?
            .claims;

        if claims.kind() != C::KIND {
            tracing::debug!(
                "Token type mismatch: expected '{}', got '{}'",
                C::KIND,
                claims.kind()
            );
            return Err(TokenError::InvalidToken);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn codec(secret: &str) -> TokenCodec {
        TokenCodec::new(&Secret::new(secret.to_string())).unwrap()
    }

    const SECRET: &str = "test_secret_key_32_characters_long!";

    #[test]
    fn test_short_secret_rejected() {
        assert!(TokenCodec::new(&Secret::new("short".to_string())).is_err());
    }

    #[test]
    fn test_sign_and_verify_session_token() {
        let codec = codec(SECRET);
        let session_id = Uuid::new_v4();
        let now = Utc::now();

        let token = codec
            .sign(&SessionClaims::new(session_id, now, now + Duration::hours(12)))
            .unwrap();

        let claims: SessionClaims = codec.verify(&token).unwrap();
        assert_eq!(claims.sid, session_id.to_string());
        assert_eq!(claims.typ, "session");
    }

    #[test]
    fn test_token_carries_no_role_data() {
        let codec = codec(SECRET);
        let now = Utc::now();
        let token = codec
            .sign(&SessionClaims::new(Uuid::new_v4(), now, now + Duration::hours(1)))
            .unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        let payload = decode::<serde_json::Value>(&token, &DecodingKey::from_secret(&[]), &validation)
            .unwrap()
            .claims;

        let keys: Vec<&str> = payload
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        assert_eq!(keys.len(), 4);
        assert!(!keys.contains(&"role"));
        assert!(!keys.contains(&"roles"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = codec(SECRET);
        let now = Utc::now();
        let token = codec
            .sign(&SessionClaims::new(
                Uuid::new_v4(),
                now - Duration::hours(2),
                now - Duration::hours(1),
            ))
            .unwrap();

        assert_eq!(
            codec.verify::<SessionClaims>(&token),
            Err(TokenError::InvalidToken)
        );
    }

    #[test]
    fn test_tampered_token_rejected() {
        let codec = codec(SECRET);
        let now = Utc::now();
        let token = codec
            .sign(&SessionClaims::new(Uuid::new_v4(), now, now + Duration::hours(1)))
            .unwrap();

        // 改写签名的第一个字符
        let sig_start = token.rfind('.').unwrap() + 1;
        let first = token[sig_start..].chars().next().unwrap();
        let replacement = if first == 'A' { "B" } else { "A" };
        let tampered = format!(
            "{}{}{}",
            &token[..sig_start],
            replacement,
            &token[sig_start + 1..]
        );

        assert!(codec.verify::<SessionClaims>(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = Utc::now();
        let token = codec(SECRET)
            .sign(&SessionClaims::new(Uuid::new_v4(), now, now + Duration::hours(1)))
            .unwrap();

        let other = codec("another_secret_key_32_characters_long");
        assert!(other.verify::<SessionClaims>(&token).is_err());
    }

    #[test]
    fn test_token_kind_validation() {
        let codec = codec(SECRET);
        let now = Utc::now();

        let impersonation = codec
            .sign(&ImpersonationClaims::new(
                Uuid::new_v4(),
                Uuid::new_v4(),
                now,
                now + Duration::hours(1),
            ))
            .unwrap();

        // Should fail: impersonation token presented as a session token
        assert!(codec.verify::<SessionClaims>(&impersonation).is_err());
        assert!(codec.verify::<ImpersonationClaims>(&impersonation).is_ok());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let codec = codec(SECRET);
        assert!(codec.verify::<SessionClaims>("invalid_token").is_err());
        assert!(codec.verify::<DeviceClaims>("").is_err());
        assert!(codec.verify::<DeviceClaims>("a.b.c").is_err());
    }
}
