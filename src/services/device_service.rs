//! 受信任设备服务

use crate::{
    auth::token::{DeviceClaims, TokenCodec},
    error::AppError,
    models::{
        audit::AuditAction,
        auth::{ClientContext, IssuedDevice},
        device::{NewTrustedDevice, TrustedDevice},
    },
    repository::DeviceStore,
    services::audit_service::{Actor, AuditLogParams, AuditService},
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// 设备信任有效期（天）
pub const DEVICE_TTL_DAYS: i64 = 30;

/// Raw device id length in bytes (256 bits)
const DEVICE_ID_BYTES: usize = 32;

/// A device token that passed signature, hash and record checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDevice {
    pub user_id: Uuid,
    pub device_id: String,
}

/// Random 256-bit device identifier, hex encoded
pub fn generate_device_id() -> String {
    let mut bytes = [0u8; DEVICE_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct DeviceService {
    devices: Arc<dyn DeviceStore>,
    codec: TokenCodec,
    hash_key: Secret<String>,
    audit: Arc<AuditService>,
}

impl DeviceService {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        codec: TokenCodec,
        hash_key: Secret<String>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            devices,
            codec,
            hash_key,
            audit,
        }
    }

    /// HMAC-SHA256 of the raw id; only this digest is ever stored
    pub fn hash_device_id(&self, device_id: &str) -> Result<String, AppError> {
        let mut mac = HmacSha256::new_from_slice(self.hash_key.expose_secret().as_bytes())
            .map_err(|e| AppError::Internal(format!("device hash key rejected: {}", e)))?;
        mac.update(device_id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Register (or refresh) the device and sign the device token
    pub async fn create_trusted_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        client: &ClientContext,
    ) -> Result<IssuedDevice, AppError> {
        let now = Utc::now();
        let expires_at = now + Duration::days(DEVICE_TTL_DAYS);

        let device = self
            .devices
            .upsert(&NewTrustedDevice {
                user_id,
                device_id_hash: self.hash_device_id(device_id)?,
                user_agent: client.user_agent.clone(),
                ip: client.ip.clone(),
                seen_at: now,
                expires_at,
            })
            .await?;

        // 撤销是终态，不再为同一设备签发令牌
        if device.revoked_at.is_some() {
            tracing::warn!(user_id = %user_id, device = %device.id, "Refusing to re-trust a revoked device");
            return Err(AppError::Forbidden(
                "This device's trust has been revoked".to_string(),
            ));
        }

        let token = self
            .codec
            .sign(&DeviceClaims::new(device_id, user_id, now, device.expires_at))?;

        tracing::info!(user_id = %user_id, device = %device.id, "Trusted device registered");

        Ok(IssuedDevice {
            token,
            expires_at: device.expires_at,
        })
    }

    /// `None` for any token that does not map to an active device record
    pub async fn verify_trusted_device(
        &self,
        token: &str,
    ) -> Result<Option<VerifiedDevice>, AppError> {
        if token.is_empty() {
            return Ok(None);
        }

        let Ok(claims) = self.codec.verify::<DeviceClaims>(token) else {
            tracing::debug!("Device token failed verification");
            return Ok(None);
        };

        let Ok(user_id) = Uuid::parse_str(&claims.uid) else {
            return Ok(None);
        };

        let hash = self.hash_device_id(&claims.did)?;
        let Some(device) = self.devices.find(user_id, &hash).await? else {
            tracing::debug!(user_id = %user_id, "Trusted device record not found");
            return Ok(None);
        };

        if !device.is_active(Utc::now()) {
            tracing::debug!(
                user_id = %user_id,
                revoked = device.revoked_at.is_some(),
                "Trusted device no longer active"
            );
            return Ok(None);
        }

        Ok(Some(VerifiedDevice {
            user_id,
            device_id: claims.did,
        }))
    }

    /// Revoke one of the actor's own devices by its raw id
    pub async fn revoke_device(
        &self,
        actor: Actor,
        device_id: &str,
        client: &ClientContext,
    ) -> Result<bool, AppError> {
        let hash = self.hash_device_id(device_id)?;
        let revoked = self
            .devices
            .revoke(actor.user_id, &hash, Utc::now())
            .await?;

        if revoked {
            tracing::info!(user_id = %actor.user_id, impersonated_by = ?actor.impersonated_by, "Trusted device revoked");
            self.audit
                .record(
                    AuditLogParams::new(AuditAction::DeviceTrustRevoked)
                        .actor(actor)
                        .client(client)
                        .metadata(json!({ "deviceFingerprint": fingerprint(&hash) })),
                )
                .await;
        }

        Ok(revoked)
    }

    /// Revoke any user's device by record id (MANAGER and above)
    pub async fn revoke_by_id(
        &self,
        actor: Actor,
        id: Uuid,
        client: &ClientContext,
    ) -> Result<bool, AppError> {
        let Some(device) = self.devices.find_by_id(id).await? else {
            return Err(AppError::NotFound("Trusted device not found".to_string()));
        };

        let revoked = self.devices.revoke_by_id(id, Utc::now()).await?;
        if !revoked {
            tracing::debug!(device = %id, "Trusted device already revoked");
            return Ok(false);
        }

        tracing::info!(device = %id, actor_id = %actor.user_id, "Trusted device revoked by record id");
        self.audit
            .record(
                AuditLogParams::new(AuditAction::DeviceTrustRevoked)
                    .actor(actor)
                    .client(client)
                    .metadata(json!({
                        "deviceId": device.id,
                        "deviceUserId": device.user_id,
                        "deviceFingerprint": fingerprint(&device.device_id_hash),
                    })),
            )
            .await;

        Ok(true)
    }

    pub async fn list_devices(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, AppError> {
        self.devices.list_for_user(user_id).await
    }

    /// Active devices across users, optionally for one user
    pub async fn list_active(&self, user_id: Option<Uuid>) -> Result<Vec<TrustedDevice>, AppError> {
        self.devices.list_active(user_id, Utc::now()).await
    }
}

fn fingerprint(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
