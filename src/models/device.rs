//! Trusted device models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{session::Session, user::UserResponse};

/// Trusted device record. Only the keyed hash of the device id is stored.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrustedDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id_hash: String,
    pub user_agent: Option<String>,
    pub ip_first_used: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TrustedDevice {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Upsert payload keyed on (user_id, device_id_hash)
#[derive(Debug, Clone)]
pub struct NewTrustedDevice {
    pub user_id: Uuid,
    pub device_id_hash: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Device summary returned to the owning user (hash prefix only)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDeviceResponse {
    pub id: Uuid,
    pub fingerprint: String,
    pub user_agent: Option<String>,
    pub ip_first_used: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl From<TrustedDevice> for TrustedDeviceResponse {
    fn from(device: TrustedDevice) -> Self {
        Self {
            id: device.id,
            fingerprint: device.device_id_hash.chars().take(12).collect(),
            user_agent: device.user_agent,
            ip_first_used: device.ip_first_used,
            last_seen_at: device.last_seen_at,
            expires_at: device.expires_at,
            revoked: device.revoked_at.is_some(),
        }
    }
}

/// Active session row in the admin console
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub user: Option<UserResponse>,
}

impl ActiveSessionView {
    pub fn new(session: Session, user: Option<UserResponse>) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            created_at: session.created_at,
            expires_at: session.expires_at,
            ip: session.ip,
            user_agent: session.user_agent,
            user,
        }
    }
}

/// Active trusted device row in the admin console
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDeviceView {
    #[serde(flatten)]
    pub device: TrustedDeviceResponse,
    pub user_id: Uuid,
    pub user: Option<UserResponse>,
}

impl ActiveDeviceView {
    pub fn new(device: TrustedDevice, user: Option<UserResponse>) -> Self {
        Self {
            user_id: device.user_id,
            device: TrustedDeviceResponse::from(device),
            user,
        }
    }
}
