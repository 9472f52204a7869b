//! In-memory store for tests and database-less development

use super::{AuditSink, DeviceStore, OtpAttemptStore, SessionStore, UserStore};
use crate::{
    error::AppError,
    models::{
        audit::{AuditAction, AuditLog},
        device::{NewTrustedDevice, TrustedDevice},
        otp::{OtpAttempt, OtpLimits, OtpReservation},
        session::{NewSession, Session},
        user::{Role, User},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Every store trait over `RwLock`-guarded maps.
///
/// Each trait method takes a single write lock, which gives the same
/// single-row atomicity the Postgres repositories rely on.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
    devices: RwLock<HashMap<(Uuid, String), TrustedDevice>>,
    otp_attempts: RwLock<Vec<OtpAttempt>>,
    audit_logs: RwLock<Vec<AuditLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a user out-of-band (admin CRUD stand-in)
    pub async fn insert_user(&self, phone_e164: &str, role: Role) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            phone_e164: phone_e164.to_string(),
            nickname: None,
            role,
            created_at: now,
            updated_at: now,
        };
        self.users.write().await.insert(user.id, user.clone());
        user
    }

    pub async fn audit_entries(&self) -> Vec<AuditLog> {
        self.audit_logs.read().await.clone()
    }

    pub async fn audit_actions(&self) -> Vec<AuditAction> {
        self.audit_logs.read().await.iter().map(|e| e.action).collect()
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Move a session's expiry into the past
    pub async fn expire_session(&self, id: Uuid) {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.expires_at = Utc::now() - Duration::seconds(1);
        }
    }

    /// Move every device of a user into the past
    pub async fn expire_devices(&self, user_id: Uuid) {
        let past = Utc::now() - Duration::seconds(1);
        for device in self.devices.write().await.values_mut() {
            if device.user_id == user_id {
                device.expires_at = past;
            }
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_phone(&self, phone_e164: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.phone_e164 == phone_e164)
            .cloned())
    }

    async fn upsert_by_phone(&self, phone_e164: &str, role_if_new: Role) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        let now = Utc::now();

        if let Some(user) = users.values_mut().find(|u| u.phone_e164 == phone_e164) {
            user.updated_at = now;
            return Ok(user.clone());
        }

        let user = User {
            id: Uuid::new_v4(),
            phone_e164: phone_e164.to_string(),
            nickname: None,
            role: role_if_new,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, AppError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|user| {
            user.role = role;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, new: &NewSession) -> Result<Session, AppError> {
        let session = Session {
            id: new.id,
            user_id: new.user_id,
            created_at: new.created_at,
            expires_at: new.expires_at,
            revoked_at: None,
            ip: new.ip.clone(),
            user_agent: new.user_agent.clone(),
        };
        self.sessions.write().await.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) if session.revoked_at.is_none() => {
                session.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active(
        &self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| user_id.map_or(true, |id| s.user_id == id) && s.is_active(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn upsert(&self, new: &NewTrustedDevice) -> Result<TrustedDevice, AppError> {
        let mut devices = self.devices.write().await;
        let key = (new.user_id, new.device_id_hash.clone());

        let device = devices
            .entry(key)
            .and_modify(|d| {
                d.last_seen_at = new.seen_at;
                if d.revoked_at.is_none() {
                    d.expires_at = new.expires_at;
                }
            })
            .or_insert_with(|| TrustedDevice {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                device_id_hash: new.device_id_hash.clone(),
                user_agent: new.user_agent.clone(),
                ip_first_used: new.ip.clone(),
                created_at: new.seen_at,
                last_seen_at: new.seen_at,
                expires_at: new.expires_at,
                revoked_at: None,
            });

        Ok(device.clone())
    }

    async fn find(
        &self,
        user_id: Uuid,
        device_id_hash: &str,
    ) -> Result<Option<TrustedDevice>, AppError> {
        Ok(self
            .devices
            .read()
            .await
            .get(&(user_id, device_id_hash.to_string()))
            .cloned())
    }

    async fn revoke(
        &self,
        user_id: Uuid,
        device_id_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(&(user_id, device_id_hash.to_string())) {
            Some(device) if device.revoked_at.is_none() => {
                device.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, AppError> {
        let mut devices: Vec<TrustedDevice> = self
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(devices)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TrustedDevice>, AppError> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn revoke_by_id(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut devices = self.devices.write().await;
        match devices.values_mut().find(|d| d.id == id) {
            Some(device) if device.revoked_at.is_none() => {
                device.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active(
        &self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustedDevice>, AppError> {
        let mut devices: Vec<TrustedDevice> = self
            .devices
            .read()
            .await
            .values()
            .filter(|d| user_id.map_or(true, |id| d.user_id == id) && d.is_active(now))
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(devices)
    }
}

#[async_trait]
impl OtpAttemptStore for MemoryStore {
    /// Count and push under one write lock
    async fn reserve(
        &self,
        phone_e164: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
        limits: OtpLimits,
    ) -> Result<OtpReservation, AppError> {
        let mut attempts = self.otp_attempts.write().await;

        let phone_attempts = attempts
            .iter()
            .filter(|a| a.phone_e164 == phone_e164 && a.created_at >= limits.since)
            .count() as i64;
        if phone_attempts >= limits.max_per_phone {
            return Ok(OtpReservation::PhoneLimited {
                attempts: phone_attempts,
            });
        }

        if let Some(ip) = ip {
            let ip_attempts = attempts
                .iter()
                .filter(|a| a.ip.as_deref() == Some(ip) && a.created_at >= limits.since)
                .count() as i64;
            if ip_attempts >= limits.max_per_ip {
                return Ok(OtpReservation::IpLimited {
                    attempts: ip_attempts,
                });
            }
        }

        attempts.push(OtpAttempt {
            id: Uuid::new_v4(),
            phone_e164: phone_e164.to_string(),
            ip: ip.map(|s| s.to_string()),
            created_at: at,
        });
        Ok(OtpReservation::Reserved)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: &AuditLog) -> Result<(), AppError> {
        self.audit_logs.write().await.push(entry.clone());
        Ok(())
    }
}
