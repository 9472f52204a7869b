//! Persistence layer
//!
//! Services depend on the store traits below; `Postgres` repositories back the
//! server binary and `MemoryStore` backs tests and database-less development.

pub mod audit_repo;
pub mod device_repo;
pub mod memory;
pub mod otp_repo;
pub mod session_repo;
pub mod user_repo;

pub use audit_repo::AuditRepository;
pub use device_repo::DeviceRepository;
pub use memory::MemoryStore;
pub use otp_repo::OtpAttemptRepository;
pub use session_repo::SessionRepository;
pub use user_repo::UserRepository;

use crate::{
    error::AppError,
    models::{
        audit::AuditLog,
        device::{NewTrustedDevice, TrustedDevice},
        otp::{OtpLimits, OtpReservation},
        session::{NewSession, Session},
        user::{Role, User},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_by_phone(&self, phone_e164: &str) -> Result<Option<User>, AppError>;

    /// Insert the user if the phone is new (with `role_if_new`), otherwise
    /// touch `updated_at` and return the existing row unchanged.
    async fn upsert_by_phone(&self, phone_e164: &str, role_if_new: Role) -> Result<User, AppError>;

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, AppError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &NewSession) -> Result<Session, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// Set `revoked_at` if unset. Returns whether a row changed.
    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Unrevoked, unexpired sessions, newest first
    async fn list_active(
        &self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Atomic upsert keyed on `(user_id, device_id_hash)`
    async fn upsert(&self, device: &NewTrustedDevice) -> Result<TrustedDevice, AppError>;

    async fn find(
        &self,
        user_id: Uuid,
        device_id_hash: &str,
    ) -> Result<Option<TrustedDevice>, AppError>;

    /// Set `revoked_at` if unset. Returns whether a row changed.
    async fn revoke(
        &self,
        user_id: Uuid,
        device_id_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TrustedDevice>, AppError>;

    /// Revoke by record id (admin console). Same first-write-wins rule.
    async fn revoke_by_id(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Unrevoked, unexpired devices, most recently seen first
    async fn list_active(
        &self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustedDevice>, AppError>;
}

#[async_trait]
pub trait OtpAttemptStore: Send + Sync {
    /// Count the phone and IP windows and record the attempt as one atomic
    /// step. Nothing is written when either limit is already reached.
    async fn reserve(
        &self,
        phone_e164: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
        limits: OtpLimits,
    ) -> Result<OtpReservation, AppError>;
}

/// Append-only audit sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLog) -> Result<(), AppError>;
}

/// Store handles shared by all services
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub otp_attempts: Arc<dyn OtpAttemptStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    pub fn postgres(db: PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(db.clone())),
            sessions: Arc::new(SessionRepository::new(db.clone())),
            devices: Arc::new(DeviceRepository::new(db.clone())),
            otp_attempts: Arc::new(OtpAttemptRepository::new(db.clone())),
            audit: Arc::new(AuditRepository::new(db)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            devices: store.clone(),
            otp_attempts: store.clone(),
            audit: store,
        }
    }
}
