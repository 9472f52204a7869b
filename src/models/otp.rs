//! OTP attempt ledger (rate limiting only)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OtpAttempt {
    pub id: Uuid,
    pub phone_e164: String,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sliding-window limits checked when reserving a send slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpLimits {
    pub since: DateTime<Utc>,
    pub max_per_phone: i64,
    pub max_per_ip: i64,
}

/// 发送名额预留结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpReservation {
    /// An attempt row was written; it counts even if the send later fails
    Reserved,
    PhoneLimited { attempts: i64 },
    IpLimited { attempts: i64 },
}
