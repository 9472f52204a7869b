//! Audit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 审计操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    OtpSent,
    OtpVerifySuccess,
    OtpVerifyFail,
    LoginSuccess,
    LoginFailed,
    Logout,
    SessionRefresh,
    SessionRevoked,
    DeviceTrustRevoked,
    ImpersonationStarted,
    ImpersonationEnded,
    ImpersonationDenied,
    RoleUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::OtpSent => "OTP_SENT",
            AuditAction::OtpVerifySuccess => "OTP_VERIFY_SUCCESS",
            AuditAction::OtpVerifyFail => "OTP_VERIFY_FAIL",
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::Logout => "LOGOUT",
            AuditAction::SessionRefresh => "SESSION_REFRESH",
            AuditAction::SessionRevoked => "SESSION_REVOKED",
            AuditAction::DeviceTrustRevoked => "DEVICE_TRUST_REVOKED",
            AuditAction::ImpersonationStarted => "IMPERSONATION_STARTED",
            AuditAction::ImpersonationEnded => "IMPERSONATION_ENDED",
            AuditAction::ImpersonationDenied => "IMPERSONATION_DENIED",
            AuditAction::RoleUpdated => "ROLE_UPDATED",
        }
    }
}

/// Append-only audit log entry
#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub phone: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
