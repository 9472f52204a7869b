//! Authentication-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::user::{Role, UserResponse};

/// Best-effort client metadata captured for sessions, devices and audit entries
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn new(ip: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip: ip.map(|s| s.to_string()),
            user_agent: user_agent.map(|s| s.to_string()),
        }
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// OTP start request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OtpStartRequest {
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
}

/// OTP verify request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OtpVerifyRequest {
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 4, max = 10))]
    pub code: String,
    #[serde(default)]
    pub trust_device: bool,
}

/// Admin bootstrap / direct login request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapLoginRequest {
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 256))]
    pub bootstrap_code: String,
}

/// Trusted device revoke request; without `deviceId` the device in the
/// current `device` cookie is revoked
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RevokeDeviceRequest {
    #[validate(length(equal = 64))]
    pub device_id: Option<String>,
}

/// Role update request (target by id or phone)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    pub user_id: Option<Uuid>,
    pub phone: Option<String>,
    pub role: Role,
}

/// Start impersonation request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImpersonationRequest {
    pub target_user_id: Uuid,
}

/// Issued session grant (token goes into the `session` cookie)
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issued trusted-device grant (token goes into the `device` cookie)
#[derive(Debug, Clone)]
pub struct IssuedDevice {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful interactive or bootstrap login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: super::user::User,
    pub session: IssuedSession,
    pub device: Option<IssuedDevice>,
}

/// Outcome of OTP start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpStartOutcome {
    Sent,
    RateLimited,
}

/// Login response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: UserResponse,
    pub session_expires_at: DateTime<Utc>,
    pub trusted_device_expires_at: Option<DateTime<Utc>>,
}

impl From<&LoginOutcome> for LoginResponse {
    fn from(outcome: &LoginOutcome) -> Self {
        Self {
            success: true,
            user: UserResponse::from(&outcome.user),
            session_expires_at: outcome.session.expires_at,
            trusted_device_expires_at: outcome.device.as_ref().map(|d| d.expires_at),
        }
    }
}

/// Current identity summary (`GET /api/auth/me`)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub success: bool,
    pub authenticated: bool,
    pub user: MeUser,
    pub impersonation: ImpersonationSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeUser {
    #[serde(flatten)]
    pub user: UserResponse,
    pub is_admin: bool,
    pub is_manager: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationSummary {
    pub is_impersonating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonated_user_id: Option<Uuid>,
}

/// `GET /api/admin/devices` filter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDevicesQuery {
    pub user_id: Option<Uuid>,
}

/// `DELETE /api/admin/devices/{id}?type=session|device`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevokeRecordQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}
