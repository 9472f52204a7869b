//! 认证服务：OTP 登录、静默续期、登出、管理员引导登录

use crate::{
    auth::{phone::PhoneNormalizer, secret::constant_time_eq},
    config::AppConfig,
    error::AppError,
    models::{
        audit::AuditAction,
        auth::{ClientContext, LoginOutcome, OtpStartOutcome},
        otp::{OtpLimits, OtpReservation},
        user::{Role, User},
    },
    otp::{GatewayError, OtpGateway},
    repository::{OtpAttemptStore, UserStore},
    services::{
        audit_service::{AuditLogParams, AuditService},
        device_service::{generate_device_id, DeviceService},
        impersonation_service::ImpersonationService,
        session_service::{RevocationReason, SessionOrigin, SessionService},
    },
};
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use std::{future::Future, sync::Arc};

/// 速率限制窗口（秒）
pub const OTP_WINDOW_SECS: i64 = 60;
pub const MAX_OTP_PER_PHONE: i64 = 3;
pub const MAX_OTP_PER_IP: i64 = 10;

pub struct AuthService {
    users: Arc<dyn UserStore>,
    otp_attempts: Arc<dyn OtpAttemptStore>,
    gateway: Arc<dyn OtpGateway>,
    sessions: Arc<SessionService>,
    devices: Arc<DeviceService>,
    impersonation: Arc<ImpersonationService>,
    audit: Arc<AuditService>,
    phone: PhoneNormalizer,
    bootstrap_phone: Option<String>,
    bootstrap_code: Option<Secret<String>>,
    gateway_timeout: std::time::Duration,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AppConfig,
        users: Arc<dyn UserStore>,
        otp_attempts: Arc<dyn OtpAttemptStore>,
        gateway: Arc<dyn OtpGateway>,
        sessions: Arc<SessionService>,
        devices: Arc<DeviceService>,
        impersonation: Arc<ImpersonationService>,
        audit: Arc<AuditService>,
    ) -> Result<Self, AppError> {
        let phone = PhoneNormalizer::from_config(&config.otp);

        // 引导手机号在启动时规范化，格式错误视为配置错误
        let bootstrap_phone = config
            .security
            .bootstrap_admin_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                phone.normalize(p).map_err(|_| {
                    AppError::Config("security.bootstrap_admin_phone is not a valid phone number".to_string())
                })
            })
            .transpose()?;

        Ok(Self {
            users,
            otp_attempts,
            gateway,
            sessions,
            devices,
            impersonation,
            audit,
            phone,
            bootstrap_phone,
            bootstrap_code: config.bootstrap_code().map(|c| Secret::new(c.to_string())),
            gateway_timeout: std::time::Duration::from_secs(config.otp.timeout_secs),
        })
    }

    fn is_bootstrap_phone(&self, phone_e164: &str) -> bool {
        self.bootstrap_phone.as_deref() == Some(phone_e164)
    }

    /// 网关调用统一加超时上限
    async fn call_gateway<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, AppError> {
        let result = match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        };

        result.map_err(|e| {
            tracing::error!(operation, error = %e, "OTP gateway call failed");
            AppError::from(e)
        })
    }

    /// OTP 第一步：规范化手机号、限流、发送验证码
    pub async fn start_otp(
        &self,
        phone_input: &str,
        client: &ClientContext,
    ) -> Result<OtpStartOutcome, AppError> {
        let phone = self.phone.normalize(phone_input)?;
        let now = Utc::now();
        let limits = OtpLimits {
            since: now - Duration::seconds(OTP_WINDOW_SECS),
            max_per_phone: MAX_OTP_PER_PHONE,
            max_per_ip: MAX_OTP_PER_IP,
        };

        // 先原子地占用发送名额，再调用网关；网关失败时名额不退还
        match self
            .otp_attempts
            .reserve(&phone, client.ip(), now, limits)
            .await?
        {
            OtpReservation::Reserved => {}
            OtpReservation::PhoneLimited { attempts } => {
                tracing::warn!(phone = %phone, attempts, "OTP rate limit hit for phone");
                return Ok(OtpStartOutcome::RateLimited);
            }
            OtpReservation::IpLimited { attempts } => {
                tracing::warn!(ip = ?client.ip(), attempts, "OTP rate limit hit for IP");
                return Ok(OtpStartOutcome::RateLimited);
            }
        }

        // 只有已开通的用户（或引导管理员）可以登录
        let known = self.users.find_by_phone(&phone).await?.is_some();
        if !known && !self.is_bootstrap_phone(&phone) {
            tracing::warn!(phone = %phone, "OTP requested for unknown phone");
            self.audit
                .record(
                    AuditLogParams::new(AuditAction::LoginFailed)
                        .phone(&phone)
                        .client(client)
                        .metadata(json!({ "reason": "USER_NOT_FOUND" })),
                )
                .await;
            return Err(AppError::Forbidden(
                "This phone number is not registered".to_string(),
            ));
        }

        self.call_gateway("send_code", self.gateway.send_code(&phone))
            .await?;

        tracing::info!(phone = %phone, "OTP sent");
        self.audit
            .record(
                AuditLogParams::new(AuditAction::OtpSent)
                    .phone(&phone)
                    .client(client),
            )
            .await;

        Ok(OtpStartOutcome::Sent)
    }

    /// OTP 第二步：校验验证码，建立会话（可选信任设备）
    pub async fn verify_otp(
        &self,
        phone_input: &str,
        code: &str,
        trust_device: bool,
        client: &ClientContext,
    ) -> Result<LoginOutcome, AppError> {
        let phone = self.phone.normalize(phone_input)?;

        let approved = self
            .call_gateway("check_code", self.gateway.check_code(&phone, code.trim()))
            .await?;

        if !approved {
            tracing::warn!(phone = %phone, "OTP verification failed");
            self.audit
                .record(
                    AuditLogParams::new(AuditAction::OtpVerifyFail)
                        .phone(&phone)
                        .client(client),
                )
                .await;
            return Err(AppError::Unauthorized);
        }

        let role_if_new = if self.is_bootstrap_phone(&phone) {
            Role::Admin
        } else {
            Role::Employee
        };
        let user = self.users.upsert_by_phone(&phone, role_if_new).await?;

        self.audit
            .record(
                AuditLogParams::new(AuditAction::OtpVerifySuccess)
                    .user(user.id)
                    .phone(&phone)
                    .client(client),
            )
            .await;

        let session = self
            .sessions
            .create_session(&user, client, trust_device, SessionOrigin::Otp)
            .await?;

        let device = if trust_device {
            let device_id = generate_device_id();
            Some(
                self.devices
                    .create_trusted_device(user.id, &device_id, client)
                    .await?,
            )
        } else {
            None
        };

        Ok(LoginOutcome {
            user,
            session,
            device,
        })
    }

    /// 凭受信任设备静默续期，仅限 MANAGER 及以上
    pub async fn silent_login(
        &self,
        device_token: Option<&str>,
        client: &ClientContext,
    ) -> Result<LoginOutcome, AppError> {
        let Some(verified) = (match device_token {
            Some(token) => self.devices.verify_trusted_device(token).await?,
            None => None,
        }) else {
            return Err(AppError::Unauthorized);
        };

        let Some(user) = self.users.find_by_id(verified.user_id).await? else {
            return Err(AppError::Unauthorized);
        };

        if !user.role.can_silent_login() {
            tracing::warn!(user_id = %user.id, role = %user.role, "Silent login refused for role");
            self.audit
                .record(
                    AuditLogParams::new(AuditAction::LoginFailed)
                        .user(user.id)
                        .phone(&user.phone_e164)
                        .client(client)
                        .metadata(json!({ "reason": "SILENT_LOGIN_ROLE_INELIGIBLE" })),
                )
                .await;
            return Err(AppError::Unauthorized);
        }

        let session = self
            .sessions
            .create_session(&user, client, true, SessionOrigin::SilentRenewal)
            .await?;

        Ok(LoginOutcome {
            user,
            session,
            device: None,
        })
    }

    /// 登出：撤销当前会话（若有），并结束该会话持有的模拟身份
    pub async fn logout(
        &self,
        session_token: Option<&str>,
        impersonation_token: Option<&str>,
        client: &ClientContext,
    ) -> Result<(), AppError> {
        let Some(token) = session_token else {
            return Ok(());
        };

        if let Some(session) = self.sessions.get_session_from_token(token).await? {
            self.impersonation
                .end_on_logout(session.user_id, impersonation_token, client)
                .await;
            self.sessions
                .revoke_session(session.id, RevocationReason::Logout, client)
                .await?;
        }

        Ok(())
    }

    fn bootstrap_secret(&self) -> Result<&str, AppError> {
        self.bootstrap_code
            .as_ref()
            .map(|c| c.expose_secret().as_str())
            .ok_or_else(|| {
                AppError::ServiceUnavailable("Admin bootstrap is not configured".to_string())
            })
    }

    async fn audit_bootstrap_failure(
        &self,
        phone: &str,
        user: Option<&User>,
        reason: &str,
        client: &ClientContext,
    ) {
        let mut params = AuditLogParams::new(AuditAction::OtpVerifyFail)
            .phone(phone)
            .client(client)
            .metadata(json!({ "reason": reason }));
        if let Some(user) = user {
            params = params.user(user.id);
        }
        self.audit.record(params).await;
    }

    /// 用引导手机号与紧急码创建或提升首个管理员
    pub async fn bootstrap_admin(
        &self,
        phone_input: &str,
        code: &str,
        client: &ClientContext,
    ) -> Result<LoginOutcome, AppError> {
        let expected = self.bootstrap_secret()?;
        let Some(bootstrap_phone) = self.bootstrap_phone.as_deref() else {
            return Err(AppError::ServiceUnavailable(
                "Admin bootstrap is not configured".to_string(),
            ));
        };

        let phone = self.phone.normalize(phone_input)?;
        if phone != bootstrap_phone {
            tracing::warn!(phone = %phone, "Admin bootstrap attempted with non-bootstrap phone");
            self.audit_bootstrap_failure(&phone, None, "BOOTSTRAP_PHONE_MISMATCH", client)
                .await;
            return Err(AppError::Forbidden(
                "Phone number is not the bootstrap administrator".to_string(),
            ));
        }

        if !constant_time_eq(code.trim(), expected) {
            tracing::warn!(phone = %phone, "Admin bootstrap code rejected");
            self.audit_bootstrap_failure(&phone, None, "INVALID_BOOTSTRAP_CODE", client)
                .await;
            return Err(AppError::Unauthorized);
        }

        if let Some(existing) = self.users.find_by_phone(&phone).await? {
            if existing.role == Role::Admin {
                return Err(AppError::BadRequest(
                    "Administrator already initialised".to_string(),
                ));
            }
        }

        let user = self.users.upsert_by_phone(&phone, Role::Admin).await?;
        let user = if user.role == Role::Admin {
            user
        } else {
            self.users
                .update_role(user.id, Role::Admin)
                .await?
                .ok_or_else(|| AppError::Internal("bootstrap user vanished".to_string()))?
        };

        let session = self
            .sessions
            .create_session(&user, client, true, SessionOrigin::AdminBootstrap)
            .await?;

        Ok(LoginOutcome {
            user,
            session,
            device: None,
        })
    }

    /// 已存在的管理员凭紧急码直接登录（绕过 OTP）
    pub async fn admin_direct_login(
        &self,
        phone_input: &str,
        code: &str,
        client: &ClientContext,
    ) -> Result<LoginOutcome, AppError> {
        let expected = self.bootstrap_secret()?;
        let phone = self.phone.normalize(phone_input)?;

        if !constant_time_eq(code.trim(), expected) {
            tracing::warn!(phone = %phone, "Admin direct login code rejected");
            self.audit_bootstrap_failure(&phone, None, "INVALID_BOOTSTRAP_CODE", client)
                .await;
            return Err(AppError::Unauthorized);
        }

        let Some(user) = self.users.find_by_phone(&phone).await? else {
            return Err(AppError::NotFound("User not found".to_string()));
        };

        if user.role != Role::Admin {
            tracing::warn!(user_id = %user.id, "Admin direct login attempted by non-admin");
            self.audit_bootstrap_failure(&phone, Some(&user), "NOT_ADMIN", client)
                .await;
            return Err(AppError::Forbidden(
                "Direct login is restricted to administrators".to_string(),
            ));
        }

        let session = self
            .sessions
            .create_session(&user, client, true, SessionOrigin::AdminDirectLogin)
            .await?;

        Ok(LoginOutcome {
            user,
            session,
            device: None,
        })
    }
}
