//! 会话服务
//! Issues, validates and revokes server-side sessions behind signed tokens.

use crate::{
    auth::token::{SessionClaims, TokenCodec},
    config::SESSION_TTL_HOURS,
    error::AppError,
    models::{
        audit::AuditAction,
        auth::{ClientContext, IssuedSession},
        session::{NewSession, Session},
        user::User,
    },
    repository::SessionStore,
    services::audit_service::{Actor, AuditLogParams, AuditService},
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// 受信任设备上的会话有效期（天）
pub const TRUSTED_SESSION_TTL_DAYS: i64 = 30;

/// How the session came to be; decides its single audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Otp,
    AdminBootstrap,
    AdminDirectLogin,
    SilentRenewal,
}

impl SessionOrigin {
    fn audit_action(self) -> AuditAction {
        match self {
            SessionOrigin::SilentRenewal => AuditAction::SessionRefresh,
            _ => AuditAction::LoginSuccess,
        }
    }

    fn method(self) -> &'static str {
        match self {
            SessionOrigin::Otp => "otp",
            SessionOrigin::AdminBootstrap => "admin_bootstrap",
            SessionOrigin::AdminDirectLogin => "admin_direct_login",
            SessionOrigin::SilentRenewal => "trusted_device",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// The owner signed out
    Logout,
    /// A privileged user revoked someone's session
    Admin { actor: Actor },
}

pub fn session_ttl(trust_device: bool) -> Duration {
    if trust_device {
        Duration::days(TRUSTED_SESSION_TTL_DAYS)
    } else {
        Duration::hours(SESSION_TTL_HOURS)
    }
}

pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    codec: TokenCodec,
    audit: Arc<AuditService>,
}

impl SessionService {
    pub fn new(sessions: Arc<dyn SessionStore>, codec: TokenCodec, audit: Arc<AuditService>) -> Self {
        Self {
            sessions,
            codec,
            audit,
        }
    }

    /// Create a session (12h, or 30d on a trusted device) and sign its token
    pub async fn create_session(
        &self,
        user: &User,
        client: &ClientContext,
        trust_device: bool,
        origin: SessionOrigin,
    ) -> Result<IssuedSession, AppError> {
        let now = Utc::now();
        let new_session = NewSession {
            id: Uuid::new_v4(),
            user_id: user.id,
            created_at: now,
            expires_at: now + session_ttl(trust_device),
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
        };

        let session = self.sessions.create(&new_session).await?;
        let token = self
            .codec
            .sign(&SessionClaims::new(session.id, session.created_at, session.expires_at))?;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            trust_device,
            method = origin.method(),
            "Session created"
        );

        self.audit
            .record(
                AuditLogParams::new(origin.audit_action())
                    .user(user.id)
                    .phone(&user.phone_e164)
                    .client(client)
                    .metadata(json!({
                        "method": origin.method(),
                        "sessionId": session.id,
                        "trustDevice": trust_device,
                    })),
            )
            .await;

        Ok(IssuedSession {
            session_id: session.id,
            token,
            expires_at: session.expires_at,
        })
    }

    /// Resolve a token to a live session; `None` means unauthenticated
    pub async fn get_session_from_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        if token.is_empty() {
            tracing::debug!("No session token presented");
            return Ok(None);
        }

        let claims = match self.codec.verify::<SessionClaims>(token) {
            Ok(claims) => claims,
            Err(_) => {
                tracing::debug!("Session token failed verification");
                return Ok(None);
            }
        };

        let Ok(session_id) = Uuid::parse_str(&claims.sid) else {
            tracing::debug!("Session token carries malformed id");
            return Ok(None);
        };

        let Some(session) = self.sessions.find_by_id(session_id).await? else {
            tracing::debug!(session_id = %session_id, "Session record not found");
            return Ok(None);
        };

        if !session.is_active(Utc::now()) {
            tracing::debug!(
                session_id = %session_id,
                revoked = session.revoked_at.is_some(),
                "Session no longer active"
            );
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, AppError> {
        self.sessions.find_by_id(session_id).await
    }

    /// Active sessions across users, optionally for one user
    pub async fn list_active(&self, user_id: Option<Uuid>) -> Result<Vec<Session>, AppError> {
        self.sessions.list_active(user_id, Utc::now()).await
    }

    /// Idempotent: only the call that sets `revoked_at` is audited
    pub async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        client: &ClientContext,
    ) -> Result<bool, AppError> {
        let Some(session) = self.sessions.find_by_id(session_id).await? else {
            return Ok(false);
        };

        let revoked = self.sessions.revoke(session_id, Utc::now()).await?;
        if !revoked {
            tracing::debug!(session_id = %session_id, "Session already revoked");
            return Ok(false);
        }

        let params = match reason {
            RevocationReason::Logout => AuditLogParams::new(AuditAction::Logout)
                .user(session.user_id)
                .metadata(json!({ "sessionId": session_id })),
            RevocationReason::Admin { actor } => {
                AuditLogParams::new(AuditAction::SessionRevoked)
                    .actor(actor)
                    .metadata(json!({
                        "sessionId": session_id,
                        "sessionUserId": session.user_id,
                    }))
            }
        };

        tracing::info!(session_id = %session_id, reason = ?reason, "Session revoked");
        self.audit.record(params.client(client)).await;

        Ok(true)
    }
}
