//! 模拟身份（管理员代入其他用户）
//!
//! State lives only in a signed, short-lived token. Every use re-resolves the
//! original admin from the store before the borrowed identity is honoured.

use crate::{
    auth::token::{ImpersonationClaims, TokenCodec},
    error::AppError,
    models::{
        audit::AuditAction,
        auth::ClientContext,
        user::{Role, User},
    },
    repository::UserStore,
    services::audit_service::{AuditLogParams, AuditService},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationState {
    pub is_impersonating: bool,
    pub original_user_id: Uuid,
    pub impersonated_user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful start: the token for the `impersonation` cookie
#[derive(Debug, Clone)]
pub struct ImpersonationGrant {
    pub token: String,
    pub state: ImpersonationState,
    pub target: User,
}

/// Borrowed identity after re-validation against the store
#[derive(Debug, Clone)]
pub struct ActiveImpersonation {
    pub state: ImpersonationState,
    pub target: User,
}

pub struct ImpersonationService {
    users: Arc<dyn UserStore>,
    codec: TokenCodec,
    ttl: Duration,
    audit: Arc<AuditService>,
}

impl ImpersonationService {
    pub fn new(
        users: Arc<dyn UserStore>,
        codec: TokenCodec,
        ttl_secs: u64,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            users,
            codec,
            ttl: Duration::seconds(ttl_secs as i64),
            audit,
        }
    }

    /// Caller must be ADMIN; target must exist and must not be ADMIN
    pub async fn start(
        &self,
        admin_user_id: Uuid,
        target_user_id: Uuid,
        client: &ClientContext,
    ) -> Result<ImpersonationGrant, AppError> {
        let Some(admin) = self.users.find_by_id(admin_user_id).await? else {
            return Err(AppError::Unauthorized);
        };

        if admin.role != Role::Admin {
            tracing::warn!(user_id = %admin.id, "Non-admin attempted impersonation");
            self.deny(&admin, Some(target_user_id), "CALLER_NOT_ADMIN", client)
                .await;
            return Err(AppError::Forbidden(
                "Only administrators can impersonate users".to_string(),
            ));
        }

        let Some(target) = self.users.find_by_id(target_user_id).await? else {
            return Err(AppError::NotFound("Target user not found".to_string()));
        };

        if target.role == Role::Admin {
            tracing::warn!(admin_id = %admin.id, target_id = %target.id, "Admin-to-admin impersonation refused");
            self.deny(&admin, Some(target.id), "TARGET_IS_ADMIN", client)
                .await;
            return Err(AppError::Forbidden(
                "Administrators cannot be impersonated".to_string(),
            ));
        }

        let now = Utc::now();
        let expires_at = now + self.ttl;
        let token = self
            .codec
            .sign(&ImpersonationClaims::new(admin.id, target.id, now, expires_at))?;

        tracing::info!(admin_id = %admin.id, target_id = %target.id, "Impersonation started");
        self.audit
            .record(
                AuditLogParams::new(AuditAction::ImpersonationStarted)
                    .user(admin.id)
                    .phone(&admin.phone_e164)
                    .client(client)
                    .metadata(identity_metadata(&admin, &target)),
            )
            .await;

        Ok(ImpersonationGrant {
            token,
            state: ImpersonationState {
                is_impersonating: true,
                original_user_id: admin.id,
                impersonated_user_id: target.id,
                expires_at,
            },
            target,
        })
    }

    /// Decode the token without any authorization decision
    pub fn state(&self, token: &str) -> Option<ImpersonationState> {
        let claims = self.codec.verify::<ImpersonationClaims>(token).ok()?;
        let original_user_id = Uuid::parse_str(&claims.adm).ok()?;
        let impersonated_user_id = Uuid::parse_str(&claims.tgt).ok()?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)?;

        Some(ImpersonationState {
            is_impersonating: true,
            original_user_id,
            impersonated_user_id,
            expires_at,
        })
    }

    /// Overlay the borrowed identity only when the session user is the
    /// original admin, is still ADMIN, and the target is still impersonable.
    pub async fn resolve_for_session(
        &self,
        session_user: &User,
        token: &str,
    ) -> Result<Option<ActiveImpersonation>, AppError> {
        let Some(state) = self.state(token) else {
            return Ok(None);
        };

        if state.original_user_id != session_user.id || session_user.role != Role::Admin {
            tracing::debug!(
                user_id = %session_user.id,
                "Ignoring impersonation token not held by an active admin"
            );
            return Ok(None);
        }

        let Some(target) = self.users.find_by_id(state.impersonated_user_id).await? else {
            return Ok(None);
        };

        if target.role == Role::Admin {
            return Ok(None);
        }

        Ok(Some(ActiveImpersonation { state, target }))
    }

    /// Restore the original admin; re-checks that it is still ADMIN
    pub async fn end(
        &self,
        session_user_id: Uuid,
        token: Option<&str>,
        client: &ClientContext,
    ) -> Result<User, AppError> {
        let Some(state) = token.and_then(|t| self.state(t)) else {
            return Err(AppError::BadRequest(
                "No active impersonation".to_string(),
            ));
        };

        let original = self.users.find_by_id(state.original_user_id).await?;
        let valid_original = original
            .as_ref()
            .filter(|u| u.id == session_user_id && u.role == Role::Admin);

        let Some(admin) = valid_original else {
            tracing::warn!(
                session_user_id = %session_user_id,
                original_user_id = %state.original_user_id,
                "Impersonation end refused: original admin no longer valid"
            );
            self.audit
                .record(
                    AuditLogParams::new(AuditAction::ImpersonationDenied)
                        .user(session_user_id)
                        .client(client)
                        .metadata(json!({
                            "reason": "ORIGINAL_ADMIN_INVALID",
                            "originalUserId": state.original_user_id,
                            "targetUserId": state.impersonated_user_id,
                        })),
                )
                .await;
            return Err(AppError::Forbidden(
                "Original administrator is no longer valid".to_string(),
            ));
        };

        let target = self.users.find_by_id(state.impersonated_user_id).await?;
        let metadata = match &target {
            Some(target) => identity_metadata(admin, target),
            None => json!({
                "targetUserId": state.impersonated_user_id,
                "adminPhone": admin.phone_e164,
                "adminNickname": admin.nickname,
            }),
        };

        tracing::info!(admin_id = %admin.id, target_id = %state.impersonated_user_id, "Impersonation ended");
        self.audit
            .record(
                AuditLogParams::new(AuditAction::ImpersonationEnded)
                    .user(admin.id)
                    .phone(&admin.phone_e164)
                    .client(client)
                    .metadata(metadata),
            )
            .await;

        Ok(admin.clone())
    }

    /// Logout ends any impersonation the signing-out admin holds.
    ///
    /// No authorization decision here: the session is going away either way,
    /// so a token minted for this session owner is closed out in the audit log.
    pub async fn end_on_logout(
        &self,
        session_user_id: Uuid,
        token: Option<&str>,
        client: &ClientContext,
    ) -> bool {
        let Some(state) = token.and_then(|t| self.state(t)) else {
            return false;
        };
        if state.original_user_id != session_user_id {
            return false;
        }

        tracing::info!(admin_id = %session_user_id, target_id = %state.impersonated_user_id, "Impersonation ended by logout");
        self.audit
            .record(
                AuditLogParams::new(AuditAction::ImpersonationEnded)
                    .user(session_user_id)
                    .client(client)
                    .metadata(json!({
                        "reason": "LOGOUT",
                        "targetUserId": state.impersonated_user_id,
                    })),
            )
            .await;

        true
    }

    async fn deny(
        &self,
        caller: &User,
        target_user_id: Option<Uuid>,
        reason: &str,
        client: &ClientContext,
    ) {
        self.audit
            .record(
                AuditLogParams::new(AuditAction::ImpersonationDenied)
                    .user(caller.id)
                    .phone(&caller.phone_e164)
                    .client(client)
                    .metadata(json!({
                        "reason": reason,
                        "callerRole": caller.role,
                        "targetUserId": target_user_id,
                    })),
            )
            .await;
    }
}

fn identity_metadata(admin: &User, target: &User) -> serde_json::Value {
    json!({
        "targetUserId": target.id,
        "targetUserPhone": target.phone_e164,
        "targetUserRole": target.role,
        "adminPhone": admin.phone_e164,
        "adminNickname": admin.nickname,
    })
}
