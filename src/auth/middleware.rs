//! 会话认证中间件

use crate::{
    auth::cookies::{read_cookie, IMPERSONATION_COOKIE, SESSION_COOKIE},
    error::AppError,
    middleware::AppState,
    models::{session::Session, user::User},
    services::impersonation_service::ImpersonationState,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tower_cookies::Cookies;

/// 认证上下文（附加到请求扩展）
///
/// `user` is the effective identity (the impersonated user while an admin
/// is impersonating); `real_user` is always the session owner.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session: Session,
    pub user: User,
    pub real_user: User,
    pub impersonation: Option<ImpersonationState>,
}

impl AuthContext {
    pub fn is_impersonating(&self) -> bool {
        self.impersonation.is_some()
    }
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// Resolve the session cookie (and any impersonation overlay) into an
/// `AuthContext`; `None` means the request is unauthenticated.
pub async fn resolve_auth_context(
    state: &AppState,
    cookies: &Cookies,
) -> Result<Option<AuthContext>, AppError> {
    let Some(token) = read_cookie(cookies, SESSION_COOKIE) else {
        return Ok(None);
    };

    let Some(session) = state.session_service.get_session_from_token(&token).await? else {
        return Ok(None);
    };

    let Some(real_user) = state.user_service.find_by_id(session.user_id).await? else {
        tracing::debug!(session_id = %session.id, "Session owner no longer exists");
        return Ok(None);
    };

    let overlay = match read_cookie(cookies, IMPERSONATION_COOKIE) {
        Some(token) => {
            state
                .impersonation_service
                .resolve_for_session(&real_user, &token)
                .await?
        }
        None => None,
    };

    let context = match overlay {
        Some(active) => AuthContext {
            session,
            user: active.target,
            real_user,
            impersonation: Some(active.state),
        },
        None => AuthContext {
            session,
            user: real_user.clone(),
            real_user,
            impersonation: None,
        },
    };

    Ok(Some(context))
}

/// 会话认证中间件 - 必须认证
pub async fn session_auth_middleware(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = resolve_auth_context(&state, &cookies)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if context.is_impersonating() {
        tracing::debug!(
            admin_id = %context.real_user.id,
            user_id = %context.user.id,
            "Request served under impersonation"
        );
    }

    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}
