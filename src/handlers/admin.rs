//! 管理员操作：模拟身份、会话与设备管理

use crate::{
    auth::{
        cookies::{clear_cookie, read_cookie, set_cookie, IMPERSONATION_COOKIE},
        middleware::AuthContext,
    },
    error::AppError,
    middleware::AppState,
    models::{
        auth::{AdminDevicesQuery, ClientContext, RevokeRecordQuery, StartImpersonationRequest},
        device::{ActiveDeviceView, ActiveSessionView},
        user::{Role, UserResponse},
    },
    services::{audit_service::Actor, session_service::RevocationReason},
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tower_cookies::Cookies;
use uuid::Uuid;

use super::run_detached;

/// MANAGER 及以上可以查看和撤销所有会话与设备
fn require_manager(auth: &AuthContext) -> Result<(), AppError> {
    if auth.user.role.has_at_least(Role::Manager) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Manager or administrator role required".to_string(),
        ))
    }
}

/// POST /api/admin/impersonate/start
///
/// Authorised against the session owner, never a borrowed identity.
pub async fn start_impersonation(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    cookies: Cookies,
    client: ClientContext,
    Json(req): Json<StartImpersonationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = auth.real_user.id;
    let grant = {
        let state = state.clone();
        run_detached(async move {
            state
                .impersonation_service
                .start(admin_id, req.target_user_id, &client)
                .await
        })
        .await?
    };

    set_cookie(
        &cookies,
        IMPERSONATION_COOKIE,
        grant.token,
        grant.state.expires_at,
        state.config.security.cookie_secure,
    );

    Ok(Json(json!({
        "success": true,
        "impersonation": grant.state,
        "user": UserResponse::from(grant.target),
    })))
}

/// POST /api/admin/impersonate/end
pub async fn end_impersonation(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    cookies: Cookies,
    client: ClientContext,
) -> Result<impl IntoResponse, AppError> {
    let token = read_cookie(&cookies, IMPERSONATION_COOKIE);
    let session_user_id = auth.real_user.id;

    let admin = {
        let state = state.clone();
        run_detached(async move {
            state
                .impersonation_service
                .end(session_user_id, token.as_deref(), &client)
                .await
        })
        .await?
    };

    // 仅在成功恢复后清除 cookie
    clear_cookie(
        &cookies,
        IMPERSONATION_COOKIE,
        state.config.security.cookie_secure,
    );

    Ok(Json(json!({
        "success": true,
        "user": UserResponse::from(admin),
    })))
}

/// POST /api/admin/sessions/{id}/revoke
pub async fn revoke_session(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    client: ClientContext,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !auth.user.role.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can revoke sessions".to_string(),
        ));
    }

    let actor = Actor::from(&auth);
    let revoked = run_detached(async move {
        revoke_session_record(&state, actor, session_id, &client).await
    })
    .await?;

    Ok(Json(json!({ "success": true, "revoked": revoked })))
}

async fn revoke_session_record(
    state: &AppState,
    actor: Actor,
    session_id: Uuid,
    client: &ClientContext,
) -> Result<bool, AppError> {
    if state
        .session_service
        .find_session(session_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Session not found".to_string()));
    }

    state
        .session_service
        .revoke_session(session_id, RevocationReason::Admin { actor }, client)
        .await
}

/// GET /api/admin/devices
///
/// Active sessions and trusted devices across users, optionally one user's.
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(query): Query<AdminDevicesQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_manager(&auth)?;

    let sessions = state.session_service.list_active(query.user_id).await?;
    let devices = state.device_service.list_active(query.user_id).await?;

    // 每个用户只查一次
    let mut owners: HashMap<Uuid, Option<UserResponse>> = HashMap::new();
    let owner_ids = sessions
        .iter()
        .map(|s| s.user_id)
        .chain(devices.iter().map(|d| d.user_id));
    for user_id in owner_ids {
        if owners.contains_key(&user_id) {
            continue;
        }
        let owner = state
            .user_service
            .find_by_id(user_id)
            .await?
            .map(UserResponse::from);
        owners.insert(user_id, owner);
    }

    let sessions: Vec<ActiveSessionView> = sessions
        .into_iter()
        .map(|session| {
            let owner = owners.get(&session.user_id).cloned().flatten();
            ActiveSessionView::new(session, owner)
        })
        .collect();
    let devices: Vec<ActiveDeviceView> = devices
        .into_iter()
        .map(|device| {
            let owner = owners.get(&device.user_id).cloned().flatten();
            ActiveDeviceView::new(device, owner)
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "sessions": sessions,
        "devices": devices,
    })))
}

/// DELETE /api/admin/devices/{id}?type=session|device
pub async fn revoke_record(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    client: ClientContext,
    Path(id): Path<Uuid>,
    Query(query): Query<RevokeRecordQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_manager(&auth)?;

    let actor = Actor::from(&auth);
    let revoked = match query.kind.as_deref() {
        Some("session") => {
            run_detached(async move { revoke_session_record(&state, actor, id, &client).await })
                .await?
        }
        Some("device") => {
            run_detached(async move {
                state.device_service.revoke_by_id(actor, id, &client).await
            })
            .await?
        }
        _ => {
            return Err(AppError::BadRequest(
                "type must be 'session' or 'device'".to_string(),
            ))
        }
    };

    Ok(Json(json!({ "success": true, "revoked": revoked })))
}
