//! 认证相关的 HTTP 处理器

use crate::{
    auth::{
        cookies::{clear_cookie, read_cookie, set_cookie, DEVICE_COOKIE, IMPERSONATION_COOKIE, SESSION_COOKIE},
        middleware::AuthContext,
    },
    error::AppError,
    middleware::AppState,
    models::{
        auth::*,
        device::TrustedDeviceResponse,
        user::{Role, UserResponse},
    },
    services::{audit_service::Actor, user_service::UserTarget},
};

use super::run_detached;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tower_cookies::Cookies;
use validator::Validate;

/// 写入登录结果对应的 cookie
fn apply_login_cookies(state: &AppState, cookies: &Cookies, outcome: &LoginOutcome) {
    let secure = state.config.security.cookie_secure;

    set_cookie(
        cookies,
        SESSION_COOKIE,
        outcome.session.token.clone(),
        outcome.session.expires_at,
        secure,
    );

    if let Some(device) = &outcome.device {
        set_cookie(cookies, DEVICE_COOKIE, device.token.clone(), device.expires_at, secure);
    }
}

/// POST /api/auth/otp/start
pub async fn otp_start(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Json(req): Json<OtpStartRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let outcome = run_detached(async move {
        state.auth_service.start_otp(&req.phone, &client).await
    })
    .await?;

    match outcome {
        OtpStartOutcome::Sent => Ok(Json(json!({ "success": true }))),
        OtpStartOutcome::RateLimited => Err(AppError::RateLimitExceeded),
    }
}

/// POST /api/auth/otp/verify
pub async fn otp_verify(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    client: ClientContext,
    Json(req): Json<OtpVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let outcome = {
        let state = state.clone();
        run_detached(async move {
            state
                .auth_service
                .verify_otp(&req.phone, &req.code, req.trust_device, &client)
                .await
        })
        .await?
    };

    apply_login_cookies(&state, &cookies, &outcome);

    Ok(Json(LoginResponse::from(&outcome)))
}

/// POST /api/auth/silent-login
pub async fn silent_login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    client: ClientContext,
) -> Result<impl IntoResponse, AppError> {
    let device_token = read_cookie(&cookies, DEVICE_COOKIE);

    let outcome = {
        let state = state.clone();
        run_detached(async move {
            state
                .auth_service
                .silent_login(device_token.as_deref(), &client)
                .await
        })
        .await?
    };

    apply_login_cookies(&state, &cookies, &outcome);

    Ok(Json(LoginResponse::from(&outcome)))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    client: ClientContext,
) -> Result<impl IntoResponse, AppError> {
    let session_token = read_cookie(&cookies, SESSION_COOKIE);
    let impersonation_token = read_cookie(&cookies, IMPERSONATION_COOKIE);

    {
        let state = state.clone();
        run_detached(async move {
            state
                .auth_service
                .logout(
                    session_token.as_deref(),
                    impersonation_token.as_deref(),
                    &client,
                )
                .await
        })
        .await?;
    }

    let secure = state.config.security.cookie_secure;
    clear_cookie(&cookies, SESSION_COOKIE, secure);
    clear_cookie(&cookies, DEVICE_COOKIE, secure);
    clear_cookie(&cookies, IMPERSONATION_COOKIE, secure);

    Ok(Json(json!({ "success": true })))
}

/// GET /api/auth/me
pub async fn me(auth: AuthContext) -> Result<impl IntoResponse, AppError> {
    let role = auth.user.role;
    let impersonation = match &auth.impersonation {
        Some(state) => ImpersonationSummary {
            is_impersonating: true,
            original_user_id: Some(state.original_user_id),
            impersonated_user_id: Some(state.impersonated_user_id),
        },
        None => ImpersonationSummary {
            is_impersonating: false,
            original_user_id: None,
            impersonated_user_id: None,
        },
    };

    Ok(Json(MeResponse {
        success: true,
        authenticated: true,
        user: MeUser {
            user: UserResponse::from(&auth.user),
            is_admin: role.is_admin(),
            is_manager: role.has_at_least(Role::Manager),
        },
        impersonation,
    }))
}

/// GET /api/auth/devices
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let devices: Vec<TrustedDeviceResponse> = state
        .device_service
        .list_devices(auth.user.id)
        .await?
        .into_iter()
        .map(TrustedDeviceResponse::from)
        .collect();

    Ok(Json(json!({
        "success": true,
        "devices": devices,
    })))
}

/// POST /api/auth/devices/revoke
pub async fn revoke_device(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    cookies: Cookies,
    client: ClientContext,
    Json(req): Json<RevokeDeviceRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let device_id = match req.device_id {
        Some(device_id) => device_id,
        None => {
            let token = read_cookie(&cookies, DEVICE_COOKIE)
                .ok_or_else(|| AppError::BadRequest("deviceId is required".to_string()))?;
            let verified = state
                .device_service
                .verify_trusted_device(&token)
                .await?
                .filter(|device| device.user_id == auth.user.id)
                .ok_or_else(|| AppError::BadRequest("No trusted device to revoke".to_string()))?;

            clear_cookie(&cookies, DEVICE_COOKIE, state.config.security.cookie_secure);
            verified.device_id
        }
    };

    let actor = Actor::from(&auth);
    let revoked = run_detached(async move {
        state
            .device_service
            .revoke_device(actor, &device_id, &client)
            .await
    })
    .await?;

    Ok(Json(json!({ "success": true, "revoked": revoked })))
}

/// POST /api/auth/roles/update
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    client: ClientContext,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = req.role;
    let target = match (req.user_id, req.phone) {
        (Some(id), _) => UserTarget::Id(id),
        (None, Some(phone)) => UserTarget::Phone(phone),
        (None, None) => {
            return Err(AppError::BadRequest(
                "userId or phone is required".to_string(),
            ))
        }
    };

    let user = run_detached(async move {
        state
            .user_service
            .update_role(&auth.user, target, role, &client)
            .await
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "user": UserResponse::from(user),
    })))
}

/// POST /api/auth/admin-bootstrap
pub async fn admin_bootstrap(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    client: ClientContext,
    Json(req): Json<BootstrapLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let outcome = {
        let state = state.clone();
        run_detached(async move {
            state
                .auth_service
                .bootstrap_admin(&req.phone, &req.bootstrap_code, &client)
                .await
        })
        .await?
    };

    apply_login_cookies(&state, &cookies, &outcome);

    Ok(Json(LoginResponse::from(&outcome)))
}

/// POST /api/auth/admin-direct-login
pub async fn admin_direct_login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    client: ClientContext,
    Json(req): Json<BootstrapLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let outcome = {
        let state = state.clone();
        run_detached(async move {
            state
                .auth_service
                .admin_direct_login(&req.phone, &req.bootstrap_code, &client)
                .await
        })
        .await?
    };

    apply_login_cookies(&state, &cookies, &outcome);

    Ok(Json(LoginResponse::from(&outcome)))
}
