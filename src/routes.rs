//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware::AppState};

/// 请求体大小上限（认证接口只收小 JSON）
const MAX_BODY_BYTES: usize = 16 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 认证路由（无需会话）
    let auth_routes = Router::new()
        .route("/api/auth/otp/start", post(handlers::auth::otp_start))
        .route("/api/auth/otp/verify", post(handlers::auth::otp_verify))
        .route("/api/auth/silent-login", post(handlers::auth::silent_login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/admin-bootstrap", post(handlers::auth::admin_bootstrap))
        .route(
            "/api/auth/admin-direct-login",
            post(handlers::auth::admin_direct_login),
        );

    // 需要会话的路由
    let authenticated_routes = Router::new()
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/auth/devices", get(handlers::auth::list_devices))
        .route("/api/auth/devices/revoke", post(handlers::auth::revoke_device))
        .route("/api/auth/roles/update", post(handlers::auth::update_role))
        .route(
            "/api/admin/impersonate/start",
            post(handlers::admin::start_impersonation),
        )
        .route(
            "/api/admin/impersonate/end",
            post(handlers::admin::end_impersonation),
        )
        .route(
            "/api/admin/sessions/{id}/revoke",
            post(handlers::admin::revoke_session),
        )
        .route("/api/admin/devices", get(handlers::admin::list_devices))
        .route(
            "/api/admin/devices/{id}",
            delete(handlers::admin::revoke_record),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::middleware::session_auth_middleware,
        ));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(authenticated_routes)
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
