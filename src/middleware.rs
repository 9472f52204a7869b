//! HTTP 中间件
//! 应用状态、请求追踪、客户端信息提取

use crate::{
    auth::{phone::PhoneNormalizer, token::TokenCodec},
    config::AppConfig,
    error::AppError,
    models::auth::ClientContext,
    otp::OtpGateway,
    repository::Stores,
    services::{
        AuditService, AuthService, DeviceService, ImpersonationService, SessionService,
        UserService,
    },
};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// 服务使用 Arc 包装，多个请求共享同一实例。
pub struct AppState {
    pub config: AppConfig,
    pub db: Option<sqlx::PgPool>,
    pub started_at: Instant,
    pub session_service: Arc<SessionService>,
    pub device_service: Arc<DeviceService>,
    pub impersonation_service: Arc<ImpersonationService>,
    pub user_service: Arc<UserService>,
    pub auth_service: Arc<AuthService>,
}

impl AppState {
    /// Wire every service over the given stores and OTP gateway
    pub fn build(
        config: AppConfig,
        stores: Stores,
        gateway: Arc<dyn OtpGateway>,
        db: Option<sqlx::PgPool>,
    ) -> Result<Self, AppError> {
        let security = &config.security;
        let audit_service = Arc::new(AuditService::new(stores.audit.clone()));

        let session_service = Arc::new(SessionService::new(
            stores.sessions.clone(),
            TokenCodec::new(&security.session_secret)?,
            audit_service.clone(),
        ));

        let device_service = Arc::new(DeviceService::new(
            stores.devices.clone(),
            TokenCodec::new(&security.device_secret)?,
            security.device_secret.clone(),
            audit_service.clone(),
        ));

        let impersonation_service = Arc::new(ImpersonationService::new(
            stores.users.clone(),
            TokenCodec::new(&security.session_secret)?,
            security.impersonation_ttl_secs,
            audit_service.clone(),
        ));

        let user_service = Arc::new(UserService::new(
            stores.users.clone(),
            PhoneNormalizer::from_config(&config.otp),
            audit_service.clone(),
        ));

        let auth_service = Arc::new(AuthService::new(
            &config,
            stores.users.clone(),
            stores.otp_attempts.clone(),
            gateway,
            session_service.clone(),
            device_service.clone(),
            impersonation_service.clone(),
            audit_service,
        )?);

        Ok(Self {
            config,
            db,
            started_at: Instant::now(),
            session_service,
            device_service,
            impersonation_service,
            user_service,
            auth_service,
        })
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            _ => "OTHER",
        };
        let status_code = match status {
            200 => "200",
            400 => "400",
            401 => "401",
            403 => "403",
            404 => "404",
            429 => "429",
            500 => "500",
            502 => "502",
            503 => "503",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_code)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        // 在响应头中回显 trace_id / request_id
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 获取客户端 IP 地址；仅在信任代理时读取转发头
pub fn get_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> Option<String> {
    if trust_proxy {
        // X-Forwarded-For 可能包含多个 IP，取第一个
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = real_ip {
            return Some(ip.to_string());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Best-effort client metadata; never rejects the request
impl FromRequestParts<Arc<AppState>> for ClientContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = get_client_ip(&parts.headers, peer, state.config.security.trust_proxy);
        let user_agent = parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok());

        Ok(ClientContext::new(ip.as_deref(), user_agent))
    }
}
