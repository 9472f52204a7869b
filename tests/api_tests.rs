//! HTTP API 集成测试

use axum::http::{header, StatusCode};
use capsule_auth::{
    models::{audit::AuditAction, user::Role},
    services::device_service::generate_device_id,
};
use serde_json::json;
use std::time::Duration;

mod common;
use common::{
    body_json, client, delete, get, post_json, set_cookie_value, MockGateway, TestContext,
    VALID_CODE,
};

#[tokio::test]
async fn test_health_check() {
    let ctx = TestContext::new();

    let response = get(ctx.router(), "/health", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_readiness_without_database() {
    let ctx = TestContext::new();

    let response = get(ctx.router(), "/ready", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_otp_login_sets_cookies_and_me_works() {
    let ctx = TestContext::new();
    ctx.create_user("+85261234567", Role::Manager).await;

    let response = post_json(
        ctx.router(),
        "/api/auth/otp/start",
        json!({ "phone": "61234567" }),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_json(
        ctx.router(),
        "/api/auth/otp/verify",
        json!({ "phone": "61234567", "code": VALID_CODE, "trustDevice": true }),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("session=") && c.contains("HttpOnly")));
    assert!(cookies.iter().any(|c| c.starts_with("device=")));

    let session = set_cookie_value(&response, "session").unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["phone"], "+85261234567");
    assert!(body["trustedDeviceExpiresAt"].is_string());

    let response = get(ctx.router(), "/api/auth/me", &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"]["role"], "MANAGER");
    assert_eq!(body["user"]["isManager"], true);
    assert_eq!(body["user"]["isAdmin"], false);
    assert_eq!(body["impersonation"]["isImpersonating"], false);
}

#[tokio::test]
async fn test_me_requires_session() {
    let ctx = TestContext::new();

    let response = get(ctx.router(), "/api/auth/me", &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get(ctx.router(), "/api/auth/me", &[("session", "forged.token.value")]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], 401);
}

#[tokio::test]
async fn test_otp_start_rate_limited_status() {
    let ctx = TestContext::new();
    ctx.create_user("+85261234567", Role::Employee).await;

    for _ in 0..3 {
        let response = post_json(
            ctx.router(),
            "/api/auth/otp/start",
            json!({ "phone": "+85261234567" }),
            &[],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = post_json(
        ctx.router(),
        "/api/auth/otp/start",
        json!({ "phone": "+85261234567" }),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_otp_start_unknown_phone_forbidden() {
    let ctx = TestContext::new();

    let response = post_json(
        ctx.router(),
        "/api/auth/otp/start",
        json!({ "phone": "+85269999999" }),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_otp_verify_wrong_code_unauthorized() {
    let ctx = TestContext::new();
    ctx.create_user("+85261234567", Role::Employee).await;

    let response = post_json(
        ctx.router(),
        "/api/auth/otp/verify",
        json!({ "phone": "+85261234567", "code": "999999" }),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie_value(&response, "session").is_none());
}

#[tokio::test]
async fn test_silent_login_via_device_cookie() {
    let ctx = TestContext::new();
    ctx.create_user("+85261234567", Role::Manager).await;

    let response = post_json(
        ctx.router(),
        "/api/auth/otp/verify",
        json!({ "phone": "+85261234567", "code": VALID_CODE, "trustDevice": true }),
        &[],
    )
    .await;
    let device = set_cookie_value(&response, "device").unwrap();

    let response = post_json(
        ctx.router(),
        "/api/auth/silent-login",
        json!({}),
        &[("device", &device)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie_value(&response, "session").is_some());

    let response = post_json(ctx.router(), "/api/auth/silent-login", json!({}), &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_invalidates_session_cookie() {
    let ctx = TestContext::new();
    let user = ctx.create_user("+85261234567", Role::Employee).await;
    let session = ctx.session_token_for(&user).await;

    let response = post_json(
        ctx.router(),
        "/api/auth/logout",
        json!({}),
        &[("session", &session)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookie_value(&response, "session").as_deref(), Some(""));

    let response = get(ctx.router(), "/api/auth/me", &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoke_current_device_from_cookie() {
    let ctx = TestContext::new();
    ctx.create_user("+85261234567", Role::Manager).await;

    let response = post_json(
        ctx.router(),
        "/api/auth/otp/verify",
        json!({ "phone": "+85261234567", "code": VALID_CODE, "trustDevice": true }),
        &[],
    )
    .await;
    let session = set_cookie_value(&response, "session").unwrap();
    let device = set_cookie_value(&response, "device").unwrap();

    let response = get(ctx.router(), "/api/auth/devices", &[("session", &session)]).await;
    let body = body_json(response).await;
    assert_eq!(body["devices"].as_array().unwrap().len(), 1);
    assert_eq!(body["devices"][0]["revoked"], false);

    let response = post_json(
        ctx.router(),
        "/api/auth/devices/revoke",
        json!({}),
        &[("session", &session), ("device", &device)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], true);

    let response = post_json(
        ctx.router(),
        "/api/auth/silent-login",
        json!({}),
        &[("device", &device)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(ctx
        .store
        .audit_actions()
        .await
        .contains(&AuditAction::DeviceTrustRevoked));
}

#[tokio::test]
async fn test_impersonation_round_trip_over_http() {
    let ctx = TestContext::new();
    let admin = ctx.create_user("+85260000001", Role::Admin).await;
    let target = ctx.create_user("+85261234567", Role::Employee).await;
    let session = ctx.session_token_for(&admin).await;

    let response = post_json(
        ctx.router(),
        "/api/admin/impersonate/start",
        json!({ "targetUserId": target.id }),
        &[("session", &session)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let impersonation = set_cookie_value(&response, "impersonation").unwrap();

    let cookies = [
        ("session", session.as_str()),
        ("impersonation", impersonation.as_str()),
    ];

    let response = get(ctx.router(), "/api/auth/me", &cookies).await;
    let body = body_json(response).await;
    assert_eq!(body["user"]["id"], target.id.to_string());
    assert_eq!(body["impersonation"]["isImpersonating"], true);
    assert_eq!(body["impersonation"]["originalUserId"], admin.id.to_string());

    // 模拟期间不能借用身份提权
    let response = post_json(
        ctx.router(),
        "/api/auth/roles/update",
        json!({ "userId": target.id, "role": "ADMIN" }),
        &cookies,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = post_json(ctx.router(), "/api/admin/impersonate/end", json!({}), &cookies).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        set_cookie_value(&response, "impersonation").as_deref(),
        Some("")
    );

    let body = body_json(response).await;
    assert_eq!(body["user"]["id"], admin.id.to_string());
}

#[tokio::test]
async fn test_impersonation_start_forbidden_for_employee() {
    let ctx = TestContext::new();
    let employee = ctx.create_user("+85261234567", Role::Employee).await;
    let other = ctx.create_user("+85267654321", Role::Employee).await;
    let session = ctx.session_token_for(&employee).await;

    let response = post_json(
        ctx.router(),
        "/api/admin/impersonate/start",
        json!({ "targetUserId": other.id }),
        &[("session", &session)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookie_value(&response, "impersonation").is_none());
}

#[tokio::test]
async fn test_admin_revokes_other_session() {
    let ctx = TestContext::new();
    let admin = ctx.create_user("+85260000001", Role::Admin).await;
    let user = ctx.create_user("+85261234567", Role::Employee).await;
    let admin_session = ctx.session_token_for(&admin).await;

    let issued = ctx
        .state
        .session_service
        .create_session(
            &user,
            &common::client(),
            false,
            capsule_auth::services::session_service::SessionOrigin::Otp,
        )
        .await
        .unwrap();

    let uri = format!("/api/admin/sessions/{}/revoke", issued.session_id);
    let response = post_json(ctx.router(), &uri, json!({}), &[("session", &admin_session)]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], true);

    let response = get(ctx.router(), "/api/auth/me", &[("session", &issued.token)]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // 非管理员无权撤销
    let user_session = ctx.session_token_for(&user).await;
    let response = post_json(ctx.router(), &uri, json!({}), &[("session", &user_session)]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_update_over_http() {
    let ctx = TestContext::new();
    let admin = ctx.create_user("+85260000001", Role::Admin).await;
    let user = ctx.create_user("+85261234567", Role::Employee).await;
    let session = ctx.session_token_for(&admin).await;

    let response = post_json(
        ctx.router(),
        "/api/auth/roles/update",
        json!({ "phone": "+85261234567", "role": "MANAGER" }),
        &[("session", &session)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["user"]["id"], user.id.to_string());
    assert_eq!(body["user"]["role"], "MANAGER");

    let response = post_json(
        ctx.router(),
        "/api/auth/roles/update",
        json!({ "role": "MANAGER" }),
        &[("session", &session)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_bootstrap_over_http() {
    let ctx = TestContext::new();

    let response = post_json(
        ctx.router(),
        "/api/auth/admin-bootstrap",
        json!({ "phone": common::BOOTSTRAP_PHONE, "bootstrapCode": common::BOOTSTRAP_CODE }),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie_value(&response, "session").is_some());

    let body = body_json(response).await;
    assert_eq!(body["user"]["role"], "ADMIN");

    // 第二次引导被拒绝
    let response = post_json(
        ctx.router(),
        "/api/auth/admin-bootstrap",
        json!({ "phone": common::BOOTSTRAP_PHONE, "bootstrapCode": common::BOOTSTRAP_CODE }),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_verify_completes_after_client_disconnect() {
    let ctx = TestContext::with_gateway(MockGateway::with_delay(Duration::from_millis(200)));
    ctx.create_user("+85261234567", Role::Manager).await;

    // 客户端在网关返回前断开，请求 future 被丢弃
    let aborted = tokio::time::timeout(
        Duration::from_millis(50),
        post_json(
            ctx.router(),
            "/api/auth/otp/verify",
            json!({ "phone": "+85261234567", "code": VALID_CODE, "trustDevice": true }),
            &[],
        ),
    )
    .await;
    assert!(aborted.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(ctx.store.session_count().await, 1);
    assert_eq!(ctx.store.device_count().await, 1);
    assert_eq!(
        ctx.store.audit_actions().await,
        vec![AuditAction::OtpVerifySuccess, AuditAction::LoginSuccess]
    );
}

#[tokio::test]
async fn test_device_revoke_under_impersonation_names_admin() {
    let ctx = TestContext::new();
    let admin = ctx.create_user("+85260000001", Role::Admin).await;
    let target = ctx.create_user("+85261234567", Role::Employee).await;
    let session = ctx.session_token_for(&admin).await;

    let device_id = generate_device_id();
    ctx.state
        .device_service
        .create_trusted_device(target.id, &device_id, &client())
        .await
        .unwrap();

    let response = post_json(
        ctx.router(),
        "/api/admin/impersonate/start",
        json!({ "targetUserId": target.id }),
        &[("session", &session)],
    )
    .await;
    let impersonation = set_cookie_value(&response, "impersonation").unwrap();

    let response = post_json(
        ctx.router(),
        "/api/auth/devices/revoke",
        json!({ "deviceId": device_id }),
        &[("session", &session), ("impersonation", &impersonation)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], true);

    let entries = ctx.store.audit_entries().await;
    let revoked = entries.last().unwrap();
    assert_eq!(revoked.action, AuditAction::DeviceTrustRevoked);
    assert_eq!(revoked.user_id, Some(target.id));
    let metadata = revoked.metadata.as_ref().unwrap();
    assert_eq!(metadata["impersonatedBy"], admin.id.to_string());
    assert_eq!(metadata["deviceFingerprint"].as_str().unwrap().len(), 12);
}

#[tokio::test]
async fn test_manager_lists_active_sessions_and_devices() {
    let ctx = TestContext::new();
    let manager = ctx.create_user("+85260000002", Role::Manager).await;
    let alice = ctx.create_user("+85261234567", Role::Employee).await;
    let bob = ctx.create_user("+85267654321", Role::Employee).await;
    let session = ctx.session_token_for(&manager).await;
    ctx.session_token_for(&alice).await;
    ctx.session_token_for(&bob).await;

    for user in [&alice, &bob] {
        ctx.state
            .device_service
            .create_trusted_device(user.id, &generate_device_id(), &client())
            .await
            .unwrap();
    }

    // 已撤销的会话不出现在列表中
    let revoked = ctx
        .state
        .session_service
        .create_session(
            &bob,
            &client(),
            false,
            capsule_auth::services::session_service::SessionOrigin::Otp,
        )
        .await
        .unwrap();
    ctx.state
        .auth_service
        .logout(Some(&revoked.token), None, &client())
        .await
        .unwrap();

    let response = get(ctx.router(), "/api/admin/devices", &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sessions"].as_array().unwrap().len(), 3);
    assert_eq!(body["devices"].as_array().unwrap().len(), 2);

    let uri = format!("/api/admin/devices?userId={}", alice.id);
    let body = body_json(get(ctx.router(), &uri, &[("session", &session)]).await).await;
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["userId"], alice.id.to_string());
    assert_eq!(sessions[0]["user"]["phone"], "+85261234567");
    let devices = body["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["user"]["role"], "EMPLOYEE");
    assert_eq!(devices[0]["fingerprint"].as_str().unwrap().len(), 12);
    assert!(devices[0].get("deviceIdHash").is_none());
}

#[tokio::test]
async fn test_admin_console_forbidden_for_employee() {
    let ctx = TestContext::new();
    let employee = ctx.create_user("+85261234567", Role::Employee).await;
    let session = ctx.session_token_for(&employee).await;

    let response = get(ctx.router(), "/api/admin/devices", &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let uri = format!("/api/admin/devices/{}?type=session", uuid::Uuid::new_v4());
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_manager_revokes_device_and_session_by_record_id() {
    let ctx = TestContext::new();
    let manager = ctx.create_user("+85260000002", Role::Manager).await;
    let user = ctx.create_user("+85261234567", Role::Manager).await;
    let session = ctx.session_token_for(&manager).await;

    let user_session = ctx
        .state
        .session_service
        .create_session(
            &user,
            &client(),
            true,
            capsule_auth::services::session_service::SessionOrigin::Otp,
        )
        .await
        .unwrap();
    let device = ctx
        .state
        .device_service
        .create_trusted_device(user.id, &generate_device_id(), &client())
        .await
        .unwrap();

    let uri = format!("/api/admin/devices?userId={}", user.id);
    let body = body_json(get(ctx.router(), &uri, &[("session", &session)]).await).await;
    let device_record = body["devices"][0]["id"].as_str().unwrap().to_string();

    let uri = format!("/api/admin/devices/{}?type=device", device_record);
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], true);

    // 设备令牌随即失效，重复撤销不再审计
    assert!(ctx
        .state
        .device_service
        .verify_trusted_device(&device.token)
        .await
        .unwrap()
        .is_none());
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(body_json(response).await["revoked"], false);

    let entries = ctx.store.audit_entries().await;
    let revoked = entries.last().unwrap();
    assert_eq!(revoked.action, AuditAction::DeviceTrustRevoked);
    assert_eq!(revoked.user_id, Some(manager.id));
    assert_eq!(
        revoked.metadata.as_ref().unwrap()["deviceUserId"],
        user.id.to_string()
    );

    let uri = format!("/api/admin/devices/{}?type=session", user_session.session_id);
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(ctx
        .state
        .session_service
        .get_session_from_token(&user_session.token)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        ctx.store.audit_actions().await.last(),
        Some(&AuditAction::SessionRevoked)
    );
}

#[tokio::test]
async fn test_revoke_record_validates_type_and_id() {
    let ctx = TestContext::new();
    let admin = ctx.create_user("+85260000001", Role::Admin).await;
    let session = ctx.session_token_for(&admin).await;
    let id = uuid::Uuid::new_v4();

    let uri = format!("/api/admin/devices/{}", id);
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/api/admin/devices/{}?type=laptop", id);
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/api/admin/devices/{}?type=device", id);
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let uri = format!("/api/admin/devices/{}?type=session", id);
    let response = delete(ctx.router(), &uri, &[("session", &session)]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
