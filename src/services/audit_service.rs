//! 审计日志服务

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    models::{
        audit::{AuditAction, AuditLog},
        auth::ClientContext,
    },
    repository::AuditSink,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Who performed a request-driven action.
///
/// `user_id` is the effective identity; while an admin impersonates someone,
/// `impersonated_by` names the admin and lands in the entry's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub impersonated_by: Option<Uuid>,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            impersonated_by: None,
        }
    }
}

impl From<&AuthContext> for Actor {
    fn from(auth: &AuthContext) -> Self {
        Self {
            user_id: auth.user.id,
            impersonated_by: auth.impersonation.as_ref().map(|_| auth.real_user.id),
        }
    }
}

/// 审计日志参数结构体
#[derive(Debug, Clone)]
pub struct AuditLogParams<'a> {
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub impersonated_by: Option<Uuid>,
    pub phone: Option<&'a str>,
    pub client: Option<&'a ClientContext>,
    pub metadata: Option<serde_json::Value>,
}

impl<'a> AuditLogParams<'a> {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            impersonated_by: None,
            phone: None,
            client: None,
            metadata: None,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.user_id = Some(actor.user_id);
        self.impersonated_by = actor.impersonated_by;
        self
    }

    pub fn phone(mut self, phone: &'a str) -> Self {
        self.phone = Some(phone);
        self
    }

    pub fn client(mut self, client: &'a ClientContext) -> Self {
        self.client = Some(client);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub struct AuditService {
    sink: Arc<dyn AuditSink>,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// 记录审计日志条目
    pub async fn log_action(&self, params: AuditLogParams<'_>) -> Result<(), AppError> {
        let metadata = match params.impersonated_by {
            Some(admin_id) => {
                let mut metadata = match params.metadata {
                    Some(serde_json::Value::Object(map)) => map,
                    Some(other) => {
                        let mut map = serde_json::Map::new();
                        map.insert("detail".to_string(), other);
                        map
                    }
                    None => serde_json::Map::new(),
                };
                metadata.insert("impersonatedBy".to_string(), json!(admin_id));
                Some(serde_json::Value::Object(metadata))
            }
            None => params.metadata,
        };

        let log = AuditLog {
            id: Uuid::new_v4(),
            action: params.action,
            user_id: params.user_id,
            phone: params.phone.map(|s| s.to_string()),
            ip: params.client.and_then(|c| c.ip().map(|s| s.to_string())),
            user_agent: params.client.and_then(|c| c.user_agent().map(|s| s.to_string())),
            metadata,
            created_at: chrono::Utc::now(),
        };

        self.sink.append(&log).await
    }

    /// Awaited inline, but a failed write never undoes the audited action
    pub async fn record(&self, params: AuditLogParams<'_>) {
        let action = params.action;
        let user_id = params.user_id;

        if let Err(e) = self.log_action(params).await {
            tracing::error!(
                action = action.as_str(),
                user_id = ?user_id,
                error = %e,
                "Failed to write audit log entry"
            );
        }
    }
}
