//! 用户角色管理

use crate::{
    auth::phone::PhoneNormalizer,
    error::AppError,
    models::{
        audit::AuditAction,
        auth::ClientContext,
        user::{Role, User},
    },
    repository::UserStore,
    services::audit_service::{AuditLogParams, AuditService},
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Role change target, by id or by phone
#[derive(Debug, Clone)]
pub enum UserTarget {
    Id(Uuid),
    Phone(String),
}

pub struct UserService {
    users: Arc<dyn UserStore>,
    phone: PhoneNormalizer,
    audit: Arc<AuditService>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>, phone: PhoneNormalizer, audit: Arc<AuditService>) -> Self {
        Self {
            users,
            phone,
            audit,
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.users.find_by_id(id).await
    }

    /// ADMIN-only; an admin may not change their own role
    pub async fn update_role(
        &self,
        actor: &User,
        target: UserTarget,
        role: Role,
        client: &ClientContext,
    ) -> Result<User, AppError> {
        if !actor.role.is_admin() {
            return Err(AppError::Forbidden(
                "Only administrators can change roles".to_string(),
            ));
        }

        let existing = match target {
            UserTarget::Id(id) => self.users.find_by_id(id).await?,
            UserTarget::Phone(phone) => {
                let phone = self.phone.normalize(&phone)?;
                self.users.find_by_phone(&phone).await?
            }
        };
        let Some(existing) = existing else {
            return Err(AppError::NotFound("User not found".to_string()));
        };

        if existing.id == actor.id {
            return Err(AppError::Forbidden(
                "Cannot change your own role".to_string(),
            ));
        }

        let updated = self
            .users
            .update_role(existing.id, role)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        tracing::info!(
            actor_id = %actor.id,
            target_id = %updated.id,
            from = %existing.role,
            to = %role,
            "User role updated"
        );
        self.audit
            .record(
                AuditLogParams::new(AuditAction::RoleUpdated)
                    .user(actor.id)
                    .phone(&actor.phone_e164)
                    .client(client)
                    .metadata(json!({
                        "targetId": updated.id,
                        "role": role,
                        "previousRole": existing.role,
                    })),
            )
            .await;

        Ok(updated)
    }
}
