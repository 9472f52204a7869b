//! Audit repository (审计数据访问)

use super::AuditSink;
use crate::{error::AppError, models::audit::AuditLog};
use async_trait::async_trait;
use sqlx::PgPool;

pub struct AuditRepository {
    db: PgPool,
}

impl AuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for AuditRepository {
    /// 插入审计日志（只追加）
    async fn append(&self, log: &AuditLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, user_id, phone, ip, user_agent, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.id)
        .bind(log.action.as_str())
        .bind(log.user_id)
        .bind(&log.phone)
        .bind(&log.ip)
        .bind(&log.user_agent)
        .bind(&log.metadata)
        .bind(log.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
