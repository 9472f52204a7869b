//! Trusted device repository

use super::DeviceStore;
use crate::{
    error::AppError,
    models::device::{NewTrustedDevice, TrustedDevice},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct DeviceRepository {
    db: PgPool,
}

impl DeviceRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeviceStore for DeviceRepository {
    /// 单条语句完成插入或刷新，避免并发登录产生重复记录。
    /// 已撤销的记录不会被续期，`revoked_at` 原样返回。
    async fn upsert(&self, device: &NewTrustedDevice) -> Result<TrustedDevice, AppError> {
        let device = sqlx::query_as::<_, TrustedDevice>(
            r#"
            INSERT INTO trusted_devices (
                id, user_id, device_id_hash, user_agent, ip_first_used,
                created_at, last_seen_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
            ON CONFLICT (user_id, device_id_hash) DO UPDATE
            SET last_seen_at = EXCLUDED.last_seen_at,
                expires_at = CASE
                    WHEN trusted_devices.revoked_at IS NULL THEN EXCLUDED.expires_at
                    ELSE trusted_devices.expires_at
                END
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(device.user_id)
        .bind(&device.device_id_hash)
        .bind(&device.user_agent)
        .bind(&device.ip)
        .bind(device.seen_at)
        .bind(device.expires_at)
        .fetch_one(&self.db)
        .await?;

        Ok(device)
    }

    async fn find(
        &self,
        user_id: Uuid,
        device_id_hash: &str,
    ) -> Result<Option<TrustedDevice>, AppError> {
        let device = sqlx::query_as::<_, TrustedDevice>(
            "SELECT * FROM trusted_devices WHERE user_id = $1 AND device_id_hash = $2",
        )
        .bind(user_id)
        .bind(device_id_hash)
        .fetch_optional(&self.db)
        .await?;

        Ok(device)
    }

    async fn revoke(
        &self,
        user_id: Uuid,
        device_id_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE trusted_devices
            SET revoked_at = $3
            WHERE user_id = $1 AND device_id_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(device_id_hash)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, AppError> {
        let devices = sqlx::query_as::<_, TrustedDevice>(
            "SELECT * FROM trusted_devices WHERE user_id = $1 ORDER BY last_seen_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(devices)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TrustedDevice>, AppError> {
        let device = sqlx::query_as::<_, TrustedDevice>("SELECT * FROM trusted_devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(device)
    }

    async fn revoke_by_id(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE trusted_devices SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active(
        &self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustedDevice>, AppError> {
        let devices = sqlx::query_as::<_, TrustedDevice>(
            r#"
            SELECT * FROM trusted_devices
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND revoked_at IS NULL
              AND expires_at > $2
            ORDER BY last_seen_at DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.db)
        .await?;

        Ok(devices)
    }
}
