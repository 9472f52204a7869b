//! OTP attempt ledger

use super::OtpAttemptStore;
use crate::{
    error::AppError,
    models::otp::{OtpLimits, OtpReservation},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Advisory lock namespaces (first key of `pg_advisory_xact_lock(int4, int4)`)
const PHONE_LOCK_CLASS: i32 = 0x4f54_5001;
const IP_LOCK_CLASS: i32 = 0x4f54_5002;

pub struct OtpAttemptRepository {
    db: PgPool,
}

impl OtpAttemptRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OtpAttemptStore for OtpAttemptRepository {
    /// 在事务内按手机号、IP 加咨询锁，计数与插入之间不会有并发请求插队。
    /// 锁总是先手机号后 IP，顺序固定。
    async fn reserve(
        &self,
        phone_e164: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
        limits: OtpLimits,
    ) -> Result<OtpReservation, AppError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(PHONE_LOCK_CLASS)
            .bind(phone_e164)
            .execute(&mut *tx)
            .await?;

        let phone_attempts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM otp_attempts WHERE phone_e164 = $1 AND created_at >= $2",
        )
        .bind(phone_e164)
        .bind(limits.since)
        .fetch_one(&mut *tx)
        .await?;

        if phone_attempts >= limits.max_per_phone {
            tx.rollback().await?;
            return Ok(OtpReservation::PhoneLimited {
                attempts: phone_attempts,
            });
        }

        if let Some(ip) = ip {
            sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
                .bind(IP_LOCK_CLASS)
                .bind(ip)
                .execute(&mut *tx)
                .await?;

            let ip_attempts: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM otp_attempts WHERE ip = $1 AND created_at >= $2",
            )
            .bind(ip)
            .bind(limits.since)
            .fetch_one(&mut *tx)
            .await?;

            if ip_attempts >= limits.max_per_ip {
                tx.rollback().await?;
                return Ok(OtpReservation::IpLimited {
                    attempts: ip_attempts,
                });
            }
        }

        sqlx::query(
            "INSERT INTO otp_attempts (id, phone_e164, ip, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(phone_e164)
        .bind(ip)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(OtpReservation::Reserved)
    }
}
