//! HTTP 处理器模块

pub mod admin;
pub mod auth;
pub mod health;

use crate::error::AppError;
use std::future::Future;

/// 在独立任务中执行会写存储的服务调用。
///
/// The connection may drop while the handler is suspended; the spawned task
/// still runs every store write and audit entry of the operation to the end.
pub(crate) async fn run_detached<F, T>(work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        tracing::error!(error = %e, "Detached request task failed");
        AppError::Internal("request task failed".to_string())
    })?
}
