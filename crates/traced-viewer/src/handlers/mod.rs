//! HTTP route handlers for the trace viewer.

pub mod spans;
pub mod traces;

use traced_store::StoreError;

use crate::error::AppError;

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// Runs a store query on the blocking pool.
///
/// `action` names the query in logs and in the error returned to the client.
pub(crate) async fn query<T, F>(action: &'static str, f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(AppError::internal)?
        .map_err(|e| {
            tracing::error!("Failed to {}: {}", action, e);
            AppError::Internal(format!("failed to {}", action))
        })
}
