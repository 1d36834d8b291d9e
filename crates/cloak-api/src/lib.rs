pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod relay;
pub mod store;
pub mod users;

use tracing::error;

use cloak_db::Database;

pub use auth::{AppState, AppStateInner};
pub use error::{ApiError, RelayError};
pub use relay::RelayService;
pub use store::{KeyStore, MessageStore};

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(ApiError::Internal)
}
