use axum::{
    Extension, Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use cloak_types::api::{Claims, UserSummary};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

/// GET /users: the directory, with unread counts for the caller.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub.to_string();
    let rows = blocking(&state, move |db| db.list_users(&viewer)).await?;

    let users: Vec<UserSummary> = rows
        .into_iter()
        .filter_map(|row| match row.id.parse::<Uuid>() {
            Ok(id) => Some(UserSummary {
                id,
                username: row.username,
                is_online: row.is_online,
                unread_count: row.unread_count,
            }),
            Err(e) => {
                warn!("Corrupt user id '{}': {}", row.id, e);
                None
            }
        })
        .collect();

    Ok(Json(users))
}

/// GET /users/{user_id}/photo
pub async fn get_photo(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = user_id.to_string();
    let bytes = blocking(&state, move |db| db.get_stego_image(&uid))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no photo for user {}", user_id)))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}
