use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use cloak_types::api::{Claims, SendMessageRequest};

use crate::auth::AppState;
use crate::error::ApiError;

/// POST /messages — `encrypted_content` is under the caller's own key.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.encrypted_content.is_empty() {
        return Err(ApiError::BadRequest("encrypted_content is empty".into()));
    }

    let response = state
        .relay
        .send(claims.sub, req.receiver_id, req.encrypted_content)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /messages/{peer_id}
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.relay.history(claims.sub, peer_id).await?;
    Ok(Json(messages))
}
