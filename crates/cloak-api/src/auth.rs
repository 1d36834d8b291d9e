use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::Multipart;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info, warn};
use uuid::Uuid;

use cloak_db::Database;
use cloak_gateway::{ConnectionRegistry, presence};
use cloak_types::api::{Claims, LoginRequest, LoginResponse, RegisterResponse};

use crate::blocking;
use crate::error::ApiError;
use crate::relay::RelayService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub registry: ConnectionRegistry,
    pub relay: RelayService<Database>,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: String) -> Self {
        let db = Arc::new(db);
        let registry = ConnectionRegistry::new();
        let relay = RelayService::new(db.clone(), registry.clone());
        Self {
            db,
            registry,
            relay,
            jwt_secret,
        }
    }
}

/// POST /auth/register — multipart `username` + `image`. The key is read
/// out of the image; the image itself is kept as the user's avatar.
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut username = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed upload: {}", e)))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("username") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("unreadable username: {}", e)))?;
                username = Some(text.trim().to_string());
            }
            Some("image") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("unreadable image: {}", e)))?;
                image = Some(bytes);
            }
            _ => {}
        }
    }

    let username = username.ok_or_else(|| ApiError::BadRequest("username is required".into()))?;
    validate_username(&username)?;
    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("image is required".into()))?;

    // Image decoding is CPU-bound
    let decode_input = image.clone();
    let credential = tokio::task::spawn_blocking(move || cloak_crypto::extract_key(&decode_input))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("key extraction task failed"))
        })?
        .map_err(|e| {
            warn!("Key extraction failed for '{}': {}", username, e);
            ApiError::BadRequest("image does not carry a key".into())
        })?;

    if credential.trim_matches('\0').is_empty() {
        return Err(ApiError::BadRequest("image does not carry a key".into()));
    }

    let name = username.clone();
    let taken = blocking(&state, move |db| Ok(db.get_user_by_username(&name)?.is_some())).await?;
    if taken {
        return Err(ApiError::Conflict(format!("username '{}' is taken", username)));
    }

    let user_id = Uuid::new_v4();
    let name = username.clone();
    blocking(&state, move |db| {
        db.create_user(&user_id.to_string(), &name, &credential, &image)
    })
    .await?;

    info!("Registered {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, username }),
    ))
}

/// POST /auth/login — the password is the key hidden in the avatar.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.username.clone();
    let user = blocking(&state, move |db| db.get_user_by_username(&name))
        .await?
        .ok_or(ApiError::Unauthorized("invalid username or password"))?;

    if user.key_credential.is_empty() || user.key_credential != req.password {
        return Err(ApiError::Unauthorized("invalid username or password"));
    }

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id '{}': {}", user.id, e)))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    info!("{} ({}) logged in", user.username, user_id);

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// POST /auth/logout. Closes every socket the caller holds.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let was_online = state.registry.disconnect_user(claims.sub);

    presence::sync_presence(&state.registry, &state.db, claims.sub).await;

    if let Some(username) = was_online {
        state.registry.broadcast_presence(claims.sub, &username, false);
    }

    info!("{} ({}) logged out", claims.username, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::BadRequest(
            "username must be 3 to 32 bytes long".into(),
        ));
    }
    Ok(())
}
