use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cloak_api::auth::{self, AppState, AppStateInner};
use cloak_api::middleware::{decode_token, require_auth};
use cloak_api::{ApiError, messages, users};
use cloak_gateway::connection;

/// Secrets that ship in sample configs and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

const DEFAULT_MAX_AVATAR_BYTES: usize = 8 * 1024 * 1024;

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cloak=debug,cloak_api=debug,cloak_gateway=debug,tower_http=debug".into()
            }),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("CLOAK_JWT_SECRET").unwrap_or_default();
    if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
        bail!("CLOAK_JWT_SECRET is unset or a placeholder; refusing to start");
    }
    let db_path = std::env::var("CLOAK_DB_PATH").unwrap_or_else(|_| "cloak.db".into());
    let host = std::env::var("CLOAK_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CLOAK_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let max_avatar_bytes: usize = match std::env::var("CLOAK_MAX_AVATAR_BYTES") {
        Ok(raw) => raw.parse()?,
        Err(_) => DEFAULT_MAX_AVATAR_BYTES,
    };

    // Init database
    let db = cloak_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner::new(db, jwt_secret));

    // Routes
    let public_routes = Router::new()
        .route(
            "/auth/register",
            post(auth::register).layer(DefaultBodyLimit::max(max_avatar_bytes)),
        )
        .route("/auth/login", post(auth::login))
        .route("/users/{user_id}/photo", get(users::get_photo))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(users::list_users))
        .route("/messages", post(messages::send_message))
        .route("/messages/{peer_id}", get(messages::get_messages))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Cloak server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /gateway?token=<jwt>
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let claims = decode_token(&state.jwt_secret, &query.token).map_err(|e| {
        warn!("Rejected gateway upgrade: {}", e);
        ApiError::Unauthorized("invalid or expired token")
    })?;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.registry.clone(),
            state.db.clone(),
            claims.sub,
            claims.username,
        )
    }))
}
