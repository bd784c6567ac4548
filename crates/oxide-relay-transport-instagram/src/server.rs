//! HTTP surface: webhook intake, verification, stats, preview and admin routes.

use crate::config::InstagramSettings;
use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Local;
use oxide_relay_core::{AdminError, DelayConfig, Trigger, TuningSnapshot, WebhookPayload};
use oxide_relay_runtime::{Orchestrator, RelayStats};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

const DEFAULT_CHAT_USER: &str = "test_user";

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Response pipeline
    pub orchestrator: Arc<Orchestrator>,
    /// Transport settings (verify token, admin token)
    pub settings: Arc<InstagramSettings>,
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or invalid request
    #[error("{0}")]
    BadRequest(String),
    /// Referenced item does not exist
    #[error("{0}")]
    NotFound(String),
    /// Verification token mismatch
    #[error("Verification failed")]
    Forbidden,
    /// Missing or wrong admin token
    #[error("Unauthorized")]
    Unauthorized,
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/config", get(admin_config))
        .route("/admin/triggers", post(add_trigger))
        .route("/admin/triggers/{name}", delete(remove_trigger))
        .route("/admin/delay", put(update_delay))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/stats", get(stats))
        .route("/chat", post(chat))
        .route("/test/send", post(test_send))
        .merge(admin)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "online",
        "service": "Instagram chat relay",
        "timestamp": Local::now().to_rfc3339(),
    }))
}

/// Query of the webhook verification handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<String, ApiError> {
    let expected = state
        .settings
        .webhook_verify_token
        .as_deref()
        .filter(|t| !t.is_empty());

    let token_ok = matches!(
        (expected, params.verify_token.as_deref()),
        (Some(expected), Some(given)) if expected == given
    );
    if params.mode.as_deref() != Some("subscribe") || !token_ok {
        warn!("Webhook verification failed");
        return Err(ApiError::Forbidden);
    }

    let challenge = params
        .challenge
        .as_deref()
        .and_then(|c| c.trim().parse::<u64>().ok())
        .ok_or_else(|| ApiError::BadRequest("hub.challenge must be numeric".to_string()))?;

    info!("Webhook verified successfully");
    Ok(challenge.to_string())
}

async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Malformed webhook body");
            return Json(json!({ "status": "error" }));
        }
    };

    if payload.is_instagram() {
        let spawned = state.orchestrator.dispatch(payload);
        debug!(spawned, "Webhook dispatched");
    } else {
        debug!(object = ?payload.object, "Ignoring non-Instagram webhook");
    }
    Json(json!({ "status": "received" }))
}

async fn stats(State(state): State<AppState>) -> Json<RelayStats> {
    Json(state.orchestrator.stats().await)
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    message: String,
}

/// Reply of `POST /chat`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Reply text
    pub response: String,
    /// Suggested typing delay in seconds
    pub typing_delay: f64,
    /// Server time of the reply
    pub timestamp: String,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message is required".to_string()));
    }
    let user_id = request
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CHAT_USER.to_string());

    info!(user_id = %user_id, "Chat request");
    let outcome = state.orchestrator.preview(&user_id, message).await;

    Ok(Json(ChatResponse {
        response: outcome.reply,
        typing_delay: outcome.delay_secs,
        timestamp: Local::now().to_rfc3339(),
    }))
}

/// Body of `POST /test/send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    recipient_id: String,
    message: String,
}

async fn test_send(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.recipient_id.trim().is_empty() || request.message.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "recipient_id and message are required".to_string(),
        ));
    }

    let (delay, delivered) = state
        .orchestrator
        .send_with_delay(&request.recipient_id, &request.message)
        .await;
    let status = if delivered { "sent" } else { "failed" };
    Ok(Json(json!({ "status": status, "typing_delay": delay })))
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.settings.admin_token.as_deref().filter(|t| !t.is_empty()) {
        let given = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if given != Some(expected) {
            warn!(path = %request.uri().path(), "Rejected admin request");
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

async fn admin_config(State(state): State<AppState>) -> Json<TuningSnapshot> {
    let orchestrator = &state.orchestrator;
    Json(TuningSnapshot {
        media_triggers: orchestrator.triggers().snapshot().as_ref().clone(),
        typing_delay: *orchestrator.delays().config(),
    })
}

async fn add_trigger(
    State(state): State<AppState>,
    Json(trigger): Json<Trigger>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = trigger.name.clone();
    state.orchestrator.triggers().add_trigger(trigger)?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "added", "name": name }))))
}

async fn remove_trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.orchestrator.triggers().remove_trigger(&name) {
        Ok(Json(json!({ "status": "removed", "name": name })))
    } else {
        Err(ApiError::NotFound(format!("Trigger not found: {name}")))
    }
}

async fn update_delay(
    State(state): State<AppState>,
    Json(config): Json<DelayConfig>,
) -> Result<Json<DelayConfig>, ApiError> {
    state.orchestrator.delays().update_config(config)?;
    Ok(Json(config))
}
