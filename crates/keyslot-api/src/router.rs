//! Route table and server loop.
//!
//! | Method & path | Service call |
//! |---|---|
//! | `GET /` | liveness message |
//! | `GET /status` | [`status`](RelayService::status) |
//! | `POST /color-feedback` | [`submit_color_event`](RelayService::submit_color_event) |
//! | `POST /reward` | [`submit_reward_event`](RelayService::submit_reward_event) |
//! | `GET /queue` | [`list_queue`](RelayService::list_queue) |
//! | `DELETE /queue` | [`clear_queue`](RelayService::clear_queue) |
//! | `POST /queue/pop?team=` | [`pop_next`](RelayService::pop_next) |
//! | `GET /queue/peek?team=` | [`peek_team`](RelayService::peek_team) |
//! | `GET /rewards?team=` | [`list_rewards`](RelayService::list_rewards) |
//! | `GET /rewards/last?team=` | [`last_reward`](RelayService::last_reward) |
//! | `DELETE /rewards/:team` | [`clear_team_rewards`](RelayService::clear_team_rewards) |
//! | `PUT /reward-config` | [`set_reward_config`](RelayService::set_reward_config) |
//! | `GET /reward-config` | [`get_reward_config`](RelayService::get_reward_config) |
//!
//! Bodies are parsed by hand rather than with the `Json` extractor so that
//! an unparsable body still reaches the service, which rejects bad
//! credentials before it looks at the payload.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use keyslot_runtime::RelayService;
use keyslot_types::KeyslotError;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::ApiToken;
use crate::error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub token: ApiToken,
}

impl AppState {
    pub fn new(relay: Arc<RelayService>, token: ApiToken) -> Self {
        Self { relay, token }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TeamQuery {
    team: Option<String>,
}

type ApiResult = Result<Response, ApiError>;

/// Build the full router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/color-feedback", post(color_feedback))
        .route("/reward", post(reward))
        .route("/queue", get(list_queue).delete(clear_queue))
        .route("/queue/pop", post(pop_next))
        .route("/queue/peek", get(peek_team))
        .route("/rewards", get(list_rewards))
        .route("/rewards/last", get(last_reward))
        .route("/rewards/:team", delete(clear_team_rewards))
        .route("/reward-config", get(get_reward_config).put(set_reward_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` turns `true`, then drain.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), KeyslotError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("HTTP API draining");
        })
        .await
        .map_err(|e| KeyslotError::Transport(format!("HTTP server failed: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn index() -> Json<Value> {
    Json(json!({ "message": "Keyslot relay is running" }))
}

async fn status(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.relay.status()?).into_response())
}

async fn color_feedback(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let authenticated = state.token.authorizes(&headers);
    let outcome = state
        .relay
        .submit_color_event(&parse_body(&body), authenticated)
        .await?;
    Ok(Json(outcome).into_response())
}

async fn reward(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let authenticated = state.token.authorizes(&headers);
    let outcome = state
        .relay
        .submit_reward_event(&parse_body(&body), authenticated)
        .await?;
    Ok(Json(outcome).into_response())
}

async fn list_queue(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.relay.list_queue()?).into_response())
}

async fn clear_queue(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    let authenticated = state.token.authorizes(&headers);
    Ok(Json(state.relay.clear_queue(authenticated)?).into_response())
}

async fn pop_next(State(state): State<AppState>, Query(q): Query<TeamQuery>) -> ApiResult {
    Ok(match state.relay.pop_next(q.team.as_deref())? {
        Some(record) => Json(record).into_response(),
        None => marker("empty"),
    })
}

async fn peek_team(State(state): State<AppState>, Query(q): Query<TeamQuery>) -> ApiResult {
    Ok(match state.relay.peek_team(q.team.as_deref())? {
        Some(record) => Json(record).into_response(),
        None => marker("no pending data"),
    })
}

async fn list_rewards(State(state): State<AppState>, Query(q): Query<TeamQuery>) -> ApiResult {
    Ok(Json(state.relay.list_rewards(q.team.as_deref())?).into_response())
}

async fn last_reward(State(state): State<AppState>, Query(q): Query<TeamQuery>) -> ApiResult {
    Ok(match state.relay.last_reward(q.team.as_deref())? {
        Some(last) => Json(last).into_response(),
        None => marker("empty"),
    })
}

async fn clear_team_rewards(
    State(state): State<AppState>,
    Path(team): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let authenticated = state.token.authorizes(&headers);
    Ok(Json(state.relay.clear_team_rewards(&team, authenticated)?).into_response())
}

async fn set_reward_config(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let accepted = state.relay.set_reward_config(&parse_body(&body))?;
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

async fn get_reward_config(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.relay.get_reward_config()?).into_response())
}

/// Unparsable or empty bodies become `null`, which fails validation.
fn parse_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

fn marker(status: &str) -> Response {
    Json(json!({ "status": status })).into_response()
}
