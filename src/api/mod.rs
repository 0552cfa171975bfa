// HTTP API routes (signup, bracket control, submissions, voting)

pub mod ws;

use axum::{
    extract::{Json, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::auth::{AdminGate, AdminUser};
use crate::engine::EngineError;
use crate::metrics;
use crate::notifier::BroadcastNotifier;
use crate::service::{AuxBattleService, ServiceError};
use crate::tournament::ParticipantId;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub participant: ParticipantId,
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub participant: ParticipantId,
    pub content: String,
    /// Optional guard: the submission is rejected unless this is the participant's match.
    pub match_id: Option<String>,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub voter: ParticipantId,
    /// `"1"`/`"a"` or `"2"`/`"b"`.
    pub choice: String,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuxBattleService>,
    pub notifier: Arc<BroadcastNotifier>,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn error_status(e: &ServiceError) -> StatusCode {
    match e {
        ServiceError::Engine(engine) => match engine {
            EngineError::SignupClosed
            | EngineError::SignupAlreadyClosed
            | EngineError::AlreadyRegistered(_)
            | EngineError::AlreadyInProgress
            | EngineError::NoActiveMatch(_)
            | EngineError::MatchNotInVoting(_) => StatusCode::CONFLICT,
            EngineError::InsufficientParticipants { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::InvalidContent => StatusCode::BAD_REQUEST,
        },
        ServiceError::Ballot(_) => StatusCode::BAD_REQUEST,
        ServiceError::Database(_) | ServiceError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn service_error(e: ServiceError) -> Response {
    let status = error_status(&e);
    if status.is_server_error() {
        tracing::error!("Request failed: {e}");
        return json_error(status, "Internal server error").into_response();
    }
    json_error(status, &e.to_string()).into_response()
}

fn events_response<E: serde::Serialize>(status: StatusCode, events: E) -> Response {
    (status, Json(json!({ "events": events }))).into_response()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(service: Arc<AuxBattleService>, notifier: Arc<BroadcastNotifier>) -> Router {
    let state = AppState { service, notifier };

    Router::new()
        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/bracket", get(get_bracket))
        // Signup
        .route("/api/sessions/{id}/signup/open", post(open_signup))
        .route("/api/sessions/{id}/signup/close", post(close_signup))
        .route("/api/sessions/{id}/participants", post(register))
        // Tournament control
        .route("/api/sessions/{id}/start", post(start_tournament))
        .route("/api/sessions/{id}/advance", post(force_advance))
        .route("/api/sessions/{id}/reset", post(reset))
        // Matches
        .route("/api/sessions/{id}/submissions", post(submit))
        .route("/api/sessions/{id}/matches/{match_id}", get(get_match))
        .route("/api/sessions/{id}/matches/{match_id}/votes", post(cast_vote))
        .route(
            "/api/sessions/{id}/matches/{match_id}/end-voting",
            post(end_voting),
        )
        // WebSocket
        .route("/ws/events", get(ws::ws_events))
        .with_state(state)
}

/// The full application: API routes, health and metrics endpoints, the admin
/// gate in request extensions, request metrics and CORS.
pub fn app(
    service: Arc<AuxBattleService>,
    notifier: Arc<BroadcastNotifier>,
    gate: AdminGate,
) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(router(service, notifier))
        .layer(middleware::from_fn(track_requests))
        .layer(Extension(Arc::new(gate)))
        .layer(CorsLayer::permissive())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "auxbattle" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::gather_metrics(),
    )
}

async fn track_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = metrics::normalize_path(req.uri().path());
    let started = Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint.as_str(), response.status().as_str()])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .observe(started.elapsed().as_secs_f64());
    response
}

// ── Session handlers ──────────────────────────────────────────────────

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.session_ids().await {
        Ok(ids) => (StatusCode::OK, Json(json!(ids))).into_response(),
        Err(e) => service_error(e),
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.snapshot(&id).await {
        Ok(snapshot) => (StatusCode::OK, Json(json!(snapshot))).into_response(),
        Err(e) => service_error(e),
    }
}

async fn get_bracket(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.bracket(&id).await {
        Ok(Some(bracket)) => (StatusCode::OK, Json(json!(bracket))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "No tournament in this session").into_response(),
        Err(e) => service_error(e),
    }
}

// ── Signup handlers ───────────────────────────────────────────────────

async fn open_signup(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.open_signup(&id).await {
        Ok(events) => events_response(StatusCode::OK, events),
        Err(e) => service_error(e),
    }
}

async fn close_signup(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.close_signup(&id).await {
        Ok(events) => events_response(StatusCode::OK, events),
        Err(e) => service_error(e),
    }
}

async fn register(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    match state
        .service
        .register(&id, req.participant, req.display_name)
        .await
    {
        Ok(events) => events_response(StatusCode::CREATED, events),
        Err(e) => service_error(e),
    }
}

// ── Tournament control handlers ───────────────────────────────────────

async fn start_tournament(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.start(&id).await {
        Ok(events) => events_response(StatusCode::OK, events),
        Err(e) => service_error(e),
    }
}

async fn force_advance(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.force_advance(&id).await {
        Ok(events) => events_response(StatusCode::OK, events),
        Err(e) => service_error(e),
    }
}

async fn reset(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.reset(&id).await {
        Ok(events) => events_response(StatusCode::OK, events),
        Err(e) => service_error(e),
    }
}

// ── Match handlers ────────────────────────────────────────────────────

async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    match state
        .service
        .submit(&id, req.match_id.as_deref(), req.participant, &req.content)
        .await
    {
        Ok(events) => events_response(StatusCode::OK, events),
        Err(e) => service_error(e),
    }
}

async fn get_match(
    State(state): State<AppState>,
    Path((id, match_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.service.match_view(&id, &match_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(json!(view))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Match not found").into_response(),
        Err(e) => service_error(e),
    }
}

async fn cast_vote(
    State(state): State<AppState>,
    Path((id, match_id)): Path<(String, String)>,
    Json(req): Json<VoteRequest>,
) -> impl IntoResponse {
    match state
        .service
        .cast_vote(&id, &match_id, req.voter, &req.choice)
        .await
    {
        Ok(receipt) => (StatusCode::OK, Json(json!(receipt))).into_response(),
        Err(e) => service_error(e),
    }
}

async fn end_voting(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path((id, match_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.service.end_voting(&id, &match_id).await {
        Ok(events) => events_response(StatusCode::OK, events),
        Err(e) => service_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let status = |e: EngineError| error_status(&ServiceError::Engine(e));
        assert_eq!(status(EngineError::SignupClosed), StatusCode::CONFLICT);
        assert_eq!(status(EngineError::AlreadyRegistered(1)), StatusCode::CONFLICT);
        assert_eq!(status(EngineError::InvalidContent), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(EngineError::InsufficientParticipants {
                needed: 2,
                current: 1
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&ServiceError::Database(sqlx::Error::RowNotFound)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
