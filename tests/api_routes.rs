// Integration tests for the HTTP adapter: admin gating, error mapping and a
// complete two-player tournament driven through the JSON routes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use auxbattle::api;
use auxbattle::auth::AdminGate;
use auxbattle::db::Database;
use auxbattle::links::LinkPolicy;
use auxbattle::notifier::{BroadcastNotifier, Directory};
use auxbattle::service::{AuxBattleService, ServiceConfig};

const TOKEN: &str = "test-admin-token";

async fn test_app() -> Router {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let directory = Arc::new(Directory::new());
    let notifier = Arc::new(BroadcastNotifier::new(directory.clone()));
    let (service, _timers) = AuxBattleService::new(
        db,
        ServiceConfig::default(),
        Arc::new(LinkPolicy::default()),
        notifier.clone(),
        directory,
    );
    api::app(service, notifier, AdminGate::new(Some(TOKEN.into()), false))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

fn has_event(body: &Value, kind: &str) -> bool {
    body["events"]
        .as_array()
        .is_some_and(|events| events.iter().any(|e| e["type"] == kind))
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "auxbattle");

    auxbattle::metrics::register_metrics();
    let (status, body) = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("auxbattle_api_requests_total"));
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let app = test_app().await;
    let uri = "/api/sessions/g1/signup/open";

    let (status, body) = send(&app, "POST", uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, "POST", uri, Some("wrong"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "POST", uri, Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(has_event(&body, "signup_opened"));
}

#[tokio::test]
async fn test_signup_errors_map_to_statuses() {
    let app = test_app().await;
    let register = |id: u64| json!({ "participant": id, "display_name": format!("p{id}") });

    let (status, body) = send(&app, "POST", "/api/sessions/g1/participants", None, Some(register(1))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Signups are currently closed");

    send(&app, "POST", "/api/sessions/g1/signup/open", Some(TOKEN), None).await;
    let (status, body) = send(&app, "POST", "/api/sessions/g1/participants", None, Some(register(1))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(has_event(&body, "participant_registered"));

    let (status, _) = send(&app, "POST", "/api/sessions/g1/participants", None, Some(register(1))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "POST", "/api/sessions/g1/start", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "GET", "/api/sessions/g1/bracket", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_two_player_tournament_over_http() {
    let app = test_app().await;
    send(&app, "POST", "/api/sessions/g2/signup/open", Some(TOKEN), None).await;
    for id in [11u64, 22] {
        let (status, _) = send(
            &app,
            "POST",
            "/api/sessions/g2/participants",
            None,
            Some(json!({ "participant": id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, "POST", "/api/sessions/g2/start", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(has_event(&body, "tournament_started"));
    assert!(has_event(&body, "match_started"));

    let (_, snapshot) = send(&app, "GET", "/api/sessions/g2", None, None).await;
    assert_eq!(snapshot["is_signup_open"], false);
    let match_id = snapshot["tournament"]["active_matches"][0].as_str().unwrap().to_string();
    let player_a = snapshot["matches"][&match_id]["player_a"].as_u64().unwrap();
    let player_b = snapshot["matches"][&match_id]["player_b"].as_u64().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        "/api/sessions/g2/submissions",
        None,
        Some(json!({ "participant": player_a, "content": "https://example.com/song" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/sessions/g2/submissions",
        None,
        Some(json!({ "participant": 99, "content": "https://youtu.be/x" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Non-players are turned away before their content is looked at
    let (status, body) = send(
        &app,
        "POST",
        "/api/sessions/g2/submissions",
        None,
        Some(json!({ "participant": 99, "content": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/sessions/g2/submissions",
        None,
        Some(json!({ "participant": player_a, "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(
        &app,
        "POST",
        "/api/sessions/g2/submissions",
        None,
        Some(json!({ "participant": player_a, "content": "https://youtu.be/a", "match_id": match_id })),
    )
    .await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/sessions/g2/submissions",
        None,
        Some(json!({ "participant": player_b, "content": "https://soundcloud.com/b/b" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(has_event(&body, "voting_started"));

    let votes_uri = format!("/api/sessions/g2/matches/{match_id}/votes");
    let (status, body) = send(&app, "POST", &votes_uri, None, Some(json!({ "voter": 5, "choice": "1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["voters"], 1);
    let (status, _) = send(&app, "POST", &votes_uri, None, Some(json!({ "voter": 6, "choice": "maybe" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", &format!("/api/sessions/g2/matches/{match_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "voting");
    assert_eq!(body["live_tally"], json!([1, 0]));

    let end_uri = format!("/api/sessions/g2/matches/{match_id}/end-voting");
    let (status, _) = send(&app, "POST", &end_uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = send(&app, "POST", &end_uri, Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(has_event(&body, "match_completed"));
    assert!(has_event(&body, "tournament_completed"));

    let (status, _) = send(&app, "POST", &end_uri, Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, bracket) = send(&app, "GET", "/api/sessions/g2/bracket", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bracket["status"], "completed");
    assert_eq!(bracket["rounds"][0]["matches"][0]["winner"], player_a);

    let (_, sessions) = send(&app, "GET", "/api/sessions", None, None).await;
    assert_eq!(sessions, json!(["g2"]));

    let (status, body) = send(&app, "POST", "/api/sessions/g2/reset", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(has_event(&body, "tournament_reset"));
}
