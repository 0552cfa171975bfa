// WebSocket handler for tournament event streaming.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;

use super::AppState;
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct EventStreamParams {
    /// Only forward announcements for this session.
    pub session: Option<String>,
}

/// WebSocket upgrade handler for the announcement stream.
pub async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<EventStreamParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, params.session))
}

fn wanted(message: &str, session: Option<&str>) -> bool {
    let Some(session) = session else {
        return true;
    };
    serde_json::from_str::<serde_json::Value>(message)
        .map(|v| v["session"] == session)
        .unwrap_or(false)
}

async fn handle_ws(mut socket: WebSocket, state: AppState, session: Option<String>) {
    let mut rx = state.notifier.subscribe();
    metrics::CONNECTED_WEBSOCKETS.inc();
    tracing::debug!(
        session = session.as_deref(),
        "WebSocket client connected ({} listening)",
        state.notifier.subscriber_count()
    );

    // Forward announcements until the client disconnects or the channel closes.
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if !wanted(&msg, session.as_deref()) {
                            continue;
                        }
                        if socket.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                        metrics::WEBSOCKET_MESSAGES_SENT_TOTAL.inc();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket client lagged, skipped {n} announcements");
                    }
                }
            }
            // Client messages are ignored; only watch for disconnect
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    metrics::CONNECTED_WEBSOCKETS.dec();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_filter() {
        let msg = r#"{"session":"g1","message":"hi","event":{"type":"signup_opened"}}"#;
        assert!(wanted(msg, None));
        assert!(wanted(msg, Some("g1")));
        assert!(!wanted(msg, Some("g2")));
        assert!(!wanted("not json", Some("g1")));
    }
}
