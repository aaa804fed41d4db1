//! `WebSocket` handler for real-time event streaming.
//!
//! Clients connect to `GET /ws/events` and receive every dispatched event
//! as a JSON text frame. Each connection holds its own observer-scoped
//! subscription, so a slow client only loses its own oldest events.
//!
//! `?topics=interaction,system` narrows the stream; the default is every
//! topic.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use society_core::bus::{Subscription, SubscriberScope};
use society_types::EventTopic;
use tracing::{debug, warn};

use crate::error::ObserverError;
use crate::state::AppState;

/// Query parameters for `GET /ws/events`.
#[derive(Debug, serde::Deserialize)]
pub struct StreamQuery {
    /// Comma-separated topic names.
    pub topics: Option<String>,
}

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming events.
///
/// # Route
///
/// `GET /ws/events`
pub async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let topics = parse_topics(params.topics.as_deref())?;
    let name = state.next_stream_name();
    let subscription = state
        .bus()
        .subscribe_many(SubscriberScope::Observer(name), &topics, None)
        .map_err(|e| ObserverError::Internal(e.to_string()))?;
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, subscription)))
}

fn parse_topics(raw: Option<&str>) -> Result<Vec<EventTopic>, ObserverError> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(EventTopic::ALL.to_vec());
    };
    raw.split(',')
        .map(|name| {
            name.trim()
                .parse::<EventTopic>()
                .map_err(|e| ObserverError::InvalidRequest(e.to_string()))
        })
        .collect()
}

/// Forward events until the client leaves or the bus shuts down. Dropping
/// the subscription on return unregisters it.
async fn handle_ws(mut socket: WebSocket, subscription: Subscription) {
    debug!(subscriber = %subscription.scope(), "WebSocket client connected");

    loop {
        tokio::select! {
            received = subscription.recv() => {
                let Some(event) = received else {
                    debug!("Event bus closed, shutting down WebSocket");
                    return;
                };
                let json = match serde_json::to_string(event.as_ref()) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to serialize event: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(
                            subscriber = %subscription.scope(),
                            dropped = subscription.dropped(),
                            "WebSocket client disconnected"
                        );
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn topics_default_to_all() {
        assert_eq!(parse_topics(None).unwrap().len(), EventTopic::ALL.len());
        assert_eq!(parse_topics(Some(" ")).unwrap().len(), EventTopic::ALL.len());
    }

    #[test]
    fn topics_are_parsed_from_csv() {
        let topics = parse_topics(Some("interaction, system")).unwrap();
        assert_eq!(topics, vec![EventTopic::Interaction, EventTopic::System]);
        assert!(parse_topics(Some("interaction,gossip")).is_err());
    }
}
