//! WebSocket log streaming.
//!
//! A client sends `{"type":"subscribe","projectId":"..."}` and then receives
//! that project's `log` and `files_synced` envelopes until it subscribes to
//! another project or disconnects.

use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::state::AppState;
use crate::hub::{LogEvent, LogHub, LogSubscription, SyncAction};

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// Messages accepted from clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "projectId")]
        project_id: String,
    },
    Unsubscribe,
    Ping,
}

/// Messages sent to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Log {
        #[serde(rename = "projectId")]
        project_id: String,
        message: String,
    },
    FilesSynced {
        #[serde(rename = "projectId")]
        project_id: String,
        action: SyncAction,
        path: String,
    },
    Subscribed {
        #[serde(rename = "projectId")]
        project_id: String,
    },
    Pong,
    Error {
        message: String,
    },
}

impl ServerMessage {
    fn from_event(project_id: &str, event: LogEvent) -> Self {
        match event {
            LogEvent::Log { message } => ServerMessage::Log {
                project_id: project_id.to_string(),
                message,
            },
            LogEvent::FilesSynced { action, path } => ServerMessage::FilesSynced {
                project_id: project_id.to_string(),
                action,
                path,
            },
        }
    }
}

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.supervisor.hub().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Next event of the current subscription; pending forever without one.
async fn next_event(subscription: &mut Option<LogSubscription>) -> Option<LogEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

fn drop_subscription(hub: &LogHub, subscription: &mut Option<LogSubscription>) {
    if let Some(sub) = subscription.take() {
        hub.unsubscribe(&sub.project_id, sub.id);
    }
}

async fn handle_socket(socket: WebSocket, hub: LogHub) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription: Option<LogSubscription> = None;
    let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    info!("log stream connected");

    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Subscribe { project_id }) => {
                                drop_subscription(&hub, &mut subscription);
                                subscription = Some(hub.subscribe(&project_id));
                                debug!(
                                    project_id,
                                    subscribers = hub.subscriber_count(&project_id),
                                    "client subscribed to logs"
                                );
                                Some(ServerMessage::Subscribed { project_id })
                            }
                            Ok(ClientMessage::Unsubscribe) => {
                                drop_subscription(&hub, &mut subscription);
                                None
                            }
                            Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
                            Err(e) => {
                                warn!("failed to parse client message: {} - {}", e, text.as_str());
                                Some(ServerMessage::Error {
                                    message: format!("invalid message: {}", e),
                                })
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        debug!("websocket receive error: {}", e);
                        break;
                    }
                }
            }
            event = next_event(&mut subscription) => {
                match (event, subscription.as_ref()) {
                    (Some(event), Some(sub)) => Some(ServerMessage::from_event(&sub.project_id, event)),
                    _ => {
                        subscription = None;
                        None
                    }
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                None
            }
        };

        let Some(outgoing) = outgoing else {
            continue;
        };
        let json = match serde_json::to_string(&outgoing) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }

    drop_subscription(&hub, &mut subscription);
    info!("log stream disconnected");
}
