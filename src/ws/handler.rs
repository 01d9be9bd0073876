//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::session::Admission;
use crate::game::{CharacterId, PlayerIntent, SessionHandle, SessionRegistry};
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Longest accepted display name, in characters
const MAX_DISPLAY_NAME: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name shown to other players
    pub name: Option<String>,
    /// Join this session instead of any session with room
    pub session: Option<Uuid>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    // Resolve the session before upgrading so bad ids get a plain HTTP error
    let session = state.sessions.join_target(query.session).map_err(|e| {
        warn!(requested = ?query.session, error = %e, "WebSocket join refused");
        AppError::from(e)
    })?;

    let character_id = CharacterId::new();
    let display_name = display_name(query.name.as_deref(), character_id);
    info!(character_id = %character_id, session_id = %session.id, "WebSocket upgrade");

    let registry = Arc::clone(&state.sessions);
    let requested = query.session;
    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, registry, session, requested, character_id, display_name)
    }))
}

/// Trimmed, length-capped name, or a generated one
fn display_name(requested: Option<&str>, character_id: CharacterId) -> String {
    let name: String = requested
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_NAME)
        .collect();
    if name.is_empty() {
        format!("Player_{}", &character_id.to_string()[..8])
    } else {
        name
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    session: SessionHandle,
    requested: Option<Uuid>,
    character_id: CharacterId,
    display_name: String,
) {
    info!(character_id = %character_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        character_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(character_id = %character_id, error = %e, "Failed to send welcome");
        return;
    }

    // Only a character the session accepted gets a connection loop
    let admission = registry
        .admit(session, requested, character_id, &display_name)
        .await;
    let Admission {
        handle,
        events,
        joined,
    } = match admission {
        Ok(admission) => admission,
        Err(e) => {
            warn!(character_id = %character_id, error = %e, "Join refused, closing connection");
            let refusal = ServerMsg::Error {
                character_id: Some(character_id),
                code: e.code().to_string(),
                message: e.to_string(),
            };
            let _ = send_msg(&mut ws_sink, &refusal).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    if let Err(e) = send_msg(&mut ws_sink, &joined).await {
        error!(character_id = %character_id, error = %e, "Failed to send session state");
        let _ = handle
            .send(PlayerIntent {
                character_id,
                msg: ClientMsg::Leave,
                received_at: unix_millis(),
            })
            .await;
        return;
    }

    run_connection(character_id, ws_sink, ws_stream, handle, events).await;

    info!(character_id = %character_id, "WebSocket connection closed");
}

/// Pump messages between the socket and the session until either side ends
async fn run_connection(
    character_id: CharacterId,
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    session: SessionHandle,
    event_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    // Replies meant only for this connection (pong)
    let (direct_tx, direct_rx) = mpsc::channel::<ServerMsg>(16);

    let writer_handle = tokio::spawn(write_loop(character_id, ws_sink, event_rx, direct_rx));

    // Reader loop: WebSocket -> session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(character_id = %character_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                };

                let allowed = match msg {
                    ClientMsg::ChatRequest { .. } => rate_limiter.check_chat(),
                    _ => rate_limiter.check_intent(),
                };
                if !allowed {
                    warn!(character_id = %character_id, "Rate limited client message");
                    continue;
                }

                match msg {
                    ClientMsg::Ping { t } => {
                        let _ = direct_tx.try_send(ServerMsg::Pong { t });
                    }
                    ClientMsg::Join { .. } => {
                        debug!(character_id = %character_id, "Ignoring repeated join");
                    }
                    ClientMsg::Leave => break,
                    msg => {
                        let intent = PlayerIntent {
                            character_id,
                            msg,
                            received_at: unix_millis(),
                        };
                        if session.send(intent).await.is_err() {
                            debug!(character_id = %character_id, "Session input closed");
                            break;
                        }
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(character_id = %character_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(character_id = %character_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(character_id = %character_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the session; this releases any held weapon
    let _ = session
        .send(PlayerIntent {
            character_id,
            msg: ClientMsg::Leave,
            received_at: unix_millis(),
        })
        .await;

    writer_handle.abort();
}

/// Forward session broadcasts meant for this character, plus direct replies
async fn write_loop(
    character_id: CharacterId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut event_rx: broadcast::Receiver<ServerMsg>,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
) {
    loop {
        let msg = tokio::select! {
            event = event_rx.recv() => match event {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(character_id = %character_id, lagged_count = n, "Client lagged, skipped {} messages", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(character_id = %character_id, "Session channel closed");
                    break;
                }
            },
            Some(msg) = direct_rx.recv() => msg,
        };

        if !msg.is_for(character_id) {
            continue;
        }
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(character_id = %character_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
