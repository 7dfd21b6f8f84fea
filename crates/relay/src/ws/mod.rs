pub mod handler;
pub mod hub;
pub mod protocol;
pub mod session;

pub use session::CollabState;

use crate::error::{current_request_id, request_id_from_headers_or_generate, with_request_id_scope};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use drawsync_common::protocol::ws::UserInfo;
use serde_json::Value;
use std::{collections::HashMap, future::Future, time::Duration};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use self::protocol::{decode_text_frame, send_ws_message};
use self::session::{HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};

/// Liveness timings of one socket.
///
/// A ping goes out every `interval`; an outstanding ping must be answered, or
/// any other frame received, within `timeout`. A single socket write may not
/// take longer than `timeout` either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Heartbeat {
    pub(crate) interval: Duration,
    pub(crate) timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
        }
    }
}

pub fn router(state: CollabState) -> Router {
    router_with_heartbeat(state, Heartbeat::default())
}

pub(crate) fn router_with_heartbeat(state: CollabState, heartbeat: Heartbeat) -> Router {
    Router::new()
        .route(
            "/ws",
            get(
                move |state: State<CollabState>,
                      params: Query<HashMap<String, String>>,
                      headers: HeaderMap,
                      ws: WebSocketUpgrade| {
                    ws_upgrade(state, params, headers, ws, heartbeat)
                },
            ),
        )
        .with_state(state)
}

/// Query parameters of the upgrade request become the user's info entries.
async fn ws_upgrade(
    State(state): State<CollabState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    heartbeat: Heartbeat,
) -> impl IntoResponse {
    let info: UserInfo =
        params.into_iter().map(|(key, value)| (key, Value::String(value))).collect();
    let request_id = request_id_from_headers_or_generate(&headers);

    ws.max_frame_size(MAX_FRAME_BYTES as usize)
        .max_message_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, info, socket, heartbeat)).await;
        })
}

async fn handle_socket(
    state: CollabState,
    info: UserInfo,
    mut socket: WebSocket,
    heartbeat: Heartbeat,
) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel();
    let connection = handler::open_connection(&state, info, outbound_sender).await;
    let session_id = connection.session_id.clone();

    let mut heartbeat_interval = tokio::time::interval(heartbeat.interval);
    heartbeat_interval.reset();
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                let ping = socket.send(Message::Ping(Vec::new().into()));
                if !write_within(heartbeat.timeout, &session_id, ping).await {
                    break;
                }
                pong_deadline.get_or_insert_with(|| Instant::now() + heartbeat.timeout);
            }
            _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                if pong_deadline.is_some() =>
            {
                warn!(
                    session_id = %session_id,
                    request_id = %request_id,
                    "heartbeat timeout, disconnecting"
                );
                break;
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        let write = send_ws_message(&mut socket, &outbound_message);
                        if !write_within(heartbeat.timeout, &session_id, write).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };
                pong_deadline = None;

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if let Some(inbound) = decode_text_frame(raw_message.as_str()) {
                            handler::dispatch(&state, &connection, inbound).await;
                        }
                    }
                    Ok(Message::Binary(payload)) => {
                        debug!(session_id = %session_id, bytes = payload.len(), "ignoring binary frame");
                    }
                    Ok(Message::Ping(payload)) => {
                        let pong = socket.send(Message::Pong(payload));
                        if !write_within(heartbeat.timeout, &session_id, pong).await {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        debug!(session_id = %session_id, error = %error, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    handler::close_connection(&state, &connection).await;
    info!(session_id = %session_id, request_id = %request_id, "websocket closed");
}

/// False when the write failed or the peer stopped draining its socket.
async fn write_within<E>(
    limit: Duration,
    session_id: &str,
    write: impl Future<Output = Result<(), E>>,
) -> bool {
    match tokio::time::timeout(limit, write).await {
        Ok(result) => result.is_ok(),
        Err(_) => {
            warn!(session_id = %session_id, "websocket write timed out, disconnecting");
            false
        }
    }
}
