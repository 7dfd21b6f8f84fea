use axum::extract::ws::{Message, WebSocket};
use drawsync_common::protocol::ws::{
    decode_client_message, encode_server_message, ClientMessage, DecodeError, ServerMessage,
};
use tracing::{debug, warn};

use crate::metrics;

/// Decode a text frame, logging and counting anything that cannot be dispatched.
///
/// Undecodable frames are skipped; the connection stays open.
pub fn decode_text_frame(raw: &str) -> Option<ClientMessage> {
    match decode_client_message(raw) {
        Ok(message) => Some(message),
        Err(error) => {
            metrics::record_ws_decode_error(decode_error_reason(&error));
            if error.is_forward_compatible() {
                debug!(error = %error, "ignoring unknown message type");
            } else {
                warn!(error = %error, bytes = raw.len(), "ignoring undecodable frame");
            }
            None
        }
    }
}

fn decode_error_reason(error: &DecodeError) -> &'static str {
    match error {
        DecodeError::InvalidJson(_) => "invalid_json",
        DecodeError::MissingType => "missing_type",
        DecodeError::UnknownType(_) => "unknown_type",
        DecodeError::Malformed { .. } => "malformed",
    }
}

pub async fn send_ws_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let encoded = encode_server_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
