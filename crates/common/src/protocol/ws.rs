// WebSocket message types for the diagram collaboration protocol.
//
// Every frame is a JSON object with a `type` discriminator. Inbound kinds the
// relay does not know are skipped rather than rejected, so older relays keep
// working with newer clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Element id of the diagram background. It can never be locked.
pub const CANVAS_ELEMENT_ID: &str = "canvas";

/// Inbound `type` values understood by the relay.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &["update_xml", "acquire_lock", "release_lock"];

/// Point-in-time copy of the lock table: element id -> owning session id.
pub type LockSnapshot = BTreeMap<String, String>;

/// Opaque per-user metadata. Always carries an `id` entry.
pub type UserInfo = Map<String, Value>;

/// Client -> Server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the whole shared document.
    UpdateXml {
        #[serde(default)]
        xml: String,
        #[serde(default)]
        by: Option<String>,
    },

    /// Ask for exclusive ownership of one element.
    AcquireLock {
        element_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    /// Give up ownership of one element.
    ReleaseLock {
        element_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

impl ClientMessage {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UpdateXml { .. } => "update_xml",
            Self::AcquireLock { .. } => "acquire_lock",
            Self::ReleaseLock { .. } => "release_lock",
        }
    }
}

/// Server -> Client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once to a freshly accepted connection.
    Init { xml: String, user_id: String, users: Vec<UserInfo>, locks: LockSnapshot },

    UserJoin { user: UserInfo },

    UserLeave { user_id: String },

    XmlUpdate { xml: String, by: Option<String> },

    LockAcquired { element_id: String, user_id: String },

    LockDenied { element_id: String, user_id: String },

    LockReleased { element_id: String, user_id: String },

    LockReleaseFailed { element_id: String, user_id: String },

    /// Full lock table, sent after every change that may affect overlays.
    LocksUpdate { locks: LockSnapshot },
}

impl ServerMessage {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::UserJoin { .. } => "user_join",
            Self::UserLeave { .. } => "user_leave",
            Self::XmlUpdate { .. } => "xml_update",
            Self::LockAcquired { .. } => "lock_acquired",
            Self::LockDenied { .. } => "lock_denied",
            Self::LockReleased { .. } => "lock_released",
            Self::LockReleaseFailed { .. } => "lock_release_failed",
            Self::LocksUpdate { .. } => "locks_update",
        }
    }
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("malformed `{kind}` message")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Unknown kinds are expected from newer clients and are not worth a warning.
    pub fn is_forward_compatible(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

/// Decode one text frame.
pub fn decode_client_message(raw: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(DecodeError::InvalidJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_owned();

    if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| DecodeError::Malformed { kind, source })
}

pub fn encode_server_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
