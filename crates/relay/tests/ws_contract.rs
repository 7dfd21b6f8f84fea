use drawsync_common::protocol::ws::{
    decode_client_message, ClientMessage, ServerMessage, CANVAS_ELEMENT_ID, CLIENT_MESSAGE_TYPES,
};
use serde_json::{json, Map, Value};

const RELAY_WS_SESSION_SOURCE: &str = include_str!("../src/ws/session.rs");
const RELAY_WS_HANDLER_SOURCE: &str = include_str!("../src/ws/handler.rs");

#[test]
fn websocket_contract_heartbeat_and_frame_limits() {
    let heartbeat_interval_ms = parse_u64_const(RELAY_WS_SESSION_SOURCE, "HEARTBEAT_INTERVAL_MS");
    let heartbeat_timeout_ms = parse_u64_const(RELAY_WS_SESSION_SOURCE, "HEARTBEAT_TIMEOUT_MS");
    let max_frame_bytes = parse_u64_const(RELAY_WS_SESSION_SOURCE, "MAX_FRAME_BYTES");
    let session_id_len = parse_u64_const(RELAY_WS_SESSION_SOURCE, "SESSION_ID_LEN");

    assert_eq!(heartbeat_interval_ms, 15_000);
    assert_eq!(heartbeat_timeout_ms, 10_000);
    assert_eq!(max_frame_bytes, 8 * 1024 * 1024);
    assert_eq!(session_id_len, 8);
    assert!(
        heartbeat_timeout_ms < heartbeat_interval_ms,
        "pong timeout must be shorter than heartbeat interval",
    );
}

#[test]
fn websocket_contract_handler_covers_every_inbound_kind() {
    let variants = ["ClientMessage::UpdateXml", "ClientMessage::AcquireLock", "ClientMessage::ReleaseLock"];
    assert_eq!(variants.len(), CLIENT_MESSAGE_TYPES.len());
    for variant in variants {
        assert!(
            RELAY_WS_HANDLER_SOURCE.contains(variant),
            "dispatch must handle `{variant}`",
        );
    }
}

#[test]
fn websocket_contract_canvas_is_checked_before_lock_table() {
    assert_eq!(CANVAS_ELEMENT_ID, "canvas");
    assert!(RELAY_WS_HANDLER_SOURCE.contains("element_id != CANVAS_ELEMENT_ID"));
    assert!(RELAY_WS_HANDLER_SOURCE.contains("element_id == CANVAS_ELEMENT_ID"));
}

#[test]
fn websocket_contract_init_frame_shape() {
    let mut user = Map::new();
    user.insert("id".to_string(), json!("a1b2c3d4"));
    user.insert("name".to_string(), json!("Ada"));

    let init = ServerMessage::Init {
        xml: "<doc/>".to_string(),
        user_id: "a1b2c3d4".to_string(),
        users: vec![user],
        locks: [("Task_1".to_string(), "a1b2c3d4".to_string())].into_iter().collect(),
    };

    let value = serde_json::to_value(init).expect("init should serialize");
    assert_eq!(object_keys(&value), ["locks", "type", "user_id", "users", "xml"]);
    assert_eq!(value["type"], "init");
    assert_eq!(value["users"][0], json!({ "id": "a1b2c3d4", "name": "Ada" }));
    assert_eq!(value["locks"], json!({ "Task_1": "a1b2c3d4" }));
}

#[test]
fn websocket_contract_xml_update_keeps_null_author() {
    let value = serde_json::to_value(ServerMessage::XmlUpdate { xml: String::new(), by: None })
        .expect("xml_update should serialize");
    assert_eq!(value, json!({ "type": "xml_update", "xml": "", "by": null }));
}

#[test]
fn websocket_contract_inbound_frames_from_browser_clients() {
    let frames = [
        (
            r#"{"type":"update_xml","xml":"<doc/>","by":"a1b2c3d4"}"#,
            ClientMessage::UpdateXml { xml: "<doc/>".to_string(), by: Some("a1b2c3d4".to_string()) },
        ),
        (
            r#"{"type":"acquire_lock","element_id":"Task_1","user_id":"a1b2c3d4"}"#,
            ClientMessage::AcquireLock {
                element_id: "Task_1".to_string(),
                user_id: Some("a1b2c3d4".to_string()),
            },
        ),
        (
            r#"{"type":"release_lock","element_id":"Task_1","extra":true}"#,
            ClientMessage::ReleaseLock { element_id: "Task_1".to_string(), user_id: None },
        ),
    ];

    for (raw, expected) in frames {
        assert_eq!(decode_client_message(raw).expect("frame should decode"), expected);
    }
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("const {name}:");
    let index = source.find(&needle).expect("constant must be declared");
    let line = source[index..].lines().next().expect("constant declaration line must exist");
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}
