// Plain HTTP read access to the shared document, for clients that only need a
// snapshot and do not join the WebSocket session.

use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    routing::get,
    Router,
};
use tracing::debug;

use crate::ws::CollabState;

const XML_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub fn router(state: CollabState) -> Router {
    Router::new().route("/xml", get(get_xml)).with_state(state)
}

async fn get_xml(State(state): State<CollabState>) -> impl IntoResponse {
    let xml = state.documents().read().await;
    debug!(bytes = xml.len(), "serving document snapshot");
    ([(CONTENT_TYPE, XML_CONTENT_TYPE)], xml)
}
