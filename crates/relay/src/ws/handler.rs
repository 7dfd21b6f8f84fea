use super::hub::Outbound;
use super::session::CollabState;
use crate::metrics;
use drawsync_common::protocol::ws::{ClientMessage, ServerMessage, UserInfo, CANVAS_ELEMENT_ID};
use tracing::{debug, info};
use uuid::Uuid;

/// Identity of one accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Connection {
    pub(crate) session_id: String,
    pub(crate) connection_id: Uuid,
}

/// `connecting -> active`: register the user, send `init` to the newcomer and
/// announce it to everyone.
pub(crate) async fn open_connection(
    state: &CollabState,
    info: UserInfo,
    outbound: Outbound,
) -> Connection {
    let (session_id, user) = state.sessions.open(info).await;
    let connection_id = Uuid::new_v4();

    // `init` is built and queued before the channel becomes visible to broadcasts.
    let init = async {
        ServerMessage::Init {
            xml: state.documents.read().await,
            user_id: session_id.clone(),
            users: state.sessions.list().await,
            locks: state.locks.snapshot().await,
        }
    };
    state.hub.join_with(connection_id, outbound, init).await;
    state.hub.broadcast(ServerMessage::UserJoin { user }).await;

    metrics::set_active_connections(state.hub.len().await);
    info!(session_id = %session_id, connection_id = %connection_id, "session opened");

    Connection { session_id, connection_id }
}

/// `active -> active`: apply one inbound message.
pub(crate) async fn dispatch(state: &CollabState, connection: &Connection, message: ClientMessage) {
    metrics::record_ws_message(message.kind());

    match message {
        ClientMessage::UpdateXml { xml, by } => handle_update_xml(state, connection, xml, by).await,
        ClientMessage::AcquireLock { element_id, user_id } => {
            log_foreign_user_id(connection, user_id.as_deref());
            handle_acquire_lock(state, connection, element_id).await;
        }
        ClientMessage::ReleaseLock { element_id, user_id } => {
            log_foreign_user_id(connection, user_id.as_deref());
            handle_release_lock(state, connection, element_id).await;
        }
    }
}

/// `active -> closed`: forget the connection, release its locks and tell the others.
pub(crate) async fn close_connection(state: &CollabState, connection: &Connection) {
    state.hub.leave(connection.connection_id).await;
    let released = state.sessions.unregister(&connection.session_id).await;

    state
        .hub
        .broadcast(ServerMessage::UserLeave { user_id: connection.session_id.clone() })
        .await;
    state.hub.broadcast(ServerMessage::LocksUpdate { locks: state.locks.snapshot().await }).await;

    metrics::set_active_connections(state.hub.len().await);
    info!(
        session_id = %connection.session_id,
        connection_id = %connection.connection_id,
        released_locks = released.len(),
        "session closed"
    );
}

async fn handle_update_xml(
    state: &CollabState,
    connection: &Connection,
    xml: String,
    by: Option<String>,
) {
    debug!(session_id = %connection.session_id, bytes = xml.len(), "document replaced");
    state.documents.replace(xml.clone()).await;
    state.hub.broadcast(ServerMessage::XmlUpdate { xml, by }).await;
}

async fn handle_acquire_lock(state: &CollabState, connection: &Connection, element_id: String) {
    let user_id = connection.session_id.clone();
    let acquired = element_id != CANVAS_ELEMENT_ID
        && state.locks.acquire(&element_id, &connection.session_id).await;

    debug!(session_id = %user_id, element_id = %element_id, acquired, "lock requested");
    let reply = if acquired {
        ServerMessage::LockAcquired { element_id, user_id }
    } else {
        metrics::increment_lock_denied();
        ServerMessage::LockDenied { element_id, user_id }
    };

    state.hub.send_to(connection.connection_id, reply).await;
    state.hub.broadcast(ServerMessage::LocksUpdate { locks: state.locks.snapshot().await }).await;
}

async fn handle_release_lock(state: &CollabState, connection: &Connection, element_id: String) {
    let user_id = connection.session_id.clone();

    if element_id == CANVAS_ELEMENT_ID {
        state.hub.broadcast(ServerMessage::LockReleaseFailed { element_id, user_id }).await;
        return;
    }

    let released = state.locks.release(&element_id, &connection.session_id).await;
    debug!(session_id = %user_id, element_id = %element_id, released, "lock release requested");

    if released {
        state.hub.broadcast(ServerMessage::LockReleased { element_id, user_id }).await;
        state
            .hub
            .broadcast(ServerMessage::LocksUpdate { locks: state.locks.snapshot().await })
            .await;
    } else {
        state.hub.broadcast(ServerMessage::LockReleaseFailed { element_id, user_id }).await;
    }
}

fn log_foreign_user_id(connection: &Connection, declared: Option<&str>) {
    if let Some(declared) = declared.filter(|declared| *declared != connection.session_id) {
        debug!(
            session_id = %connection.session_id,
            declared_user_id = %declared,
            "lock request names another user, attributing it to the connection's session"
        );
    }
}
