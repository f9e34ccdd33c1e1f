use std::sync::Arc;

use lounge_core::types::{ConnId, NewMessage, UserInfo};
use lounge_protocol::{ClientCommand, ServerEvent};
use lounge_store::ChatStore;
use tracing::{debug, warn};

use crate::ws::hub::HubHandle;

/// Everything the router needs to act for one connection.
pub struct Session {
    pub conn_id: ConnId,
    pub user: UserInfo,
    pub hub: HubHandle,
    pub store: Arc<dyn ChatStore>,
}

/// Decode one inbound frame and act on it. Bad input never ends the
/// session; it is logged and dropped.
pub async fn handle(session: &Session, raw: &[u8]) {
    let command = match ClientCommand::decode(raw) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(conn_id = %session.conn_id, error = %e, "malformed frame");
            return;
        }
    };

    let result = match command {
        ClientCommand::Message(msg) => send_message(session, msg).await,
        ClientCommand::Ping => {
            session
                .hub
                .send_to(session.conn_id.clone(), ServerEvent::Pong)
                .await
        }
        // accepted but not relayed to other clients
        ClientCommand::Typing => Ok(()),
        ClientCommand::Unknown => {
            debug!(conn_id = %session.conn_id, "ignoring unrecognised frame type");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(conn_id = %session.conn_id, error = %e, "hub rejected request");
    }
}

async fn send_message(session: &Session, msg: NewMessage) -> lounge_core::Result<()> {
    if msg.content.trim().is_empty() {
        return Ok(());
    }

    match session.store.send(&session.user.id, msg).await {
        Ok(rendered) => session.hub.broadcast(ServerEvent::Message(rendered)).await,
        Err(e) => {
            warn!(
                conn_id = %session.conn_id,
                user_id = %session.user.id,
                error = %e,
                "send-message rejected"
            );
            session
                .hub
                .send_to(session.conn_id.clone(), ServerEvent::error(e.client_message()))
                .await
        }
    }
}
