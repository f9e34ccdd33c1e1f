use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::Message, ws::WebSocket, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use lounge_core::config::HubConfig;
use lounge_core::types::{ConnId, UserInfo};
use lounge_store::{ChatStore, UserDirectory};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::auth::bearer_token;
use crate::ws::hub::HubHandle;
use crate::ws::router::{self, Session};
use crate::ws::send::{self, Frame};

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox full")]
    Full,
    #[error("mailbox closed")]
    Closed,
}

/// The hub's view of a connection: identity plus the sending half of its
/// mailbox. The registry holds the only one, so removing the entry closes
/// the mailbox.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnId,
    pub user: UserInfo,
    mailbox: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    pub fn new(id: ConnId, user: UserInfo, mailbox: mpsc::Sender<Frame>) -> Self {
        Self { id, user, mailbox }
    }

    /// Queue a frame without waiting. Never blocks the caller.
    pub fn enqueue(&self, frame: Frame) -> Result<(), MailboxError> {
        self.mailbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }
}

/// One client session, from upgrade to teardown.
pub struct Connection {
    id: ConnId,
    user: UserInfo,
    mailbox: mpsc::Receiver<Frame>,
    handle: ConnectionHandle,
}

impl Connection {
    pub fn new(user: UserInfo, mailbox_capacity: usize) -> Self {
        let id = ConnId::new();
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let handle = ConnectionHandle::new(id.clone(), user.clone(), tx);
        Self {
            id,
            user,
            mailbox: rx,
            handle,
        }
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Register with the hub, run both pumps, and unregister when either
    /// side stops. The transport is closed exactly once, by the write pump.
    pub async fn run<W, S, E>(
        self,
        sink: W,
        stream: S,
        hub: HubHandle,
        store: Arc<dyn ChatStore>,
        config: &HubConfig,
    ) where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display,
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let Connection {
            id,
            user,
            mailbox,
            handle,
        } = self;

        let history = match store.recent(config.history_limit, None).await {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!(conn_id = %id, error = %e, "history unavailable, joining without snapshot");
                None
            }
        };
        if let Err(e) = hub.register(handle, history).await {
            error!(conn_id = %id, error = %e, "could not register connection");
            return;
        }

        let writer = tokio::spawn(write_pump(
            id.clone(),
            mailbox,
            sink,
            config.ping_interval(),
        ));
        let session = Session {
            conn_id: id.clone(),
            user,
            hub: hub.clone(),
            store,
        };
        read_pump(&session, stream, writer, config.max_frame_bytes).await;

        if let Err(e) = hub.unregister(id.clone()).await {
            debug!(conn_id = %id, error = %e, "unregister after hub shutdown");
        }
        info!(conn_id = %id, "chat connection closed");
    }
}

/// Drain the mailbox onto the transport in FIFO order, probing with a ping
/// after `ping_every` of silence. Ends when the mailbox closes or a write
/// fails, then closes the sink.
pub(crate) async fn write_pump<W>(
    conn_id: ConnId,
    mut mailbox: mpsc::Receiver<Frame>,
    mut sink: W,
    ping_every: Duration,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut probe = interval_at(Instant::now() + ping_every, ping_every);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = mailbox.recv() => {
                let Some(frame) = frame else {
                    debug!(conn_id = %conn_id, "mailbox closed");
                    break;
                };
                if let Err(e) = sink.send(send::text(frame)).await {
                    debug!(conn_id = %conn_id, error = %e, "write failed");
                    break;
                }
                probe.reset();
            }
            _ = probe.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    debug!(conn_id = %conn_id, error = %e, "ping failed");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Route inbound frames until the peer goes away, a frame is oversized, or
/// the write pump finishes.
pub(crate) async fn read_pump<S, E>(
    session: &Session,
    mut stream: S,
    mut writer: JoinHandle<()>,
    max_frame_bytes: usize,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let conn_id = &session.conn_id;
    loop {
        tokio::select! {
            msg = stream.next() => {
                let raw = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    // ping/pong are answered by the transport
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "read failed");
                        break;
                    }
                };
                if raw.len() > max_frame_bytes {
                    warn!(conn_id = %conn_id, size = raw.len(), max = max_frame_bytes, "frame too large");
                    break;
                }
                router::handle(session, &raw).await;
            }
            _ = &mut writer => {
                debug!(conn_id = %conn_id, "write pump finished");
                break;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatWsParams {
    #[serde(default)]
    token: Option<String>,
}

/// Axum handler: upgrades GET /ws/chat once the caller's token resolves.
pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ChatWsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();

    let user = match state.users.resolve_token(token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("chat upgrade rejected: unknown token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(e) => {
            error!(error = %e, "token lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let max = state.config.hub.max_frame_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_connection(socket, user.info, state))
}

async fn run_connection(socket: WebSocket, user: UserInfo, state: Arc<AppState>) {
    let conn = Connection::new(user, state.config.hub.mailbox_capacity);
    info!(conn_id = %conn.id(), user_id = %conn.user.id, "new chat connection");

    let (sink, stream) = socket.split();
    let store: Arc<dyn ChatStore> = state.chat.clone();
    conn.run(sink, stream, state.hub.clone(), store, &state.config.hub)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::hub::Hub;
    use futures_util::stream;
    use lounge_core::types::UserRole;
    use lounge_protocol::ServerEvent;
    use lounge_store::{init_db, SqliteChatStore, SqliteUserDirectory};
    use std::sync::Mutex;
    use tokio_util::sync::PollSender;

    type Inbound = Result<Message, std::convert::Infallible>;

    fn decode(msg: Message) -> ServerEvent {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn store_with_user() -> (Arc<SqliteChatStore>, UserInfo) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let user = SqliteUserDirectory::new(db.clone())
            .create_user("mika", "Mika", 12, UserRole::User, "tok")
            .unwrap();
        (Arc::new(SqliteChatStore::new(db)), user.info)
    }

    #[tokio::test]
    async fn write_pump_preserves_order_and_closes_sink() {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(8);
        for frame in ["one", "two", "three"] {
            mailbox_tx.try_send(Frame::from(frame)).unwrap();
        }
        drop(mailbox_tx);

        write_pump(
            ConnId::new(),
            mailbox_rx,
            PollSender::new(out_tx),
            Duration::from_secs(30),
        )
        .await;

        let mut got = Vec::new();
        while let Some(Message::Text(text)) = out_rx.recv().await {
            got.push(text.as_str().to_string());
        }
        assert_eq!(got, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn write_pump_pings_when_idle() {
        let (mailbox_tx, mailbox_rx) = mpsc::channel::<Frame>(8);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(8);
        let pump = tokio::spawn(write_pump(
            ConnId::new(),
            mailbox_rx,
            PollSender::new(out_tx),
            Duration::from_millis(20),
        ));

        let first = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, Message::Ping(_)));

        drop(mailbox_tx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn write_pump_stops_when_transport_fails() {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(8);
        let (out_tx, out_rx) = mpsc::channel::<Message>(1);
        drop(out_rx);
        mailbox_tx.try_send(Frame::from("lost")).unwrap();

        // returns even though the mailbox is still open
        tokio::time::timeout(
            Duration::from_secs(2),
            write_pump(
                ConnId::new(),
                mailbox_rx,
                PollSender::new(out_tx),
                Duration::from_secs(30),
            ),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn read_pump_drops_oversized_frames() {
        let (store, user) = store_with_user();
        let hub = Hub::spawn(16);
        let session = Session {
            conn_id: ConnId::new(),
            user: user.clone(),
            hub: hub.clone(),
            store,
        };
        let (tx, mut rx) = mpsc::channel(16);
        hub.register(ConnectionHandle::new(session.conn_id.clone(), user, tx), None)
            .await
            .unwrap();
        hub.online_count().await.unwrap();
        while rx.try_recv().is_ok() {}

        let big = format!(r#"{{"type":"message","content":"{}"}}"#, "x".repeat(64));
        let frames: Vec<Inbound> = vec![
            Ok(Message::Text(r#"{"type":"ping"}"#.into())),
            Ok(Message::Text(big.into())),
            Ok(Message::Text(r#"{"type":"ping"}"#.into())),
        ];
        let writer = tokio::spawn(std::future::pending::<()>());

        read_pump(&session, stream::iter(frames), writer, 32).await;
        hub.online_count().await.unwrap();

        // only the ping ahead of the oversized frame was answered
        let frame = rx.try_recv().unwrap();
        assert_eq!(serde_json::from_str::<ServerEvent>(frame.as_str()).unwrap(), ServerEvent::Pong);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_pump_exits_when_writer_finishes() {
        let (store, user) = store_with_user();
        let session = Session {
            conn_id: ConnId::new(),
            user,
            hub: Hub::spawn(16),
            store,
        };
        let writer = tokio::spawn(async {});

        tokio::time::timeout(
            Duration::from_secs(2),
            read_pump(&session, stream::pending::<Inbound>(), writer, 4096),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn session_round_trip() {
        let (store, user) = store_with_user();
        let hub = Hub::spawn(16);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
        let frames: Vec<Inbound> = vec![
            Ok(Message::Text(r#"{"type":"ping"}"#.into())),
            Ok(Message::Text(r#"{"type":"message","content":"hello"}"#.into())),
            Ok(Message::Close(None)),
        ];

        let conn = Connection::new(user.clone(), 16);
        conn.run(
            PollSender::new(out_tx),
            stream::iter(frames),
            hub.clone(),
            store,
            &HubConfig::default(),
        )
        .await;
        assert_eq!(hub.online_count().await.unwrap(), 0);

        let mut events = Vec::new();
        while let Some(msg) = out_rx.recv().await {
            events.push(decode(msg));
        }
        assert_eq!(events[0], ServerEvent::History { messages: vec![] });
        assert_eq!(events[1], ServerEvent::OnlineCount { count: 1 });
        assert_eq!(events[2], ServerEvent::UserJoin { user: user.clone() });
        assert_eq!(events[3], ServerEvent::OnlineCount { count: 1 });
        assert_eq!(events[4], ServerEvent::Pong);
        match &events[5] {
            ServerEvent::Message(msg) => {
                assert_eq!(msg.content, "hello");
                assert_eq!(msg.user.id, user.id);
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(events.len(), 6);
    }
}
