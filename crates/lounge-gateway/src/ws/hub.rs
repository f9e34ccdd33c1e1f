use std::collections::VecDeque;

use lounge_core::types::{ChatMessage, ConnId};
use lounge_core::{LoungeError, Result};
use lounge_protocol::ServerEvent;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ws::connection::{ConnectionHandle, MailboxError};
use crate::ws::registry::SessionRegistry;
use crate::ws::send;

/// Requests accepted by the hub's control loop, applied strictly in arrival
/// order.
enum Control {
    Register {
        conn: ConnectionHandle,
        history: Option<Vec<ChatMessage>>,
    },
    Unregister {
        id: ConnId,
    },
    Broadcast {
        event: ServerEvent,
    },
    SendTo {
        id: ConnId,
        event: ServerEvent,
    },
    OnlineCount {
        reply: oneshot::Sender<usize>,
    },
}

/// A pending delivery: to one connection, or to everyone when `to` is None.
struct Outbound {
    to: Option<ConnId>,
    event: ServerEvent,
}

impl Outbound {
    fn all(event: ServerEvent) -> Self {
        Self { to: None, event }
    }

    fn one(id: ConnId, event: ServerEvent) -> Self {
        Self {
            to: Some(id),
            event,
        }
    }
}

/// The broadcast hub. Owns the session registry; everything else talks to it
/// through a [`HubHandle`].
pub struct Hub {
    rx: mpsc::Receiver<Control>,
    registry: SessionRegistry,
}

impl Hub {
    /// Start the control loop on the current runtime. It runs until every
    /// handle has been dropped.
    pub fn spawn(control_capacity: usize) -> HubHandle {
        let (tx, rx) = mpsc::channel(control_capacity.max(1));
        let hub = Hub {
            rx,
            registry: SessionRegistry::new(),
        };
        tokio::spawn(hub.run());
        HubHandle { tx }
    }

    async fn run(mut self) {
        info!("broadcast hub started");
        while let Some(msg) = self.rx.recv().await {
            self.apply(msg);
        }
        info!(remaining = self.registry.len(), "broadcast hub stopped");
    }

    fn apply(&mut self, msg: Control) {
        let mut queue = VecDeque::new();
        match msg {
            Control::Register { conn, history } => self.register(conn, history, &mut queue),
            Control::Unregister { id } => {
                if !self.drop_connection(&id, &mut queue) {
                    debug!(conn_id = %id, "unregister for unknown connection");
                }
            }
            Control::Broadcast { event } => queue.push_back(Outbound::all(event)),
            Control::SendTo { id, event } => queue.push_back(Outbound::one(id, event)),
            Control::OnlineCount { reply } => {
                let _ = reply.send(self.registry.len());
            }
        }
        self.flush(queue);
    }

    /// Insert the connection, then queue its private snapshot ahead of the
    /// join announcement so nothing broadcast later can overtake it. Counts
    /// are taken now, at the membership change they describe.
    fn register(
        &mut self,
        conn: ConnectionHandle,
        history: Option<Vec<ChatMessage>>,
        queue: &mut VecDeque<Outbound>,
    ) {
        let id = conn.id.clone();
        let user = conn.user.clone();
        if let Some(stale) = self.registry.insert(conn) {
            warn!(conn_id = %stale.id, "replaced connection registered under the same id");
        }
        info!(conn_id = %id, user_id = %user.id, online = self.registry.len(), "connection registered");

        if let Some(messages) = history {
            queue.push_back(Outbound::one(id.clone(), ServerEvent::History { messages }));
        }
        let count = self.registry.len();
        queue.push_back(Outbound::one(id, ServerEvent::OnlineCount { count }));
        queue.push_back(Outbound::all(ServerEvent::UserJoin { user }));
        queue.push_back(Outbound::all(ServerEvent::OnlineCount { count }));
    }

    /// Remove a connection and queue its leave announcement. Returns false
    /// when the id was not registered, in which case nothing is announced.
    fn drop_connection(&mut self, id: &ConnId, queue: &mut VecDeque<Outbound>) -> bool {
        let Some(conn) = self.registry.remove(id) else {
            return false;
        };
        info!(conn_id = %id, user_id = %conn.user.id, online = self.registry.len(), "connection removed");
        queue.push_back(Outbound::all(ServerEvent::UserLeave {
            user_id: conn.user.id.clone(),
        }));
        queue.push_back(Outbound::all(ServerEvent::OnlineCount {
            count: self.registry.len(),
        }));
        true
    }

    /// Deliver queued outbound events in order. Evictions triggered along the
    /// way append their own announcements to the same queue, so a cascade of
    /// slow consumers is processed iteratively.
    fn flush(&mut self, mut queue: VecDeque<Outbound>) {
        while let Some(Outbound { to, event }) = queue.pop_front() {
            let Some(frame) = send::encode(&event) else {
                continue;
            };

            let failed = match to {
                None => self.registry.fan_out(&frame),
                Some(id) => match self.registry.deliver(&id, frame) {
                    Some(Ok(())) => Vec::new(),
                    Some(Err(reason)) => vec![(id, reason)],
                    None => {
                        debug!(conn_id = %id, kind = event.kind(), "unicast target already gone");
                        Vec::new()
                    }
                },
            };

            for (id, reason) in failed {
                match reason {
                    MailboxError::Full => {
                        warn!(conn_id = %id, kind = event.kind(), "mailbox full, evicting slow consumer")
                    }
                    MailboxError::Closed => {
                        debug!(conn_id = %id, "mailbox closed, evicting")
                    }
                }
                self.drop_connection(&id, &mut queue);
            }
        }
    }
}

/// Cloneable front door to the hub. Every method is safe to call from any
/// task; requests are serialized by the control loop.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Control>,
}

impl HubHandle {
    async fn submit(&self, msg: Control) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| LoungeError::HubClosed)
    }

    /// Add a connection. `history` is delivered to it before any broadcast.
    pub async fn register(
        &self,
        conn: ConnectionHandle,
        history: Option<Vec<ChatMessage>>,
    ) -> Result<()> {
        self.submit(Control::Register { conn, history }).await
    }

    /// Remove a connection. Safe to call for ids already evicted.
    pub async fn unregister(&self, id: ConnId) -> Result<()> {
        self.submit(Control::Unregister { id }).await
    }

    pub async fn broadcast(&self, event: ServerEvent) -> Result<()> {
        self.submit(Control::Broadcast { event }).await
    }

    /// Deliver to a single connection, ordered with respect to broadcasts.
    pub async fn send_to(&self, id: ConnId, event: ServerEvent) -> Result<()> {
        self.submit(Control::SendTo { id, event }).await
    }

    /// Current registry size. Also a barrier: every request submitted before
    /// this one has been applied by the time it returns.
    pub async fn online_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.submit(Control::OnlineCount { reply }).await?;
        rx.await.map_err(|_| LoungeError::HubClosed)
    }
}
