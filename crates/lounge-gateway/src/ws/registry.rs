use std::collections::HashMap;

use lounge_core::types::ConnId;

use crate::ws::connection::{ConnectionHandle, MailboxError};
use crate::ws::send::Frame;

/// Live connections keyed by id. Owned exclusively by the hub's control loop,
/// so membership changes and fan-out never interleave.
#[derive(Default)]
pub struct SessionRegistry {
    conns: HashMap<ConnId, ConnectionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection, returning any previous entry under the same id.
    pub fn insert(&mut self, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        self.conns.insert(conn.id.clone(), conn)
    }

    /// Remove a connection. Dropping the returned handle closes its mailbox
    /// because the registry holds the only sender.
    pub fn remove(&mut self, id: &ConnId) -> Option<ConnectionHandle> {
        self.conns.remove(id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Offer a frame to one connection. `None` when the id is not registered.
    pub fn deliver(&self, id: &ConnId, frame: Frame) -> Option<Result<(), MailboxError>> {
        self.conns.get(id).map(|conn| conn.enqueue(frame))
    }

    /// Offer a frame to every connection without waiting on any of them.
    /// Returns the connections that could not accept it.
    pub fn fan_out(&self, frame: &Frame) -> Vec<(ConnId, MailboxError)> {
        self.conns
            .values()
            .filter_map(|conn| {
                conn.enqueue(frame.clone())
                    .err()
                    .map(|reason| (conn.id.clone(), reason))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lounge_core::types::UserInfo;
    use tokio::sync::mpsc;

    fn handle(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(ConnId::new(), UserInfo::default(), tx), rx)
    }

    #[test]
    fn fan_out_reports_full_and_closed_mailboxes() {
        let mut reg = SessionRegistry::new();
        let (ok, mut ok_rx) = handle(4);
        let (full, _full_rx) = handle(1);
        let (gone, gone_rx) = handle(4);
        let (full_id, gone_id) = (full.id.clone(), gone.id.clone());
        reg.insert(ok);
        reg.insert(full);
        reg.insert(gone);
        drop(gone_rx);

        assert!(reg.fan_out(&Frame::from("first")).iter().any(|(id, _)| *id == gone_id));

        let mut failed = reg.fan_out(&Frame::from("second"));
        failed.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        let mut expected = vec![
            (full_id, MailboxError::Full),
            (gone_id, MailboxError::Closed),
        ];
        expected.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        assert_eq!(failed, expected);

        assert_eq!(ok_rx.try_recv().unwrap().as_str(), "first");
        assert_eq!(ok_rx.try_recv().unwrap().as_str(), "second");
        // reporting does not remove anything; that is the hub's call
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn remove_closes_mailbox() {
        let mut reg = SessionRegistry::new();
        let (conn, mut rx) = handle(4);
        let id = conn.id.clone();
        reg.insert(conn);
        assert_eq!(reg.len(), 1);

        assert!(reg.remove(&id).is_some());
        assert_eq!(reg.len(), 0);
        assert!(reg.remove(&id).is_none());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn deliver_to_unknown_id_is_none() {
        let reg = SessionRegistry::new();
        assert!(reg.deliver(&ConnId::new(), Frame::from("x")).is_none());
    }
}
