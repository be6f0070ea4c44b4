use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::SendMessage;

const PARTICIPANT_COLORS: [&str; 10] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4",
    "#42d4f4", "#f032e6", "#469990", "#9a6324", "#800000",
];

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one duplex connection, unique for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity established at handshake time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
}

/// A join whose store fetch has not come back yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingJoin {
    pub document_id: String,
    pub ticket: u64,
}

/// Outcome of queueing a message for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full, message was droppable and has been discarded.
    Dropped,
    /// Queue full, message could not be discarded.
    Overflow,
    /// Writer side is gone.
    Closed,
    Unknown,
}

#[derive(Debug)]
pub struct Session {
    pub identity: Identity,
    pub color: String,
    pub room: Option<String>,
    pub pending_join: Option<PendingJoin>,
    outbox: mpsc::Sender<SendMessage>,
}

/// Per-connection state owned by the relay.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
    next_ticket: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn: ConnectionId, identity: Identity, outbox: mpsc::Sender<SendMessage>) {
        let color = color_for(&identity.user_id).to_string();
        self.sessions.insert(
            conn,
            Session {
                identity,
                color,
                room: None,
                pending_join: None,
                outbox,
            },
        );
    }

    pub fn remove(&mut self, conn: ConnectionId) -> Option<Session> {
        self.sessions.remove(&conn)
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&Session> {
        self.sessions.get(&conn)
    }

    pub fn get_mut(&mut self, conn: ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(&conn)
    }

    /// The room this connection is currently a member of.
    pub fn room_of(&self, conn: ConnectionId) -> Option<&str> {
        self.sessions.get(&conn).and_then(|s| s.room.as_deref())
    }

    pub fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn pending_joins(&self) -> usize {
        self.sessions.values().filter(|s| s.pending_join.is_some()).count()
    }

    /// Queue a message without waiting.
    pub fn deliver(&self, conn: ConnectionId, msg: SendMessage) -> Delivery {
        let Some(session) = self.sessions.get(&conn) else {
            return Delivery::Unknown;
        };
        match session.outbox.try_send(msg) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(msg)) if msg.is_droppable() => Delivery::Dropped,
            Err(TrySendError::Full(_)) => Delivery::Overflow,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Stable palette color for a user.
pub fn color_for(user_id: &str) -> &'static str {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    PARTICIPANT_COLORS[(hasher.finish() % PARTICIPANT_COLORS.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RemoteCursorChangeMessage, SendMessage};
    use serde_json::json;

    fn identity(id: &str) -> Identity {
        Identity {
            user_id: id.to_string(),
            user_name: id.to_uppercase(),
        }
    }

    fn cursor() -> SendMessage {
        SendMessage::CursorChange(RemoteCursorChangeMessage {
            user_id: "bob".to_string(),
            user_name: "Bob".to_string(),
            position: json!(1),
        })
    }

    #[test]
    fn connection_ids_are_unique_and_increasing() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b > a);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn colors_are_stable_per_user() {
        assert_eq!(color_for("alice"), color_for("alice"));
        assert!(PARTICIPANT_COLORS.contains(&color_for("bob")));

        let mut sessions = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let conn = ConnectionId::next();
        sessions.register(conn, identity("alice"), tx);
        assert_eq!(sessions.get(conn).unwrap().color, color_for("alice"));
    }

    #[test]
    fn full_queue_drops_cursor_but_overflows_otherwise() {
        let mut sessions = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = ConnectionId::next();
        sessions.register(conn, identity("alice"), tx);

        assert_eq!(sessions.deliver(conn, SendMessage::error("first")), Delivery::Sent);
        assert_eq!(sessions.deliver(conn, cursor()), Delivery::Dropped);
        assert_eq!(sessions.deliver(conn, SendMessage::error("second")), Delivery::Overflow);
    }

    #[test]
    fn closed_and_unknown_connections_are_reported() {
        let mut sessions = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(1);
        let conn = ConnectionId::next();
        sessions.register(conn, identity("alice"), tx);
        drop(rx);

        assert_eq!(sessions.deliver(conn, SendMessage::error("x")), Delivery::Closed);
        assert_eq!(sessions.deliver(ConnectionId::next(), SendMessage::error("x")), Delivery::Unknown);
    }

    #[test]
    fn tickets_increase_and_pending_joins_are_counted() {
        let mut sessions = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = ConnectionId::next();
        sessions.register(conn, identity("alice"), tx);

        let t1 = sessions.next_ticket();
        let t2 = sessions.next_ticket();
        assert!(t2 > t1);

        sessions.get_mut(conn).unwrap().pending_join = Some(PendingJoin {
            document_id: "doc1".to_string(),
            ticket: t2,
        });
        assert_eq!(sessions.pending_joins(), 1);
        assert_eq!(sessions.room_of(conn), None);
    }
}
