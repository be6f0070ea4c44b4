//! Synchronization relay.
//!
//! One `Relay` owns every session and room. Commands from the gateway are
//! applied one at a time and each is handled to completion before the next,
//! so room state needs no locking. The only suspending work is talking to
//! the document store, and that always happens on spawned tasks:
//!
//! * join: the fetch-or-create result comes back through the relay's own
//!   command channel as `JoinLoaded`, tagged with a ticket so a result for
//!   a join that was since superseded or abandoned is discarded.
//! * edits: content and title writes are fire-and-forget. Their outcome is
//!   only logged and overlapping writes for one document are not ordered.
//!
//! The command queue is bounded. Readers wait for room, so a client that
//! floods frames is slowed down to the pace of the relay.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::rooms::{Participant, RoomRegistry};
use super::sessions::{ConnectionId, Delivery, Identity, PendingJoin, SessionRegistry};
use crate::db::{DocumentStore, StoreError};
use crate::models::{
    CursorChangeMessage, Document, DocumentDataMessage, JoinDocumentMessage, LeaveDocumentMessage,
    ParticipantMessage, ReceivedMessage, RemoteCursorChangeMessage, RemoteTextChangeMessage,
    RemoteTitleChangeMessage, SendMessage, TextChangeMessage, TitleChangeMessage, UsersUpdateMessage,
};

pub const JOIN_FAILED: &str = "Failed to join document";

/// Commands buffered between connections and the relay loop.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum RelayCommand {
    Connect {
        conn: ConnectionId,
        identity: Identity,
        outbox: mpsc::Sender<SendMessage>,
    },
    Message {
        conn: ConnectionId,
        message: ReceivedMessage,
    },
    Disconnect {
        conn: ConnectionId,
    },
    JoinLoaded {
        conn: ConnectionId,
        ticket: u64,
        document_id: String,
        result: Result<Document, StoreError>,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay is not running")]
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub connections: usize,
    pub rooms: usize,
    pub participants: usize,
    pub pending_joins: usize,
    pub store: &'static str,
}

/// Cloneable sender side of the relay's command loop.
#[derive(Clone, Debug)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    async fn send(&self, cmd: RelayCommand) -> Result<(), RelayError> {
        self.tx.send(cmd).await.map_err(|_| RelayError::Stopped)
    }

    pub async fn connect(
        &self,
        conn: ConnectionId,
        identity: Identity,
        outbox: mpsc::Sender<SendMessage>,
    ) -> Result<(), RelayError> {
        self.send(RelayCommand::Connect { conn, identity, outbox }).await
    }

    /// Waits while the command queue is full.
    pub async fn message(&self, conn: ConnectionId, message: ReceivedMessage) -> Result<(), RelayError> {
        self.send(RelayCommand::Message { conn, message }).await
    }

    /// Usable from drop guards: never waits. With a full queue the command
    /// is handed to a task that waits on its behalf. Must be called inside
    /// a tokio runtime.
    pub fn disconnect(&self, conn: ConnectionId) -> Result<(), RelayError> {
        match self.tx.try_send(RelayCommand::Disconnect { conn }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(cmd).await.is_err() {
                        debug!("Relay stopped before disconnect of {} was queued", conn);
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::Stopped),
        }
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply }).await?;
        rx.await.map_err(|_| RelayError::Stopped)
    }
}

enum Edit {
    Content(String),
    Title(String),
}

impl Edit {
    fn kind(&self) -> &'static str {
        match self {
            Edit::Content(_) => "content",
            Edit::Title(_) => "title",
        }
    }
}

pub struct Relay {
    sessions: SessionRegistry,
    rooms: RoomRegistry,
    store: Arc<dyn DocumentStore>,
    commands: mpsc::Receiver<RelayCommand>,
    loopback: mpsc::WeakSender<RelayCommand>,
    evicted: Vec<ConnectionId>,
}

impl Relay {
    pub fn new(store: Arc<dyn DocumentStore>) -> (Self, RelayHandle) {
        Self::with_capacity(store, COMMAND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn DocumentStore>, capacity: usize) -> (Self, RelayHandle) {
        let (tx, commands) = mpsc::channel(capacity.max(1));
        let relay = Relay {
            sessions: SessionRegistry::new(),
            rooms: RoomRegistry::new(),
            store,
            commands,
            loopback: tx.downgrade(),
            evicted: Vec::new(),
        };
        (relay, RelayHandle { tx })
    }

    /// Process commands until every `RelayHandle` has been dropped.
    pub async fn run(mut self) {
        info!("Relay started ({} store)", self.store.backend());
        while self.step().await {}
        info!("Relay stopped");
    }

    /// Wait for one command and apply it. Returns false when the channel is closed.
    pub async fn step(&mut self) -> bool {
        match self.commands.recv().await {
            Some(cmd) => {
                self.apply(cmd);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Connect { conn, identity, outbox } => self.connect(conn, identity, outbox),
            RelayCommand::Message { conn, message } => self.handle_message(conn, message),
            RelayCommand::Disconnect { conn } => self.disconnect(conn),
            RelayCommand::JoinLoaded {
                conn,
                ticket,
                document_id,
                result,
            } => self.complete_join(conn, ticket, document_id, result),
            RelayCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
        self.flush_evictions();
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.sessions.len(),
            rooms: self.rooms.len(),
            participants: self.rooms.participant_count(),
            pending_joins: self.sessions.pending_joins(),
            store: self.store.backend(),
        }
    }

    fn connect(&mut self, conn: ConnectionId, identity: Identity, outbox: mpsc::Sender<SendMessage>) {
        info!("Connection {} opened for user {} ({})", conn, identity.user_id, identity.user_name);
        self.sessions.register(conn, identity, outbox);
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        self.leave(conn);
        if self.sessions.remove(conn).is_some() {
            info!("Connection {} closed", conn);
        }
    }

    fn handle_message(&mut self, conn: ConnectionId, message: ReceivedMessage) {
        if self.sessions.get(conn).is_none() {
            debug!("Ignoring message for {} from unknown connection {}", message.document_id(), conn);
            return;
        }
        match message {
            ReceivedMessage::JoinDocument(msg) => self.begin_join(conn, msg),
            ReceivedMessage::LeaveDocument(msg) => self.leave_document(conn, msg),
            ReceivedMessage::TextChange(msg) => self.text_change(conn, msg),
            ReceivedMessage::CursorChange(msg) => self.cursor_change(conn, msg),
            ReceivedMessage::TitleChange(msg) => self.title_change(conn, msg),
        }
    }

    fn begin_join(&mut self, conn: ConnectionId, msg: JoinDocumentMessage) {
        // A connection is in at most one room: leave the current one first.
        if self.sessions.room_of(conn).is_some() {
            self.leave(conn);
        }

        let ticket = self.sessions.next_ticket();
        let Some(session) = self.sessions.get_mut(conn) else {
            return;
        };
        if session.identity.user_id != msg.user_id || session.identity.user_name != msg.user_name {
            warn!(
                "Connection {} asked to join {} as {} ({}) but connected as {} ({}); keeping connection identity",
                conn, msg.document_id, msg.user_id, msg.user_name, session.identity.user_id, session.identity.user_name
            );
        }
        session.pending_join = Some(PendingJoin {
            document_id: msg.document_id.clone(),
            ticket,
        });
        info!("Connection {} joining document {}", conn, msg.document_id);

        let store = self.store.clone();
        let loopback = self.loopback.clone();
        let document_id = msg.document_id;
        tokio::spawn(async move {
            let result = store.fetch_or_create(&document_id).await;
            if let Some(tx) = loopback.upgrade() {
                let _ = tx
                    .send(RelayCommand::JoinLoaded {
                        conn,
                        ticket,
                        document_id,
                        result,
                    })
                    .await;
            }
        });
    }

    fn complete_join(
        &mut self,
        conn: ConnectionId,
        ticket: u64,
        document_id: String,
        result: Result<Document, StoreError>,
    ) {
        let Some(session) = self.sessions.get_mut(conn) else {
            debug!("Discarding join of {} for closed connection {}", document_id, conn);
            return;
        };
        if session.pending_join.as_ref().map(|p| p.ticket) != Some(ticket) {
            debug!("Discarding superseded join of {} for connection {}", document_id, conn);
            return;
        }
        session.pending_join = None;

        let doc = match result {
            Ok(doc) => doc,
            Err(e) => {
                error!("Failed to load document {} for connection {}: {}", document_id, conn, e);
                self.send_to(conn, SendMessage::error(JOIN_FAILED));
                return;
            }
        };

        session.room = Some(document_id.clone());
        let participant = Participant {
            user_id: session.identity.user_id.clone(),
            user_name: session.identity.user_name.clone(),
            color: session.color.clone(),
            cursor_position: json!(0),
        };
        let joined = ParticipantMessage {
            user_id: participant.user_id.clone(),
            user_name: participant.user_name.clone(),
        };
        if self.rooms.insert(&document_id, conn, participant) {
            info!("Room {} opened", document_id);
        }
        info!("{} ({}) joined document {}", joined.user_name, conn, document_id);

        self.send_to(
            conn,
            SendMessage::DocumentData(DocumentDataMessage {
                content: doc.content,
                title: doc.title,
                last_modified: doc.last_modified,
            }),
        );
        self.broadcast(&document_id, Some(conn), SendMessage::ParticipantJoined(joined));
        self.broadcast_users(&document_id);
    }

    /// Remove the connection from its room, if any. Also drops a pending join.
    fn leave(&mut self, conn: ConnectionId) -> bool {
        let Some(session) = self.sessions.get_mut(conn) else {
            return false;
        };
        session.pending_join = None;
        let Some(document_id) = session.room.take() else {
            return false;
        };
        let Some(departure) = self.rooms.remove(&document_id, conn) else {
            return false;
        };

        let Participant { user_id, user_name, .. } = departure.participant;
        info!("{} ({}) left document {}", user_name, conn, document_id);
        if departure.room_closed {
            info!("Room {} closed", document_id);
            return true;
        }

        self.broadcast(
            &document_id,
            Some(conn),
            SendMessage::ParticipantLeft(ParticipantMessage { user_id, user_name }),
        );
        self.broadcast_users(&document_id);
        true
    }

    fn leave_document(&mut self, conn: ConnectionId, msg: LeaveDocumentMessage) {
        let Some(session) = self.sessions.get_mut(conn) else {
            return;
        };
        if session.room.as_deref() == Some(msg.document_id.as_str()) {
            self.leave(conn);
        } else if session
            .pending_join
            .as_ref()
            .is_some_and(|p| p.document_id == msg.document_id)
        {
            session.pending_join = None;
            debug!("Connection {} cancelled join of {}", conn, msg.document_id);
        } else {
            debug!("Ignoring leave of {} from connection {} outside the room", msg.document_id, conn);
        }
    }

    /// Identity of `conn` if it is currently a member of `document_id`.
    fn member_identity(&self, conn: ConnectionId, document_id: &str) -> Option<Identity> {
        let session = self.sessions.get(conn)?;
        (session.room.as_deref() == Some(document_id)).then(|| session.identity.clone())
    }

    fn text_change(&mut self, conn: ConnectionId, msg: TextChangeMessage) {
        let Some(sender) = self.member_identity(conn, &msg.document_id) else {
            debug!("Ignoring text-change for {} from connection {} outside the room", msg.document_id, conn);
            return;
        };
        self.broadcast(
            &msg.document_id,
            Some(conn),
            SendMessage::TextChange(RemoteTextChangeMessage {
                delta: msg.delta,
                content: msg.content.clone(),
                sender_id: sender.user_id,
                user_name: sender.user_name,
            }),
        );
        self.persist(msg.document_id, Edit::Content(msg.content));
    }

    fn title_change(&mut self, conn: ConnectionId, msg: TitleChangeMessage) {
        let Some(sender) = self.member_identity(conn, &msg.document_id) else {
            debug!("Ignoring title-change for {} from connection {} outside the room", msg.document_id, conn);
            return;
        };
        self.broadcast(
            &msg.document_id,
            Some(conn),
            SendMessage::TitleChange(RemoteTitleChangeMessage {
                title: msg.title.clone(),
                sender_id: sender.user_id,
            }),
        );
        self.persist(msg.document_id, Edit::Title(msg.title));
    }

    fn cursor_change(&mut self, conn: ConnectionId, msg: CursorChangeMessage) {
        let Some(sender) = self.member_identity(conn, &msg.document_id) else {
            debug!("Ignoring cursor-change for {} from connection {} outside the room", msg.document_id, conn);
            return;
        };
        if let Some(participant) = self.rooms.participant_mut(&msg.document_id, conn) {
            participant.cursor_position = msg.position.clone();
        }
        self.broadcast(
            &msg.document_id,
            Some(conn),
            SendMessage::CursorChange(RemoteCursorChangeMessage {
                user_id: sender.user_id,
                user_name: sender.user_name,
                position: msg.position,
            }),
        );
    }

    /// Fire-and-forget store write. The completion is only logged.
    fn persist(&self, document_id: String, edit: Edit) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let result = match &edit {
                Edit::Content(content) => store.update_content(&document_id, content).await,
                Edit::Title(title) => store.update_title(&document_id, title).await,
            };
            match result {
                Ok(last_modified) => debug!(
                    "Persisted {} of document {} (lastModified {})",
                    edit.kind(),
                    document_id,
                    last_modified
                ),
                Err(e) => error!("Failed to persist {} of document {}: {}", edit.kind(), document_id, e),
            }
        });
    }

    fn broadcast_users(&mut self, document_id: &str) {
        let users = self.rooms.participants(document_id);
        self.broadcast(document_id, None, SendMessage::UsersUpdate(UsersUpdateMessage { users }));
    }

    fn broadcast(&mut self, document_id: &str, exclude: Option<ConnectionId>, msg: SendMessage) {
        for member in self.rooms.members(document_id) {
            if Some(member) != exclude {
                self.send_to(member, msg.clone());
            }
        }
    }

    fn send_to(&mut self, conn: ConnectionId, msg: SendMessage) {
        match self.sessions.deliver(conn, msg) {
            Delivery::Sent => {}
            Delivery::Dropped => debug!("Dropped cursor update for slow connection {}", conn),
            Delivery::Overflow | Delivery::Closed => {
                if !self.evicted.contains(&conn) {
                    warn!("Connection {} cannot keep up, evicting", conn);
                    self.evicted.push(conn);
                }
            }
            Delivery::Unknown => debug!("No session for connection {}", conn),
        }
    }

    fn flush_evictions(&mut self) {
        while let Some(conn) = self.evicted.pop() {
            self.disconnect(conn);
        }
    }
}
