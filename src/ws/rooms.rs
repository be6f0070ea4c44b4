use serde_json::Value;
use std::collections::HashMap;

use super::sessions::ConnectionId;
use crate::models::ParticipantInfo;

/// A connection's presence record within a room.
#[derive(Clone, Debug, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    pub cursor_position: Value,
}

impl Participant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            color: self.color.clone(),
            cursor_position: self.cursor_position.clone(),
        }
    }
}

/// Participants of one document, listed in the order they joined.
#[derive(Debug, Default)]
pub struct Room {
    order: Vec<ConnectionId>,
    participants: HashMap<ConnectionId, Participant>,
}

impl Room {
    fn insert(&mut self, conn: ConnectionId, participant: Participant) {
        if self.participants.insert(conn, participant).is_none() {
            self.order.push(conn);
        }
    }

    fn remove(&mut self, conn: ConnectionId) -> Option<Participant> {
        let participant = self.participants.remove(&conn)?;
        self.order.retain(|c| *c != conn);
        Some(participant)
    }

    fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Participant)> + '_ {
        self.order
            .iter()
            .filter_map(|conn| self.participants.get(conn).map(|p| (*conn, p)))
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Result of removing a participant from its room.
#[derive(Debug, PartialEq)]
pub struct Departure {
    pub participant: Participant,
    /// The room had no participants left and was dropped.
    pub room_closed: bool,
}

/// Document id to room mapping. Rooms exist only while occupied.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, creating the room on first join. Returns true
    /// when the room was created by this call.
    pub fn insert(&mut self, document_id: &str, conn: ConnectionId, participant: Participant) -> bool {
        let created = !self.rooms.contains_key(document_id);
        self.rooms
            .entry(document_id.to_string())
            .or_default()
            .insert(conn, participant);
        created
    }

    pub fn remove(&mut self, document_id: &str, conn: ConnectionId) -> Option<Departure> {
        let room = self.rooms.get_mut(document_id)?;
        let participant = room.remove(conn)?;
        let room_closed = room.is_empty();
        if room_closed {
            self.rooms.remove(document_id);
        }
        Some(Departure {
            participant,
            room_closed,
        })
    }

    pub fn participant_mut(&mut self, document_id: &str, conn: ConnectionId) -> Option<&mut Participant> {
        self.rooms
            .get_mut(document_id)
            .and_then(|room| room.participants.get_mut(&conn))
    }

    /// Connections in the room, in join order.
    pub fn members(&self, document_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(document_id)
            .map(|room| room.iter().map(|(conn, _)| conn).collect())
            .unwrap_or_default()
    }

    /// Full presence list for `users-update`.
    pub fn participants(&self, document_id: &str) -> Vec<ParticipantInfo> {
        self.rooms
            .get(document_id)
            .map(|room| room.iter().map(|(_, p)| p.info()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.rooms.values().map(Room::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn participant(name: &str) -> Participant {
        Participant {
            user_id: name.to_lowercase(),
            user_name: name.to_string(),
            color: "#000000".to_string(),
            cursor_position: json!(0),
        }
    }

    #[test]
    fn rooms_are_created_lazily_and_dropped_when_empty() {
        let mut rooms = RoomRegistry::new();
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        assert!(rooms.insert("doc1", a, participant("Alice")));
        assert!(!rooms.insert("doc1", b, participant("Bob")));
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms.participant_count(), 2);

        let first = rooms.remove("doc1", a).unwrap();
        assert_eq!(first.participant.user_name, "Alice");
        assert!(!first.room_closed);
        assert_eq!(rooms.members("doc1"), vec![b]);

        let last = rooms.remove("doc1", b).unwrap();
        assert!(last.room_closed);
        assert!(rooms.members("doc1").is_empty());
        assert!(rooms.is_empty());
    }

    #[test]
    fn removing_unknown_members_is_a_no_op() {
        let mut rooms = RoomRegistry::new();
        let a = ConnectionId::next();
        assert_eq!(rooms.remove("doc1", a), None);

        rooms.insert("doc1", a, participant("Alice"));
        assert_eq!(rooms.remove("doc1", ConnectionId::next()), None);
        assert_eq!(rooms.remove("doc2", a), None);
        assert_eq!(rooms.participant_count(), 1);
    }

    #[test]
    fn participants_are_listed_in_join_order() {
        let mut rooms = RoomRegistry::new();
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        let c = ConnectionId::next();
        rooms.insert("doc1", b, participant("Bob"));
        rooms.insert("doc1", a, participant("Alice"));
        rooms.insert("doc1", c, participant("Carol"));

        // Rejoining moves a connection to the back.
        rooms.remove("doc1", b);
        rooms.insert("doc1", b, participant("Bob"));

        let names: Vec<String> = rooms.participants("doc1").into_iter().map(|p| p.user_name).collect();
        assert_eq!(names, vec!["Alice", "Carol", "Bob"]);
        assert_eq!(rooms.members("doc1"), vec![a, c, b]);
        assert!(rooms.members("other").is_empty());
    }

    #[test]
    fn cursor_updates_are_visible_in_presence() {
        let mut rooms = RoomRegistry::new();
        let a = ConnectionId::next();
        rooms.insert("doc1", a, participant("Alice"));
        rooms.participant_mut("doc1", a).unwrap().cursor_position = json!({"index": 7});

        assert_eq!(rooms.participants("doc1")[0].cursor_position, json!({"index": 7}));
    }
}
