//! Account entity
//!
//! A registered user of the service. Accounts outlive connections: they
//! stay in the store while their owner is offline, and hold at most a
//! non-owning back-reference (`ConnId`) to the connection currently
//! attached by a login.

use std::collections::HashMap;

use crate::types::{AccountId, ConnId, RoomId};

/// A registered account
#[derive(Debug, Clone)]
pub struct Account {
    /// Unique, immutable identifier assigned at registration
    pub id: AccountId,
    /// Display name (not required to be unique)
    pub name: String,
    /// Shared-secret credential, compared verbatim
    pub key: String,
    /// Cached view of joined rooms: room id → room display name
    pub rooms: HashMap<RoomId, String>,
    /// Connection currently logged into this account, if any
    pub conn: Option<ConnId>,
}

impl Account {
    pub fn new(id: AccountId, name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            key: key.into(),
            rooms: HashMap::new(),
            conn: None,
        }
    }

    /// Credential check: the supplied pair must match exactly, never
    /// partially.
    pub fn verify(&self, id: AccountId, key: &str) -> bool {
        self.id == id && self.key == key
    }

    /// Record membership of a room in the cached view.
    pub fn cache_room(&mut self, room: RoomId, name: impl Into<String>) {
        self.rooms.insert(room, name.into());
    }

    /// Drop a room from the cached view.
    pub fn uncache_room(&mut self, room: RoomId) {
        self.rooms.remove(&room);
    }

    /// Display name of a cached room.
    pub fn room_name(&self, room: RoomId) -> Option<&str> {
        self.rooms.get(&room).map(String::as_str)
    }

    /// All cached rooms carrying the given display name.
    pub fn rooms_named(&self, name: &str) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|(_, room_name)| room_name.as_str() == name)
            .map(|(&id, _)| id)
            .collect()
    }
}
