//! Entity store
//!
//! Owns accounts, rooms, the server-wide message index and the append-only
//! audit log. Each collection sits behind its own mutex so unrelated
//! entities never contend; locks are held only for the duration of one
//! accessor and never across an await point, and no accessor takes two
//! collection locks at once.
//!
//! Account and room lookups are linear scans returning `Option`; a miss is
//! data, not an error. Ids come from per-collection monotonic counters, so
//! concurrent registrations always receive distinct, increasing ids.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::account::Account;
use crate::room::Room;
use crate::types::{AccountId, ConnId, MessageId, RoomId};

/// One entry of the global message index: room, sender, text.
pub type IndexedMessage = (RoomId, AccountId, String);

/// Shared entity store
#[derive(Debug, Default)]
pub struct Store {
    accounts: Mutex<Vec<Account>>,
    rooms: Mutex<Vec<Room>>,
    messages: Mutex<BTreeMap<MessageId, IndexedMessage>>,
    log: Mutex<Vec<String>>,
    next_account: AtomicU64,
    next_room: AtomicU64,
    next_message: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self {
            next_account: AtomicU64::new(1),
            next_room: AtomicU64::new(1),
            next_message: AtomicU64::new(1),
            ..Default::default()
        }
    }

    // ----- accounts -----

    /// Create an account and return its assigned id.
    pub fn add_account(&self, name: &str, key: &str) -> AccountId {
        let id = AccountId(self.next_account.fetch_add(1, Ordering::Relaxed));
        let mut accounts = self.accounts.lock().unwrap();
        accounts.push(Account::new(id, name, key));
        id
    }

    pub fn account_exists(&self, id: AccountId) -> bool {
        let accounts = self.accounts.lock().unwrap();
        accounts.iter().any(|account| account.id == id)
    }

    pub fn account_name(&self, id: AccountId) -> Option<String> {
        let accounts = self.accounts.lock().unwrap();
        accounts
            .iter()
            .find(|account| account.id == id)
            .map(|account| account.name.clone())
    }

    /// Exact credential match against a stored account.
    pub fn verify(&self, id: AccountId, key: &str) -> bool {
        let accounts = self.accounts.lock().unwrap();
        accounts.iter().any(|account| account.verify(id, key))
    }

    /// Bind `conn` as the account's live connection, returning the
    /// previously attached connection if there was one.
    pub fn attach_conn(&self, id: AccountId, conn: ConnId) -> Option<ConnId> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.iter_mut().find(|account| account.id == id)?;
        account.conn.replace(conn)
    }

    /// Clear the account's connection back-reference.
    pub fn detach_conn(&self, id: AccountId) {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(account) = accounts.iter_mut().find(|account| account.id == id) {
            account.conn = None;
        }
    }

    /// The connection currently logged into the account, if any.
    pub fn conn_of(&self, id: AccountId) -> Option<ConnId> {
        let accounts = self.accounts.lock().unwrap();
        accounts
            .iter()
            .find(|account| account.id == id)
            .and_then(|account| account.conn)
    }

    /// Record a room in the account's cached joined-rooms view.
    pub fn cache_room(&self, id: AccountId, room: RoomId, name: &str) {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(account) = accounts.iter_mut().find(|account| account.id == id) {
            account.cache_room(room, name);
        }
    }

    /// Drop a room from the account's cached view.
    pub fn uncache_room(&self, id: AccountId, room: RoomId) {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(account) = accounts.iter_mut().find(|account| account.id == id) {
            account.uncache_room(room);
        }
    }

    /// Snapshot of the account's cached rooms.
    pub fn account_rooms(&self, id: AccountId) -> Vec<(RoomId, String)> {
        let accounts = self.accounts.lock().unwrap();
        accounts
            .iter()
            .find(|account| account.id == id)
            .map(|account| {
                account
                    .rooms
                    .iter()
                    .map(|(&room, name)| (room, name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ----- rooms -----

    /// Create a room hosted by `host` and return its assigned id.
    pub fn add_room(&self, name: &str, host: AccountId) -> RoomId {
        let id = RoomId(self.next_room.fetch_add(1, Ordering::Relaxed));
        let mut rooms = self.rooms.lock().unwrap();
        rooms.push(Room::new(id, name, host));
        id
    }

    pub fn room_name(&self, id: RoomId) -> Option<String> {
        let rooms = self.rooms.lock().unwrap();
        rooms
            .iter()
            .find(|room| room.id == id)
            .map(|room| room.name.clone())
    }

    pub fn room_host(&self, id: RoomId) -> Option<AccountId> {
        let rooms = self.rooms.lock().unwrap();
        rooms.iter().find(|room| room.id == id).map(|room| room.host)
    }

    pub fn room_members(&self, id: RoomId) -> Vec<AccountId> {
        let rooms = self.rooms.lock().unwrap();
        rooms
            .iter()
            .find(|room| room.id == id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, id: RoomId, account: AccountId) -> bool {
        let rooms = self.rooms.lock().unwrap();
        rooms
            .iter()
            .find(|room| room.id == id)
            .is_some_and(|room| room.is_member(account))
    }

    /// Add `account` to the room. False when already a member.
    pub fn add_member(&self, id: RoomId, account: AccountId) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        rooms
            .iter_mut()
            .find(|room| room.id == id)
            .is_some_and(|room| room.add_member(account))
    }

    /// Remove `account` from the room. False when not a member.
    pub fn remove_member(&self, id: RoomId, account: AccountId) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        rooms
            .iter_mut()
            .find(|room| room.id == id)
            .is_some_and(|room| room.remove_member(account))
    }

    /// Append to the room-scoped message list.
    pub fn push_room_message(&self, id: RoomId, sender: AccountId, text: &str) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        match rooms.iter_mut().find(|room| room.id == id) {
            Some(room) => {
                room.push_message(sender, text);
                true
            }
            None => false,
        }
    }

    pub fn room_messages(&self, id: RoomId) -> Vec<(AccountId, String)> {
        let rooms = self.rooms.lock().unwrap();
        rooms
            .iter()
            .find(|room| room.id == id)
            .map(|room| room.messages.clone())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    // ----- global message index -----

    /// Record a message in the server-wide index under a fresh id.
    pub fn index_message(&self, room: RoomId, sender: AccountId, text: &str) -> MessageId {
        let id = MessageId(self.next_message.fetch_add(1, Ordering::Relaxed));
        let mut messages = self.messages.lock().unwrap();
        messages.insert(id, (room, sender, text.to_string()));
        id
    }

    pub fn message(&self, id: MessageId) -> Option<IndexedMessage> {
        let messages = self.messages.lock().unwrap();
        messages.get(&id).cloned()
    }

    /// All indexed messages sent to the given room.
    pub fn messages_in_room(&self, room: RoomId) -> Vec<IndexedMessage> {
        let messages = self.messages.lock().unwrap();
        messages
            .values()
            .filter(|(message_room, _, _)| *message_room == room)
            .cloned()
            .collect()
    }

    /// All indexed messages sent by the given account.
    pub fn messages_from(&self, sender: AccountId) -> Vec<IndexedMessage> {
        let messages = self.messages.lock().unwrap();
        messages
            .values()
            .filter(|(_, message_sender, _)| *message_sender == sender)
            .cloned()
            .collect()
    }

    /// All indexed messages whose text contains the given substring.
    pub fn messages_containing(&self, needle: &str) -> Vec<IndexedMessage> {
        let messages = self.messages.lock().unwrap();
        messages
            .values()
            .filter(|(_, _, text)| text.contains(needle))
            .cloned()
            .collect()
    }

    // ----- audit log -----

    /// Append a line to the audit trail, stamped with a sequence number
    /// and wall-clock time.
    pub fn append_log(&self, entry: impl AsRef<str>) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut log = self.log.lock().unwrap();
        let seq = log.len() + 1;
        log.push(format!(
            "[LOG({})][{}.{:06}] {}",
            seq,
            now.as_secs(),
            now.subsec_micros(),
            entry.as_ref()
        ));
    }

    pub fn log_len(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn log_entry(&self, index: usize) -> Option<String> {
        let log = self.log.lock().unwrap();
        log.get(index).cloned()
    }

    /// Full copy of the audit trail, oldest first.
    pub fn log_snapshot(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_account_ids_unique_under_concurrent_registration() {
        let store = Arc::new(Store::new());
        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                (0..25)
                    .map(|i| store.add_account(&format!("user-{worker}-{i}"), "key"))
                    .collect::<Vec<_>>()
            }));
        }

        let mut ids: Vec<AccountId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100);
        assert_eq!(*ids.first().unwrap(), AccountId(1));
        assert_eq!(*ids.last().unwrap(), AccountId(100));
    }

    #[test]
    fn test_verify_requires_exact_pair() {
        let store = Store::new();
        let id = store.add_account("ariel", "secret");
        assert!(store.verify(id, "secret"));
        assert!(!store.verify(id, "wrong"));
        assert!(!store.verify(AccountId(id.0 + 1), "secret"));
    }

    #[test]
    fn test_attach_conn_reports_previous() {
        let store = Store::new();
        let id = store.add_account("ariel", "secret");
        assert_eq!(store.attach_conn(id, ConnId(3)), None);
        assert_eq!(store.attach_conn(id, ConnId(4)), Some(ConnId(3)));
        assert_eq!(store.conn_of(id), Some(ConnId(4)));

        store.detach_conn(id);
        assert_eq!(store.conn_of(id), None);
    }

    #[test]
    fn test_room_membership_via_store() {
        let store = Store::new();
        let host = store.add_account("host", "k");
        let guest = store.add_account("guest", "k");
        let room = store.add_room("general", host);

        assert_eq!(store.room_host(room), Some(host));
        assert!(store.is_member(room, host));

        assert!(store.add_member(room, guest));
        assert!(!store.add_member(room, guest));
        assert_eq!(store.room_members(room), vec![host, guest]);

        assert!(store.remove_member(room, guest));
        assert!(!store.remove_member(room, guest));
    }

    #[test]
    fn test_message_index_queries() {
        let store = Store::new();
        let a = store.add_account("a", "k");
        let b = store.add_account("b", "k");
        let general = store.add_room("general", a);
        let random = store.add_room("random", a);

        let first = store.index_message(general, a, "hello world");
        store.index_message(general, b, "hi there");
        store.index_message(random, a, "other room");

        assert_eq!(
            store.message(first),
            Some((general, a, "hello world".to_string()))
        );
        assert_eq!(store.messages_in_room(general).len(), 2);
        assert_eq!(store.messages_from(a).len(), 2);

        let hits = store.messages_containing("hello");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].2, "hello world");
    }

    #[test]
    fn test_message_ids_monotonic() {
        let store = Store::new();
        let a = store.add_account("a", "k");
        let room = store.add_room("general", a);
        let first = store.index_message(room, a, "one");
        let second = store.index_message(room, a, "two");
        assert!(second > first);
    }

    #[test]
    fn test_audit_log_sequencing() {
        let store = Store::new();
        store.append_log("first entry");
        store.append_log("second entry");

        assert_eq!(store.log_len(), 2);
        let first = store.log_entry(0).unwrap();
        assert!(first.starts_with("[LOG(1)]"));
        assert!(first.ends_with("first entry"));
        assert!(store.log_entry(1).unwrap().starts_with("[LOG(2)]"));
    }
}
