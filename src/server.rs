//! ChatServer Actor implementation
//!
//! The central actor that owns the connection registry and processes all
//! requests against the shared entity store. Connection handlers funnel
//! decoded requests through an mpsc channel, so every store mutation
//! happens on this single task: the single-writer invariant holds without
//! the processor taking any lock of its own.
//!
//! Every request resolves locally to exactly one direct reply (Terminate
//! closes the connection after its reply; NONE is dropped), plus zero or
//! more pushed responses to third-party connections. Each outcome is
//! appended to the store's audit log before the reply is sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::Connection;
use crate::handler::handle_connection;
use crate::message::{Request, Response};
use crate::store::Store;
use crate::types::{AccountId, ConnId, RoomId};

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Channel buffer size for per-connection responses
const RESPONSE_BUFFER_SIZE: usize = 32;

/// Commands sent from connection handlers to the ChatServer actor
#[derive(Debug)]
pub enum Command {
    /// New connection accepted; admitted as a guest
    Connect {
        conn: ConnId,
        addr: SocketAddr,
        sender: mpsc::Sender<Response>,
    },
    /// Connection's socket closed or errored
    Disconnect { conn: ConnId },
    /// One decoded request from a connection
    Request { conn: ConnId, request: Request },
}

/// The main ChatServer actor
pub struct ChatServer {
    /// Registry of live connections: ConnId -> Connection
    connections: HashMap<ConnId, Connection>,
    /// Shared entity store (accounts, rooms, messages, audit log)
    store: Arc<Store>,
    /// Command receiver channel
    receiver: mpsc::Receiver<Command>,
}

impl ChatServer {
    pub fn new(store: Arc<Store>, receiver: mpsc::Receiver<Command>) -> Self {
        Self {
            connections: HashMap::new(),
            store,
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are
    /// dropped. Commands from a single connection arrive in the order its
    /// frames were read; no ordering holds across connections.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("ChatServer shutting down");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { conn, addr, sender } => {
                info!("connection {} admitted from {} as guest", conn, addr);
                self.connections
                    .insert(conn, Connection::new(conn, addr, sender));
                debug!("total connections: {}", self.connections.len());
            }
            Command::Disconnect { conn } => {
                if self.connections.contains_key(&conn) {
                    self.store
                        .append_log(format!("connection {conn} disconnected"));
                    self.drop_connection(conn);
                }
            }
            Command::Request { conn, request } => {
                self.handle_request(conn, request).await;
            }
        }
    }

    /// Process a single request from `conn`.
    async fn handle_request(&mut self, conn: ConnId, request: Request) {
        let requester = self.connections.get(&conn).and_then(|c| c.account);
        let action = request.name();

        match request {
            Request::None => {
                warn!("connection {}: NONE request dropped", conn);
                self.store.append_log(format!(
                    "connection {conn} [{}] NONE: dropped (protocol violation)",
                    describe(requester)
                ));
            }
            Request::Terminate => {
                self.store.append_log(format!(
                    "connection {conn} [{}] TerminateConnection: ok",
                    describe(requester)
                ));
                self.reply(
                    conn,
                    Response::Success {
                        data: String::new(),
                    },
                )
                .await;
                self.drop_connection(conn);
            }
            Request::Register { name, key } => {
                let outcome = self.register(requester, &name, &key);
                self.finish(conn, action, requester, outcome).await;
            }
            Request::Login { account, key } => {
                let outcome = self.login(conn, requester, account, &key);
                self.finish(conn, action, requester, outcome).await;
            }
            Request::Logout { account, key } => {
                let outcome = self.logout(conn, requester, account, &key);
                self.finish(conn, action, requester, outcome).await;
            }
            Request::CreateRoom { account, key, name } => {
                let outcome = self.create_room(requester, account, &key, &name);
                self.finish(conn, action, requester, outcome).await;
            }
            Request::AddMember {
                account,
                key,
                room,
                member,
            } => {
                let outcome = self.add_member(requester, account, &key, room, member).await;
                self.finish(conn, action, requester, outcome).await;
            }
            Request::RemoveMember {
                account,
                key,
                room,
                member,
            } => {
                let outcome = self
                    .remove_member(requester, account, &key, room, member)
                    .await;
                self.finish(conn, action, requester, outcome).await;
            }
            Request::SendMessage {
                account,
                key,
                room,
                text,
            } => {
                let outcome = self
                    .send_message(requester, account, &key, room, &text)
                    .await;
                self.finish(conn, action, requester, outcome).await;
            }
        }
    }

    /// Append the audit entry, then write the direct reply.
    async fn finish(
        &self,
        conn: ConnId,
        action: &str,
        requester: Option<AccountId>,
        outcome: Result<String, String>,
    ) {
        let resolution = match &outcome {
            Ok(data) if data.is_empty() => "ok".to_string(),
            Ok(data) => format!("ok ({data})"),
            Err(reason) => format!("failed: {reason}"),
        };
        self.store.append_log(format!(
            "connection {conn} [{}] {action}: {resolution}",
            describe(requester)
        ));

        let response = match outcome {
            Ok(data) => Response::Success { data },
            Err(reason) => Response::Failure { reason },
        };
        self.reply(conn, response).await;
    }

    // ----- per-action handlers -----

    fn register(
        &mut self,
        requester: Option<AccountId>,
        name: &str,
        key: &str,
    ) -> Result<String, String> {
        if requester.is_some() {
            return Err("already authenticated".to_string());
        }
        let id = self.store.add_account(name, key);
        info!("account {} registered as '{}'", id, name);
        Ok(id.to_string())
    }

    fn login(
        &mut self,
        conn: ConnId,
        requester: Option<AccountId>,
        account: AccountId,
        key: &str,
    ) -> Result<String, String> {
        if requester.is_some() {
            return Err("already logged in".to_string());
        }
        if !self.store.verify(account, key) {
            return Err("credential mismatch".to_string());
        }

        // A second login to the same account steals it: the previous
        // connection reverts to guest.
        if let Some(previous) = self.store.attach_conn(account, conn) {
            if previous != conn {
                if let Some(stale) = self.connections.get_mut(&previous) {
                    stale.detach();
                }
                info!(
                    "account {} switched from connection {} to {}",
                    account, previous, conn
                );
            }
        }

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.attach(account);
        }
        info!("connection {} logged in as account {}", conn, account);
        Ok(String::new())
    }

    fn logout(
        &mut self,
        conn: ConnId,
        requester: Option<AccountId>,
        account: AccountId,
        key: &str,
    ) -> Result<String, String> {
        let id = self.authenticate(requester, account, key)?;
        self.store.detach_conn(id);
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.detach();
        }
        info!("connection {} logged out of account {}", conn, id);
        Ok(String::new())
    }

    fn create_room(
        &mut self,
        requester: Option<AccountId>,
        account: AccountId,
        key: &str,
        name: &str,
    ) -> Result<String, String> {
        let id = self.authenticate(requester, account, key)?;
        let room = self.store.add_room(name, id);
        self.store.cache_room(id, room, name);
        info!("account {} created room {} '{}'", id, room, name);
        Ok(room.to_string())
    }

    async fn add_member(
        &mut self,
        requester: Option<AccountId>,
        account: AccountId,
        key: &str,
        room: RoomId,
        member: AccountId,
    ) -> Result<String, String> {
        let id = self.authenticate(requester, account, key)?;
        let host = self
            .store
            .room_host(room)
            .ok_or_else(|| "room not found".to_string())?;
        if host != id {
            return Err("only the host may add members".to_string());
        }
        if !self.store.account_exists(member) {
            return Err("account not found".to_string());
        }
        if !self.store.add_member(room, member) {
            return Err("already a member".to_string());
        }

        let name = self.store.room_name(room).unwrap_or_default();
        self.store.cache_room(member, room, &name);
        self.push_to_account(member, Response::JoinRoom { room, name })
            .await;
        Ok(String::new())
    }

    async fn remove_member(
        &mut self,
        requester: Option<AccountId>,
        account: AccountId,
        key: &str,
        room: RoomId,
        member: AccountId,
    ) -> Result<String, String> {
        let id = self.authenticate(requester, account, key)?;
        let host = self
            .store
            .room_host(room)
            .ok_or_else(|| "room not found".to_string())?;
        if id != host && id != member {
            return Err("not authorized to remove this member".to_string());
        }
        if !self.store.account_exists(member) {
            return Err("account not found".to_string());
        }
        if member == host {
            return Err("the host cannot be removed from their own room".to_string());
        }
        if !self.store.remove_member(room, member) {
            return Err("not a member of this room".to_string());
        }

        let name = self.store.room_name(room).unwrap_or_default();
        self.store.uncache_room(member, room);
        self.push_to_account(member, Response::LeaveRoom { room, name })
            .await;
        Ok(String::new())
    }

    async fn send_message(
        &mut self,
        requester: Option<AccountId>,
        account: AccountId,
        key: &str,
        room: RoomId,
        text: &str,
    ) -> Result<String, String> {
        let id = self.authenticate(requester, account, key)?;
        if self.store.room_host(room).is_none() {
            return Err("room not found".to_string());
        }
        if !self.store.is_member(room, id) {
            return Err("not a member of this room".to_string());
        }

        self.store.push_room_message(room, id, text);
        let message = self.store.index_message(room, id, text);

        // Fan out to every other current member that is online.
        for member in self.store.room_members(room) {
            if member == id {
                continue;
            }
            self.push_to_account(
                member,
                Response::MessageIn {
                    room,
                    sender: id,
                    text: text.to_string(),
                },
            )
            .await;
        }

        debug!("message {} routed in room {}", message, room);
        Ok(message.to_string())
    }

    // ----- helpers -----

    /// Resolve the requester and check the supplied credentials against
    /// their own account. Guests fail first; a wrong id or wrong key never
    /// partially matches.
    fn authenticate(
        &self,
        requester: Option<AccountId>,
        account: AccountId,
        key: &str,
    ) -> Result<AccountId, String> {
        let id = requester.ok_or_else(|| "not logged in".to_string())?;
        if id != account || !self.store.verify(account, key) {
            return Err("credential mismatch".to_string());
        }
        Ok(id)
    }

    /// Write the direct reply to the originating connection.
    async fn reply(&self, conn: ConnId, response: Response) {
        let Some(connection) = self.connections.get(&conn) else {
            debug!("reply dropped: connection {} gone", conn);
            return;
        };
        if connection.send(response).await.is_err() {
            debug!("reply to connection {} dropped: write task gone", conn);
        }
    }

    /// Push an unsolicited response to an account's live connection, if
    /// the account is online.
    async fn push_to_account(&self, account: AccountId, response: Response) {
        let Some(conn) = self.store.conn_of(account) else {
            return;
        };
        let Some(connection) = self.connections.get(&conn) else {
            return;
        };
        if connection.send(response).await.is_err() {
            debug!("push to account {} dropped: connection {} gone", account, conn);
        }
    }

    /// Remove a connection from the registry, clearing the account
    /// back-reference first. Dropping the registry entry closes the
    /// connection's write channel, which ends its write task and closes
    /// the socket.
    fn drop_connection(&mut self, conn: ConnId) {
        if let Some(connection) = self.connections.remove(&conn) {
            if let Some(account) = connection.account {
                self.store.detach_conn(account);
            }
            info!("connection {} removed", conn);
            debug!("total connections: {}", self.connections.len());
        }
    }
}

fn describe(requester: Option<AccountId>) -> String {
    match requester {
        Some(id) => format!("account {id}"),
        None => "guest".to_string(),
    }
}

/// Accept loop: admit connections and hand each to its own handler task.
///
/// Runs until the process exits; accept failures are logged and scoped to
/// the one attempt.
pub async fn serve(listener: TcpListener) {
    serve_with_store(listener, Arc::new(Store::new())).await
}

/// [`serve`] with an externally owned store, so callers can inspect
/// entities and the audit trail while the server runs.
pub async fn serve_with_store(listener: TcpListener, store: Arc<Store>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    tokio::spawn(ChatServer::new(store, cmd_rx).run());

    let mut next_conn = 1u64;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let conn = ConnId(next_conn);
                next_conn += 1;
                info!("new connection {} from {}", conn, addr);
                let cmd_tx = cmd_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, conn, cmd_tx).await {
                        error!("connection handler error: {}", err);
                    }
                });
            }
            Err(err) => {
                error!("failed to accept connection: {}", err);
            }
        }
    }
}

/// Channel capacity for one connection's outbound responses.
pub(crate) fn response_channel() -> (mpsc::Sender<Response>, mpsc::Receiver<Response>) {
    mpsc::channel(RESPONSE_BUFFER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoomId;

    async fn spawn_actor() -> (Arc<Store>, mpsc::Sender<Command>) {
        let store = Arc::new(Store::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(ChatServer::new(store.clone(), cmd_rx).run());
        (store, cmd_tx)
    }

    async fn admit(cmd_tx: &mpsc::Sender<Command>, conn: ConnId) -> mpsc::Receiver<Response> {
        let (resp_tx, resp_rx) = mpsc::channel(32);
        cmd_tx
            .send(Command::Connect {
                conn,
                addr: "127.0.0.1:0".parse().unwrap(),
                sender: resp_tx,
            })
            .await
            .unwrap();
        resp_rx
    }

    async fn ask(
        cmd_tx: &mpsc::Sender<Command>,
        resp_rx: &mut mpsc::Receiver<Response>,
        conn: ConnId,
        request: Request,
    ) -> Response {
        cmd_tx
            .send(Command::Request { conn, request })
            .await
            .unwrap();
        resp_rx.recv().await.unwrap()
    }

    fn success_data(response: Response) -> String {
        match response {
            Response::Success { data } => data,
            other => panic!("expected success, got {other:?}"),
        }
    }

    /// Register an account and log conn into it; returns the new id.
    async fn register_and_login(
        cmd_tx: &mpsc::Sender<Command>,
        resp_rx: &mut mpsc::Receiver<Response>,
        conn: ConnId,
        name: &str,
        key: &str,
    ) -> AccountId {
        let data = success_data(
            ask(
                cmd_tx,
                resp_rx,
                conn,
                Request::Register {
                    name: name.into(),
                    key: key.into(),
                },
            )
            .await,
        );
        let id: AccountId = data.parse().unwrap();
        let login = ask(
            cmd_tx,
            resp_rx,
            conn,
            Request::Login {
                account: id,
                key: key.into(),
            },
        )
        .await;
        assert!(login.is_terminal());
        assert!(matches!(login, Response::Success { .. }));
        id
    }

    #[tokio::test]
    async fn test_register_login_round_trip() {
        let (_store, cmd_tx) = spawn_actor().await;
        let conn = ConnId(1);
        let mut rx = admit(&cmd_tx, conn).await;

        let data = success_data(
            ask(
                &cmd_tx,
                &mut rx,
                conn,
                Request::Register {
                    name: "ariel".into(),
                    key: "secret".into(),
                },
            )
            .await,
        );
        let id: AccountId = data.parse().unwrap();

        let ok = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::Login {
                account: id,
                key: "secret".into(),
            },
        )
        .await;
        assert!(matches!(ok, Response::Success { .. }));

        // Second login on the same connection is rejected.
        let again = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::Login {
                account: id,
                key: "secret".into(),
            },
        )
        .await;
        assert!(matches!(again, Response::Failure { .. }));
    }

    #[tokio::test]
    async fn test_login_requires_exact_credentials() {
        let (_store, cmd_tx) = spawn_actor().await;
        let conn = ConnId(1);
        let mut rx = admit(&cmd_tx, conn).await;

        let data = success_data(
            ask(
                &cmd_tx,
                &mut rx,
                conn,
                Request::Register {
                    name: "ariel".into(),
                    key: "secret".into(),
                },
            )
            .await,
        );
        let id: AccountId = data.parse().unwrap();

        let wrong_key = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::Login {
                account: id,
                key: "wrong".into(),
            },
        )
        .await;
        assert!(matches!(wrong_key, Response::Failure { .. }));

        let wrong_id = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::Login {
                account: AccountId(id.0 + 99),
                key: "secret".into(),
            },
        )
        .await;
        assert!(matches!(wrong_id, Response::Failure { .. }));

        // The failed attempts left the connection a guest, so a correct
        // login still works.
        let ok = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::Login {
                account: id,
                key: "secret".into(),
            },
        )
        .await;
        assert!(matches!(ok, Response::Success { .. }));
    }

    #[tokio::test]
    async fn test_guest_restrictions() {
        let (store, cmd_tx) = spawn_actor().await;
        let conn = ConnId(1);
        let mut rx = admit(&cmd_tx, conn).await;

        let create = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::CreateRoom {
                account: AccountId(1),
                key: "k".into(),
                name: "general".into(),
            },
        )
        .await;
        assert!(matches!(create, Response::Failure { .. }));

        let send = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::SendMessage {
                account: AccountId(1),
                key: "k".into(),
                room: RoomId(1),
                text: "hi".into(),
            },
        )
        .await;
        assert!(matches!(send, Response::Failure { .. }));

        let logout = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::Logout {
                account: AccountId(1),
                key: "k".into(),
            },
        )
        .await;
        assert!(matches!(logout, Response::Failure { .. }));

        // No state was mutated.
        assert_eq!(store.room_count(), 0);
        assert_eq!(store.messages_containing("hi").len(), 0);
    }

    #[tokio::test]
    async fn test_room_lifecycle_with_pushes() {
        let (store, cmd_tx) = spawn_actor().await;
        let (conn_a, conn_b) = (ConnId(1), ConnId(2));
        let mut rx_a = admit(&cmd_tx, conn_a).await;
        let mut rx_b = admit(&cmd_tx, conn_b).await;

        let a = register_and_login(&cmd_tx, &mut rx_a, conn_a, "ariel", "ka").await;
        let b = register_and_login(&cmd_tx, &mut rx_b, conn_b, "birch", "kb").await;

        let room: RoomId = success_data(
            ask(
                &cmd_tx,
                &mut rx_a,
                conn_a,
                Request::CreateRoom {
                    account: a,
                    key: "ka".into(),
                    name: "general".into(),
                },
            )
            .await,
        )
        .parse()
        .unwrap();

        let added = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::AddMember {
                account: a,
                key: "ka".into(),
                room,
                member: b,
            },
        )
        .await;
        assert!(matches!(added, Response::Success { .. }));
        assert_eq!(
            rx_b.recv().await.unwrap(),
            Response::JoinRoom {
                room,
                name: "general".into()
            }
        );

        let sent = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::SendMessage {
                account: a,
                key: "ka".into(),
                room,
                text: "hi".into(),
            },
        )
        .await;
        assert!(matches!(sent, Response::Success { .. }));
        assert_eq!(
            rx_b.recv().await.unwrap(),
            Response::MessageIn {
                room,
                sender: a,
                text: "hi".into()
            }
        );

        let removed = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::RemoveMember {
                account: a,
                key: "ka".into(),
                room,
                member: b,
            },
        )
        .await;
        assert!(matches!(removed, Response::Success { .. }));
        assert_eq!(
            rx_b.recv().await.unwrap(),
            Response::LeaveRoom {
                room,
                name: "general".into()
            }
        );

        // The room and index kept the message; membership is back to the
        // host alone.
        assert_eq!(store.room_members(room), vec![a]);
        assert_eq!(store.messages_in_room(room).len(), 1);
        assert_eq!(store.room_messages(room), vec![(a, "hi".to_string())]);
    }

    #[tokio::test]
    async fn test_message_not_echoed_to_sender() {
        let (_store, cmd_tx) = spawn_actor().await;
        let (conn_a, conn_b, conn_c) = (ConnId(1), ConnId(2), ConnId(3));
        let mut rx_a = admit(&cmd_tx, conn_a).await;
        let mut rx_b = admit(&cmd_tx, conn_b).await;
        let mut rx_c = admit(&cmd_tx, conn_c).await;

        let a = register_and_login(&cmd_tx, &mut rx_a, conn_a, "a", "k").await;
        let b = register_and_login(&cmd_tx, &mut rx_b, conn_b, "b", "k").await;
        let c = register_and_login(&cmd_tx, &mut rx_c, conn_c, "c", "k").await;

        let room: RoomId = success_data(
            ask(
                &cmd_tx,
                &mut rx_a,
                conn_a,
                Request::CreateRoom {
                    account: a,
                    key: "k".into(),
                    name: "general".into(),
                },
            )
            .await,
        )
        .parse()
        .unwrap();
        for member in [b, c] {
            ask(
                &cmd_tx,
                &mut rx_a,
                conn_a,
                Request::AddMember {
                    account: a,
                    key: "k".into(),
                    room,
                    member,
                },
            )
            .await;
        }
        rx_b.recv().await.unwrap();
        rx_c.recv().await.unwrap();

        let reply = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::SendMessage {
                account: a,
                key: "k".into(),
                room,
                text: "hello".into(),
            },
        )
        .await;
        assert!(matches!(reply, Response::Success { .. }));

        assert!(matches!(
            rx_b.recv().await.unwrap(),
            Response::MessageIn { .. }
        ));
        assert!(matches!(
            rx_c.recv().await.unwrap(),
            Response::MessageIn { .. }
        ));
        // Pushes precede the direct reply, so by now the sender's queue
        // would already hold an echo if one had been sent.
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_membership_rules() {
        let (_store, cmd_tx) = spawn_actor().await;
        let (conn_a, conn_b) = (ConnId(1), ConnId(2));
        let mut rx_a = admit(&cmd_tx, conn_a).await;
        let mut rx_b = admit(&cmd_tx, conn_b).await;

        let a = register_and_login(&cmd_tx, &mut rx_a, conn_a, "a", "k").await;
        let b = register_and_login(&cmd_tx, &mut rx_b, conn_b, "b", "k").await;

        let room: RoomId = success_data(
            ask(
                &cmd_tx,
                &mut rx_a,
                conn_a,
                Request::CreateRoom {
                    account: a,
                    key: "k".into(),
                    name: "general".into(),
                },
            )
            .await,
        )
        .parse()
        .unwrap();

        // Unknown room.
        let bad_room = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::AddMember {
                account: a,
                key: "k".into(),
                room: RoomId(999),
                member: b,
            },
        )
        .await;
        assert!(matches!(bad_room, Response::Failure { .. }));

        // Only the host may add members.
        let not_host = ask(
            &cmd_tx,
            &mut rx_b,
            conn_b,
            Request::AddMember {
                account: b,
                key: "k".into(),
                room,
                member: b,
            },
        )
        .await;
        assert!(matches!(not_host, Response::Failure { .. }));

        // Removing a non-member is rejected without mutation.
        let not_member = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::RemoveMember {
                account: a,
                key: "k".into(),
                room,
                member: b,
            },
        )
        .await;
        assert!(matches!(not_member, Response::Failure { .. }));

        // Adding twice is rejected.
        ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::AddMember {
                account: a,
                key: "k".into(),
                room,
                member: b,
            },
        )
        .await;
        rx_b.recv().await.unwrap();
        let duplicate = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::AddMember {
                account: a,
                key: "k".into(),
                room,
                member: b,
            },
        )
        .await;
        assert!(matches!(duplicate, Response::Failure { .. }));

        // A member may remove itself; the host may not be removed.
        cmd_tx
            .send(Command::Request {
                conn: conn_b,
                request: Request::RemoveMember {
                    account: b,
                    key: "k".into(),
                    room,
                    member: b,
                },
            })
            .await
            .unwrap();
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            Response::LeaveRoom { .. }
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            Response::Success { .. }
        ));

        let remove_host = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::RemoveMember {
                account: a,
                key: "k".into(),
                room,
                member: a,
            },
        )
        .await;
        assert!(matches!(remove_host, Response::Failure { .. }));
    }

    #[tokio::test]
    async fn test_second_login_steals_account() {
        let (_store, cmd_tx) = spawn_actor().await;
        let (conn_a, conn_b) = (ConnId(1), ConnId(2));
        let mut rx_a = admit(&cmd_tx, conn_a).await;
        let mut rx_b = admit(&cmd_tx, conn_b).await;

        let id = register_and_login(&cmd_tx, &mut rx_a, conn_a, "ariel", "secret").await;

        let stolen = ask(
            &cmd_tx,
            &mut rx_b,
            conn_b,
            Request::Login {
                account: id,
                key: "secret".into(),
            },
        )
        .await;
        assert!(matches!(stolen, Response::Success { .. }));

        // The first connection reverted to guest.
        let create = ask(
            &cmd_tx,
            &mut rx_a,
            conn_a,
            Request::CreateRoom {
                account: id,
                key: "secret".into(),
                name: "general".into(),
            },
        )
        .await;
        assert!(matches!(create, Response::Failure { .. }));
    }

    #[tokio::test]
    async fn test_terminate_closes_connection() {
        let (_store, cmd_tx) = spawn_actor().await;
        let conn = ConnId(1);
        let mut rx = admit(&cmd_tx, conn).await;

        let reply = ask(&cmd_tx, &mut rx, conn, Request::Terminate).await;
        assert!(matches!(reply, Response::Success { .. }));

        // Registry entry dropped: the response channel closes.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_none_request_dropped_with_audit() {
        let (store, cmd_tx) = spawn_actor().await;
        let conn = ConnId(1);
        let mut rx = admit(&cmd_tx, conn).await;

        cmd_tx
            .send(Command::Request {
                conn,
                request: Request::None,
            })
            .await
            .unwrap();

        // The very next reply belongs to the next request: NONE produced
        // no response.
        let reply = ask(
            &cmd_tx,
            &mut rx,
            conn,
            Request::Register {
                name: "ariel".into(),
                key: "secret".into(),
            },
        )
        .await;
        assert!(matches!(reply, Response::Success { .. }));

        let log = store.log_snapshot();
        assert!(log.iter().any(|entry| entry.contains("NONE")));
        assert!(log.iter().any(|entry| entry.contains("RegisterAccount")));
    }
}
