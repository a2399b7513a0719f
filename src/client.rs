//! Server-side connection state
//!
//! Represents one accepted transport session: its logical id, peer
//! address, guest/authenticated status and the channel feeding its write
//! task. The account reference is a non-owning id kept consistent by the
//! login/logout/terminate transitions.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::Response;
use crate::types::{AccountId, ConnId};

/// One connected peer
#[derive(Debug)]
pub struct Connection {
    /// Logical connection id
    pub id: ConnId,
    /// Peer address as reported at accept time
    pub addr: SocketAddr,
    /// True until a successful login attaches an account
    pub guest: bool,
    /// Owning account, if logged in
    pub account: Option<AccountId>,
    /// Outbound channel drained by this connection's write task
    sender: mpsc::Sender<Response>,
}

impl Connection {
    /// New connections are admitted as guests.
    pub fn new(id: ConnId, addr: SocketAddr, sender: mpsc::Sender<Response>) -> Self {
        Self {
            id,
            addr,
            guest: true,
            account: None,
            sender,
        }
    }

    /// Queue a response for this connection's socket.
    ///
    /// Returns an error if the write task is gone (peer disconnected).
    pub async fn send(&self, response: Response) -> Result<(), SendError> {
        self.sender
            .send(response)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Bind the connection to an account after a successful login.
    pub fn attach(&mut self, account: AccountId) {
        self.account = Some(account);
        self.guest = false;
    }

    /// Revert to guest on logout or account switch.
    pub fn detach(&mut self) {
        self.account = None;
        self.guest = true;
    }
}
