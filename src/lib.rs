//! Multi-user TCP chat service library
//!
//! A chat server and a client session engine speaking a custom
//! delimited-text wire protocol over plain TCP.
//!
//! # Features
//! - Account registration and key-based login
//! - Chat rooms with host-managed membership
//! - Message fan-out to room members with a server-wide message index
//! - Asynchronous pushed events (room joined/left, message delivered)
//! - Append-only audit log of every request outcome
//! - Client-side session with blocking request emulation and callbacks
//!
//! # Architecture
//! The server funnels all requests through an `mpsc` channel into the
//! `ChatServer` actor:
//! - Each accepted socket gets a handler task pumping frames both ways
//! - `ChatServer` owns the connection registry and is the single writer
//!   of the shared [`Store`]
//! - Pushed responses ride each target connection's write channel
//!
//! The client [`Session`] runs three tasks (sender, receiver, background
//! dispatcher); a blocking `request` call parks its caller on a one-shot
//! completion channel until the matching terminal reply arrives.
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use echat::{serve, Request, Session};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:3490").await.unwrap();
//!     tokio::spawn(serve(listener));
//!
//!     let mut session = Session::connect("127.0.0.1:3490").await.unwrap();
//!     session.start();
//!     let reply = session
//!         .request(Request::Register {
//!             name: "ariel".into(),
//!             key: "secret".into(),
//!         })
//!         .await
//!         .unwrap();
//!     println!("registered: {:?}", reply);
//!     session.stop().await;
//! }
//! ```

pub mod account;
pub mod client;
pub mod error;
pub mod frame;
pub mod handler;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use account::Account;
pub use client::Connection;
pub use error::{AppError, ProtocolError, SendError};
pub use frame::{Frame, FrameCodec};
pub use handler::handle_connection;
pub use message::{Request, Response};
pub use room::Room;
pub use server::{serve, serve_with_store, ChatServer, Command};
pub use session::{AccountInfo, RoomInfo, Session};
pub use store::Store;
pub use types::{AccountId, ConnId, MessageId, RoomId};

/// Well-known server port
pub const SERVER_PORT: u16 = 3490;
