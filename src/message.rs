//! Typed request/response protocol
//!
//! Closed enums for the client→server `Request` and server→client
//! `Response` messages, with their numeric wire discriminants and the
//! per-action payload field schemas. Every action's payload is an ordered
//! list of `|`-separated fields handled by one generic split/join pair, so
//! no handler does its own offset arithmetic.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::types::{AccountId, RoomId};

/// Client → Server message
///
/// Wire action types: NONE=0, LoginAccount=1, LogoutAccount=2,
/// RegisterAccount=3, CreateRoom=4, AddMember=5, RemoveMember=6,
/// SendMessage=7, TerminateConnection=8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Empty/unrecognized request; processed as a protocol violation
    None,
    /// Attach the connection to an existing account
    Login { account: AccountId, key: String },
    /// Detach the connection from its account
    Logout { account: AccountId, key: String },
    /// Create a new account; the reply carries the assigned id
    Register { name: String, key: String },
    /// Create a new room owned by the requester
    CreateRoom {
        account: AccountId,
        key: String,
        name: String,
    },
    /// Add another account to a room the requester hosts
    AddMember {
        account: AccountId,
        key: String,
        room: RoomId,
        member: AccountId,
    },
    /// Remove a member from a room (host, or the member itself)
    RemoveMember {
        account: AccountId,
        key: String,
        room: RoomId,
        member: AccountId,
    },
    /// Send a message to every other member of a room
    SendMessage {
        account: AccountId,
        key: String,
        room: RoomId,
        text: String,
    },
    /// Close this connection after a final reply
    Terminate,
}

impl Request {
    /// Numeric wire value of this action type.
    pub fn action(&self) -> u32 {
        match self {
            Request::None => 0,
            Request::Login { .. } => 1,
            Request::Logout { .. } => 2,
            Request::Register { .. } => 3,
            Request::CreateRoom { .. } => 4,
            Request::AddMember { .. } => 5,
            Request::RemoveMember { .. } => 6,
            Request::SendMessage { .. } => 7,
            Request::Terminate => 8,
        }
    }

    /// Action name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Request::None => "NONE",
            Request::Login { .. } => "LoginAccount",
            Request::Logout { .. } => "LogoutAccount",
            Request::Register { .. } => "RegisterAccount",
            Request::CreateRoom { .. } => "CreateRoom",
            Request::AddMember { .. } => "AddMember",
            Request::RemoveMember { .. } => "RemoveMember",
            Request::SendMessage { .. } => "SendMessage",
            Request::Terminate => "TerminateConnection",
        }
    }

    /// Pack into a wire frame addressed to `target`.
    ///
    /// Requests carry `0` as the target; the server identifies the sender
    /// by the connection the frame arrived on, not by this field.
    pub fn to_frame(&self, target: u64) -> Frame {
        let data = match self {
            Request::None | Request::Terminate => String::new(),
            Request::Login { account, key } | Request::Logout { account, key } => {
                join_fields(&[account.to_string(), key.clone()])
            }
            Request::Register { name, key } => join_fields(&[name.clone(), key.clone()]),
            Request::CreateRoom { account, key, name } => {
                join_fields(&[account.to_string(), key.clone(), name.clone()])
            }
            Request::AddMember {
                account,
                key,
                room,
                member,
            }
            | Request::RemoveMember {
                account,
                key,
                room,
                member,
            } => join_fields(&[
                account.to_string(),
                key.clone(),
                room.to_string(),
                member.to_string(),
            ]),
            Request::SendMessage {
                account,
                key,
                room,
                text,
            } => join_fields(&[
                account.to_string(),
                key.clone(),
                room.to_string(),
                text.clone(),
            ]),
        };
        Frame::new(self.action(), target, data)
    }

    /// Interpret a decoded frame as a request.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.action {
            0 => Ok(Request::None),
            1 => {
                let fields = split_fields(&frame.data, 2)?;
                Ok(Request::Login {
                    account: parse_field(&fields[0])?,
                    key: fields[1].clone(),
                })
            }
            2 => {
                let fields = split_fields(&frame.data, 2)?;
                Ok(Request::Logout {
                    account: parse_field(&fields[0])?,
                    key: fields[1].clone(),
                })
            }
            3 => {
                let fields = split_fields(&frame.data, 2)?;
                Ok(Request::Register {
                    name: fields[0].clone(),
                    key: fields[1].clone(),
                })
            }
            4 => {
                let fields = split_fields(&frame.data, 3)?;
                Ok(Request::CreateRoom {
                    account: parse_field(&fields[0])?,
                    key: fields[1].clone(),
                    name: fields[2].clone(),
                })
            }
            5 => {
                let fields = split_fields(&frame.data, 4)?;
                Ok(Request::AddMember {
                    account: parse_field(&fields[0])?,
                    key: fields[1].clone(),
                    room: parse_field(&fields[2])?,
                    member: parse_field(&fields[3])?,
                })
            }
            6 => {
                let fields = split_fields(&frame.data, 4)?;
                Ok(Request::RemoveMember {
                    account: parse_field(&fields[0])?,
                    key: fields[1].clone(),
                    room: parse_field(&fields[2])?,
                    member: parse_field(&fields[3])?,
                })
            }
            7 => {
                let fields = split_fields(&frame.data, 4)?;
                Ok(Request::SendMessage {
                    account: parse_field(&fields[0])?,
                    key: fields[1].clone(),
                    room: parse_field(&fields[2])?,
                    text: fields[3].clone(),
                })
            }
            8 => Ok(Request::Terminate),
            other => Err(ProtocolError::UnknownAction(other)),
        }
    }
}

/// Server → Client message
///
/// Wire action types: NONE=0, InformSuccess=1, InformFailure=2,
/// MessageIn=3, JoinRoom=4, LeaveRoom=5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Sentinel; discarded by receivers
    None,
    /// The request succeeded; `data` carries context (a new id, or empty)
    Success { data: String },
    /// The request failed; `reason` is human-readable
    Failure { reason: String },
    /// A message arrived in a room the receiver is a member of
    MessageIn {
        room: RoomId,
        sender: AccountId,
        text: String,
    },
    /// The receiver was added to a room
    JoinRoom { room: RoomId, name: String },
    /// The receiver was removed from a room
    LeaveRoom { room: RoomId, name: String },
}

impl Response {
    /// Numeric wire value of this action type.
    pub fn action(&self) -> u32 {
        match self {
            Response::None => 0,
            Response::Success { .. } => 1,
            Response::Failure { .. } => 2,
            Response::MessageIn { .. } => 3,
            Response::JoinRoom { .. } => 4,
            Response::LeaveRoom { .. } => 5,
        }
    }

    /// A terminal reply completes a pending synchronous request; anything
    /// else is a pushed event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Response::Success { .. } | Response::Failure { .. })
    }

    /// Pack into a wire frame addressed to connection `target`.
    pub fn to_frame(&self, target: u64) -> Frame {
        let data = match self {
            Response::None => String::new(),
            Response::Success { data } => data.clone(),
            Response::Failure { reason } => reason.clone(),
            Response::MessageIn { room, sender, text } => {
                join_fields(&[room.to_string(), sender.to_string(), text.clone()])
            }
            Response::JoinRoom { room, name } | Response::LeaveRoom { room, name } => {
                join_fields(&[room.to_string(), name.clone()])
            }
        };
        Frame::new(self.action(), target, data)
    }

    /// Interpret a decoded frame as a response.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.action {
            0 => Ok(Response::None),
            1 => Ok(Response::Success {
                data: frame.data.trim().to_string(),
            }),
            2 => Ok(Response::Failure {
                reason: frame.data.trim().to_string(),
            }),
            3 => {
                let fields = split_fields(&frame.data, 3)?;
                Ok(Response::MessageIn {
                    room: parse_field(&fields[0])?,
                    sender: parse_field(&fields[1])?,
                    text: fields[2].clone(),
                })
            }
            4 => {
                let fields = split_fields(&frame.data, 2)?;
                Ok(Response::JoinRoom {
                    room: parse_field(&fields[0])?,
                    name: fields[1].clone(),
                })
            }
            5 => {
                let fields = split_fields(&frame.data, 2)?;
                Ok(Response::LeaveRoom {
                    room: parse_field(&fields[0])?,
                    name: fields[1].clone(),
                })
            }
            other => Err(ProtocolError::UnknownAction(other)),
        }
    }
}

/// Join payload fields with the `|` separator.
fn join_fields(fields: &[String]) -> String {
    fields.join(" | ")
}

/// Split a payload into exactly `count` fields, trimming the single-space
/// padding around each separator. The last field absorbs any further `|`
/// characters, so free text survives intact.
fn split_fields(data: &str, count: usize) -> Result<Vec<String>, ProtocolError> {
    let fields: Vec<String> = data
        .splitn(count, '|')
        .map(|field| field.trim().to_string())
        .collect();
    if fields.len() != count {
        return Err(ProtocolError::FieldCount {
            expected: count,
            got: fields.len(),
        });
    }
    Ok(fields)
}

fn parse_field<T: std::str::FromStr>(field: &str) -> Result<T, ProtocolError> {
    field
        .parse()
        .map_err(|_| ProtocolError::BadField(field.to_string()))
}
