//! Basic type definitions for the chat service
//!
//! Provides newtype wrappers for type safety:
//! - `AccountId`: server-assigned account identifier
//! - `RoomId`: server-assigned chat room identifier
//! - `MessageId`: monotonic key into the global message index
//! - `ConnId`: logical identifier of a transport connection
//!
//! All four wrap a `u64` issued from a monotonic counter, so they are
//! orderable, usable as map keys, and appear on the wire as plain decimal
//! integers.

use std::num::ParseIntError;

/// Implements the shared surface of an integer id newtype: `Display` for
/// wire/log formatting and `FromStr` for payload field parsing.
macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map($name)
            }
        }
    };
}

id_type! {
    /// Unique account identifier, assigned by the server at registration.
    AccountId
}

id_type! {
    /// Unique chat room identifier, assigned by the server at creation.
    RoomId
}

id_type! {
    /// Key into the server-wide message index.
    MessageId
}

id_type! {
    /// Logical identifier of a transport connection (server side).
    ConnId
}
