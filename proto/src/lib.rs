//! # Retro MMO wire protocol, just the parts a proxy needs.
//!
//! Both the login server and the game server speak a plain text protocol
//! on top of TCP:
//! ```text
//! server_msg := text '\0'
//! client_msg := text '\n' '\0'
//! ```
//! Messages are told apart by a short ASCII prefix. Everything the proxy does
//! not care about stays an opaque byte string; only the login server's
//! redirect (`AYK`/`AXK`) and the client's ticket (`AT`) are decoded.
//!
//! # Use
//! [`stream::Reader`] cuts a byte stream into messages and [`stream::Writer`]
//! puts them back on the wire, delimiter included. [`msg`] holds the
//! message types.
pub mod msg;
pub mod stream;

pub use msg::{Address, Encoding, SelectServer, TicketMessage};

/// Terminates every message, in both directions.
pub const DELIMITER: u8 = b'\0';

/// What the game server sends as soon as a client connects.
/// Clients wait for it before identifying themselves.
pub const GAME_HELLO: &[u8] = b"HG";

#[derive(Debug, Clone, PartialEq, Eq, ::thiserror::Error)]
pub enum DecodeError {
    #[error("message is not valid utf-8")]
    Utf8,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid host `{0}`")]
    InvalidHost(String),
    #[error("invalid port `{0}`")]
    InvalidPort(String),
    #[error("invalid encoded address `{0}`")]
    InvalidEncodedAddress(String),
    #[error("empty ticket")]
    EmptyTicket,
}
