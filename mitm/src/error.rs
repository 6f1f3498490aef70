use ::core::fmt;
use ::std::error::Error;
use ::std::io;

/// Errors that stop a listener.
#[derive(Debug, ::thiserror::Error)]
pub enum ServeError {
    #[error("could not listen on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("accept failed")]
    Accept(#[source] io::Error),
}

/// Which way bytes were flowing when a relay failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}
impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::ClientToUpstream => "client->upstream",
            Direction::UpstreamToClient => "upstream->client",
        })
    }
}

/// Errors that end a single session. These are logged and dropped,
/// they never reach the listener.
#[derive(Debug, ::thiserror::Error)]
pub enum SessionError {
    #[error("could not connect to {addr}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("relay failed ({direction})")]
    Relay {
        direction: Direction,
        #[source]
        source: io::Error,
    },
    #[error("peer closed the connection before the session was set up")]
    Disconnected,
    #[error("client did not present a ticket")]
    MissingTicket,
    #[error("malformed identification")]
    Malformed(#[from] ::proto::DecodeError),
    #[error("unknown or expired ticket `{0}`")]
    UnknownTicket(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
impl SessionError {
    /// A peer going away in the middle of the handshake. Not worth reporting.
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Disconnected => true,
            SessionError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

/// Displays an error followed by each of its causes.
pub(crate) struct Report<'a>(pub &'a dyn Error);
impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {}", cause)?;
            source = cause.source();
        }
        Ok(())
    }
}
