//! The game side: find out which real server a client belongs to from its
//! ticket, then get out of the way.
use ::std::sync::Arc;

use ::proto::stream::{Reader, Writer};
use ::proto::{TicketMessage, DELIMITER, GAME_HELLO};
use ::tokio::io::AsyncWriteExt;
use ::tokio::net::TcpStream;
use ::tokio_util::sync::CancellationToken;

use crate::cache::TicketCache;
use crate::capture::{Capture, Side};
use crate::error::SessionError;
use crate::relay::relay_captured;
use crate::server::{dial, Handler};

/// Messages a client may send before its ticket.
const MAX_MESSAGES_BEFORE_TICKET: usize = 8;

pub struct GameProxy {
    cache: Arc<dyn TicketCache>,
}
impl GameProxy {
    pub fn new(cache: Arc<dyn TicketCache>) -> Self {
        Self { cache }
    }

    /// Get `client` connected to its game server, with both streams lined
    /// up so that neither end can tell the proxy was there.
    ///
    /// The returned captures have seen everything already sent each way.
    async fn connect(&self, mut client: TcpStream) -> Result<Connected, SessionError> {
        // The client says nothing until it's been greeted.
        // We can't know which server to ask for the real greeting yet,
        // so stand in for it.
        Writer::new(&mut client).write(GAME_HELLO).await?;

        let mut from_client = Capture::new(Side::Client);
        let mut reader = Reader::new(client);
        let mut identification = Vec::new();
        let mut ticket = None;
        for _ in 0..MAX_MESSAGES_BEFORE_TICKET {
            let msg = reader.read().await?.ok_or(SessionError::Disconnected)?;
            from_client.message(&msg);
            let decoded = TicketMessage::decode(&msg)?;
            identification.extend_from_slice(&msg);
            identification.push(DELIMITER);
            if let Some(TicketMessage { ticket: t }) = decoded {
                ticket = Some(t);
                break;
            }
        }
        let ticket = ticket.ok_or(SessionError::MissingTicket)?;
        let (mut client, read_ahead) = reader.into_parts();
        from_client.observe(&read_ahead);
        identification.extend_from_slice(&read_ahead);

        let addr = self.cache.get(&ticket).ok_or(SessionError::UnknownTicket(ticket))?;
        ::tracing::info!(game_server = %addr, "game: ticket resolved");
        let upstream = dial(addr.as_str()).await?;

        // The client already has its greeting, so the real one goes nowhere.
        let mut from_server = Capture::new(Side::Server);
        let mut reader = Reader::new(upstream);
        let greeting = reader.read().await?.ok_or(SessionError::Disconnected)?;
        from_server.message(&greeting);
        let (mut upstream, read_ahead) = reader.into_parts();
        if greeting != GAME_HELLO {
            ::tracing::debug!("game: unexpected greeting from server, forwarding it");
            Writer::new(&mut client).write(&greeting).await?;
        }
        from_server.observe(&read_ahead);
        client.write_all(&read_ahead).await?;
        upstream.write_all(&identification).await?;
        Ok(Connected { client, upstream, from_client, from_server })
    }
}

struct Connected {
    client: TcpStream,
    upstream: TcpStream,
    from_client: Capture,
    from_server: Capture,
}

impl Handler for GameProxy {
    fn role(&self) -> &'static str {
        "game"
    }

    async fn handle(&self, client: TcpStream, cancel: CancellationToken) -> Result<(), SessionError> {
        let Connected { client, upstream, from_client, from_server } = ::tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            connected = self.connect(client) => connected?,
        };
        relay_captured(&cancel, client, upstream, from_client, from_server).await
    }
}
