//! The login side: relay to the real login server, and point the client's
//! game connection back at us.
use ::std::borrow::Cow;
use ::std::io;
use ::std::sync::Arc;

use ::proto::stream::{Reader, Writer};
use ::proto::{Address, SelectServer};
use ::tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use ::tokio::net::TcpStream;
use ::tokio_util::sync::CancellationToken;

use crate::cache::TicketCache;
use crate::capture::{Capture, Side};
use crate::error::SessionError;
use crate::relay;
use crate::server::{dial, Handler};

pub struct LoginProxy {
    /// The real login server.
    server: String,
    /// Where clients should reach our game proxy.
    public: Address,
    cache: Arc<dyn TicketCache>,
}
impl LoginProxy {
    pub fn new(server: impl Into<String>, public: Address, cache: Arc<dyn TicketCache>) -> Self {
        Self { server: server.into(), public, cache }
    }

    /// Forward server messages to the client, swapping the game server
    /// address in redirects for our own.
    ///
    /// Bytes the server sends after its last delimiter still reach the client
    /// as they are.
    pub(crate) async fn forward_server<R, W>(&self, from: R, to: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let capture = Capture::new(Side::Server);
        let mut reader = Reader::new(from);
        let mut writer = Writer::new(to);
        loop {
            match reader.read().await {
                Ok(Some(msg)) => {
                    capture.message(&msg);
                    writer.write(&self.intercept(&msg)).await?;
                },
                Ok(None) => return Ok(()),
                Err(e) if relay::is_end_of_stream(&e) => {
                    let tail = reader.buffered();
                    ::tracing::debug!("server (unterminated): {:?}", String::from_utf8_lossy(tail));
                    let mut to = writer.into_inner();
                    to.write_all(tail).await?;
                    return to.flush().await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn intercept<'a>(&self, msg: &'a [u8]) -> Cow<'a, [u8]> {
        let redirect = match SelectServer::decode(msg) {
            Ok(Some(redirect)) => redirect,
            Ok(None) => return Cow::Borrowed(msg),
            Err(e) => {
                // let the client go straight to the game server
                ::tracing::warn!(error = %e, "login: could not parse redirect, forwarding as is");
                return Cow::Borrowed(msg);
            },
        };
        ::tracing::info!(
            game_server = %redirect.address,
            public = %self.public,
            "login: redirecting client",
        );
        ::tracing::debug!(ticket = %redirect.ticket, "login: caching ticket");
        self.cache.put(redirect.ticket.clone(), redirect.address.to_string());
        Cow::Owned(redirect.redirect(&self.public).encode())
    }
}
impl Handler for LoginProxy {
    fn role(&self) -> &'static str {
        "login"
    }

    async fn handle(&self, client: TcpStream, cancel: CancellationToken) -> Result<(), SessionError> {
        let server = ::tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            server = dial(self.server.as_str()) => server?,
        };
        let (mut client_rx, client_tx) = client.into_split();
        let (server_rx, mut server_tx) = server.into_split();
        relay::race(
            &cancel,
            relay::pipe(&mut client_rx, &mut server_tx, Capture::new(Side::Client)),
            self.forward_server(server_rx, client_tx),
        )
        .await
    }
}
