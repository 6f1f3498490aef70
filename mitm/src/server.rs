//! Listening, accepting, and keeping track of sessions, for either proxy.
use ::core::future::Future;
use ::std::io;
use ::std::net::SocketAddr;
use ::std::sync::Arc;
use ::std::time::Duration;

use ::tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use ::tokio_util::sync::CancellationToken;
use ::tokio_util::task::TaskTracker;
use ::tracing::Instrument;

use crate::error::{Report, ServeError, SessionError};

/// How long an outbound connection may take before the session gives up.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// What a proxy does with one accepted client.
pub trait Handler: Send + Sync + 'static {
    /// Short name for logs, `"login"` or `"game"`.
    fn role(&self) -> &'static str;

    /// Serve one client until it's done, or until `cancel` fires.
    /// The connection is closed once the returned future completes.
    fn handle(
        &self,
        client: TcpStream,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// A bound listening socket, ready to [`serve`](Listener::serve).
pub struct Listener<H> {
    inner: TcpListener,
    handler: Arc<H>,
}
impl<H: Handler> Listener<H> {
    /// Bind `addr`. Failing here is the only way a proxy can fail before it starts.
    pub async fn bind(addr: &str, handler: H) -> Result<Self, ServeError> {
        let inner = TcpListener::bind(addr).await.map_err(|source| ServeError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        Ok(Self { inner, handler: Arc::new(handler) })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept clients until `cancel` fires or the listener breaks.
    ///
    /// Every session gets its own task. Before returning, the listening
    /// socket is closed, every session is told to stop, and all of them are
    /// waited on, so nothing this listener started outlives the call.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), ServeError> {
        let Self { inner, handler } = self;
        let role = handler.role();
        let address = match inner.local_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => String::from("?"),
        };
        ::tracing::info!(%address, "{}: serving", role);

        let sessions = TaskTracker::new();
        let stop_sessions = cancel.child_token();
        let result = loop {
            let accepted = ::tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                accepted = inner.accept() => accepted,
            };
            let (client, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) if is_transient(&e) => {
                    ::tracing::warn!(error = %e, "{}: failed to accept a connection", role);
                    continue
                },
                Err(e) => break Err(ServeError::Accept(e)),
            };
            let span = ::tracing::info_span!("session", role, client = %peer);
            sessions.spawn(session(handler.clone(), client, stop_sessions.clone()).instrument(span));
        };

        drop(inner);
        stop_sessions.cancel();
        sessions.close();
        sessions.wait().await;
        ::tracing::info!(%address, "{}: stopped serving", role);
        result
    }
}

/// Bind `addr` and serve it with `handler` until `cancel` fires.
pub async fn listen_and_serve<H: Handler>(
    addr: &str,
    handler: H,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    Listener::bind(addr, handler).await?.serve(cancel).await
}

async fn session<H: Handler>(handler: Arc<H>, client: TcpStream, cancel: CancellationToken) {
    ::tracing::info!("client connected");
    match handler.handle(client, cancel).await {
        Ok(()) => (),
        Err(e) if e.is_disconnect() => (),
        Err(e) => ::tracing::debug!(error = %Report(&e), "error while handling client connection"),
    }
    ::tracing::info!("client disconnected");
}

/// Connect to an upstream server, giving up after [`DIAL_TIMEOUT`].
pub(crate) async fn dial<A>(addr: A) -> Result<TcpStream, SessionError>
where
    A: ToSocketAddrs + ToString,
{
    let source = match ::tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => return Ok(stream),
        Ok(Err(e)) => e,
        Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
    };
    Err(SessionError::Dial { addr: addr.to_string(), source })
}

/// Errors that belong to one half-accepted connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
