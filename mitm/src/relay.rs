//! Shuffling bytes between a client and its upstream.
use ::core::future::Future;
use ::std::io;

use ::tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use ::tokio_util::sync::CancellationToken;

use crate::capture::{Capture, Side};
use crate::error::{Direction, SessionError};

/// Copy bytes both ways between `client` and `upstream` until one side
/// closes, one side fails, or `cancel` fires.
///
/// Either side closing ends the whole session: whatever the other direction
/// was doing is dropped and both streams are closed on return.
/// Reaching end-of-stream and being cancelled both count as success.
/// Every message is captured on its way through.
pub async fn relay<C, U>(cancel: &CancellationToken, client: C, upstream: U) -> Result<(), SessionError>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    relay_captured(cancel, client, upstream, Capture::new(Side::Client), Capture::new(Side::Server)).await
}

/// [`relay`], carrying on captures that have already seen the start of each side.
pub(crate) async fn relay_captured<C, U>(
    cancel: &CancellationToken,
    client: C,
    upstream: U,
    from_client: Capture,
    from_server: Capture,
) -> Result<(), SessionError>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_rx, mut client_tx) = ::tokio::io::split(client);
    let (mut upstream_rx, mut upstream_tx) = ::tokio::io::split(upstream);
    race(
        cancel,
        pipe(&mut client_rx, &mut upstream_tx, from_client),
        pipe(&mut upstream_rx, &mut client_tx, from_server),
    )
    .await
}

/// Run both directions of a session until the first one finishes.
///
/// This is the termination logic of [`relay`] on its own, for sessions
/// that need to look at what flows through one of the directions.
pub async fn race<A, B>(cancel: &CancellationToken, to_upstream: A, to_client: B) -> Result<(), SessionError>
where
    A: Future<Output = io::Result<()>>,
    B: Future<Output = io::Result<()>>,
{
    let (direction, result) = ::tokio::select! {
        _ = cancel.cancelled() => {
            ::tracing::debug!("relay: cancelled");
            return Ok(())
        },
        result = to_upstream => (Direction::ClientToUpstream, result),
        result = to_client => (Direction::UpstreamToClient, result),
    };
    match result {
        Err(source) if !is_end_of_stream(&source) => Err(SessionError::Relay { direction, source }),
        _ => {
            ::tracing::debug!(%direction, "relay: stream ended");
            Ok(())
        },
    }
}

/// Copy `from` into `to` until `from` ends, showing every chunk to `capture` first.
pub(crate) async fn pipe<R, W>(from: &mut R, to: &mut W, mut capture: Capture) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(8 * 1024);
    loop {
        buf.clear();
        if from.read_buf(&mut buf).await? == 0 {
            capture.finish();
            return to.flush().await;
        }
        capture.observe(&buf);
        to.write_all(&buf).await?;
    }
}

pub(crate) fn is_end_of_stream(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}
