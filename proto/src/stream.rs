//! Cuts a byte stream into NUL-terminated messages and back.
use ::std::io;
use ::tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::DELIMITER;

/// Upper bound on a single buffered message.
/// Login traffic is a few hundred bytes per message, so anything past this
/// is a peer that never sends a delimiter.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

pub struct Reader<R> {
    half: R,
    // TODO: switch to VecDeque if profiling shows the front drains matter
    buf: Vec<u8>,
}
impl<R: AsyncRead + Unpin> Reader<R> {
    pub fn new(half: R) -> Self {
        Self { half, buf: Vec::with_capacity(1024) }
    }

    /// Read the next message, without its delimiter.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between two messages,
    /// and an [`io::ErrorKind::UnexpectedEof`] error when it ends halfway
    /// through one.
    pub async fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        // bytes already known not to contain a delimiter
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == DELIMITER) {
                let end = scanned + pos;
                let msg = self.buf[..end].to_vec();
                self.buf.drain(..=end);
                return Ok(Some(msg));
            }
            scanned = self.buf.len();
            if scanned > MAX_MESSAGE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("message exceeds {} bytes", MAX_MESSAGE_LEN),
                ));
            }
            match self.half.read_buf(&mut self.buf).await? {
                0 if self.buf.is_empty() => return Ok(None),
                0 => {
                    ::tracing::debug!("stream ended with {} unterminated bytes", self.buf.len());
                    return Err(io::ErrorKind::UnexpectedEof.into());
                },
                _ => (),
            }
        }
    }

    /// Bytes received but not yet returned as a message.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Give back the underlying reader along with whatever was read ahead.
    pub fn into_parts(self) -> (R, Vec<u8>) {
        (self.half, self.buf)
    }
}

pub struct Writer<W> {
    half: W,
    buf: Vec<u8>,
}
impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(half: W) -> Self {
        Self { half, buf: Vec::with_capacity(1024) }
    }

    /// Write one message followed by its delimiter.
    pub async fn write(&mut self, msg: &[u8]) -> io::Result<()> {
        // one write per message, so the delimiter never ends up in its own segment
        self.buf.clear();
        self.buf.extend_from_slice(msg);
        self.buf.push(DELIMITER);
        self.half.write_all(&self.buf).await
    }

    pub fn into_inner(self) -> W {
        self.half
    }
}
