//! Logging every message that goes through a session, per side.
use ::proto::stream::MAX_MESSAGE_LEN;
use ::proto::DELIMITER;

/// Who sent the bytes being captured.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}
impl Side {
    pub fn name(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// Watches raw bytes from one side and logs each message once it is complete.
///
/// Only ever looks at copies, the bytes themselves are forwarded untouched.
#[derive(Debug)]
pub struct Capture {
    side: Side,
    partial: Vec<u8>,
}
impl Capture {
    pub fn new(side: Side) -> Self {
        Self { side, partial: Vec::new() }
    }

    /// Feed bytes as they were read, returning how many messages they completed.
    pub fn observe(&mut self, bytes: &[u8]) -> usize {
        let mut complete = 0;
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|&b| b == DELIMITER) {
            if self.partial.is_empty() {
                self.message(&rest[..pos]);
            } else {
                self.partial.extend_from_slice(&rest[..pos]);
                let msg = ::std::mem::take(&mut self.partial);
                self.message(&msg);
            }
            complete += 1;
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        if self.partial.len() > MAX_MESSAGE_LEN {
            ::tracing::debug!("{}: dropping {} unterminated bytes from capture", self.side.name(), self.partial.len());
            self.partial.clear();
        }
        complete
    }

    /// Log one already framed message, without its delimiter.
    pub fn message(&self, msg: &[u8]) {
        ::tracing::debug!("{}: {:?}", self.side.name(), String::from_utf8_lossy(msg));
    }

    /// Log whatever never got its delimiter, once the stream is over.
    pub fn finish(&mut self) {
        if !self.partial.is_empty() {
            ::tracing::debug!("{} (unterminated): {:?}", self.side.name(), String::from_utf8_lossy(&self.partial));
            self.partial.clear();
        }
    }
}
