//! The handful of messages the proxy decodes.
use ::core::fmt;
use ::core::str::FromStr;
use ::std::net::Ipv4Addr;

use ::once_cell::sync::Lazy;

use crate::DecodeError;

/// Login server: "connect to the game server at `host:port` with `ticket`".
const SELECT_SERVER_PLAIN: &[u8] = b"AYK";
/// Same as above, with the address packed into 11 characters.
const SELECT_SERVER_ENCODED: &[u8] = b"AXK";
/// Client: first message on a game connection.
const TICKET: &[u8] = b"AT";

/// Alphabet used to pack ports, six bits per character.
const PORT_ALPHABET: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

static PORT_DIGITS: Lazy<[Option<u8>; 256]> = Lazy::new(|| {
    let mut digits = [None; 256];
    for (value, &c) in PORT_ALPHABET.iter().enumerate() {
        digits[c as usize] = Some(value as u8);
    }
    digits
});

/// A `host:port` pair as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}
impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
impl FromStr for Address {
    type Err = DecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or(DecodeError::MissingField("port"))?;
        if host.is_empty() {
            return Err(DecodeError::InvalidHost(host.to_owned()));
        }
        let port = port.parse().map_err(|_| DecodeError::InvalidPort(port.to_owned()))?;
        Ok(Self::new(host, port))
    }
}

/// Which of the two redirect forms a message used.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// `AYK<host>:<port>;<ticket>`
    Plain,
    /// `AXK<ip><port><ticket>`, IPv4 only.
    Encoded,
}

/// The login server's redirect to a game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectServer {
    pub address: Address,
    pub ticket: String,
    pub encoding: Encoding,
}
impl SelectServer {
    /// `Ok(None)` means the message is something else entirely.
    /// An error means it *is* a redirect, but one we can't make sense of.
    pub fn decode(msg: &[u8]) -> Result<Option<Self>, DecodeError> {
        if let Some(body) = msg.strip_prefix(SELECT_SERVER_PLAIN) {
            Self::decode_plain(body).map(Some)
        } else if let Some(body) = msg.strip_prefix(SELECT_SERVER_ENCODED) {
            Self::decode_encoded(body).map(Some)
        } else {
            Ok(None)
        }
    }

    fn decode_plain(body: &[u8]) -> Result<Self, DecodeError> {
        let body = ::core::str::from_utf8(body).map_err(|_| DecodeError::Utf8)?;
        let (address, ticket) = body.split_once(';').ok_or(DecodeError::MissingField("ticket"))?;
        if ticket.is_empty() {
            return Err(DecodeError::EmptyTicket);
        }
        Ok(Self {
            address: address.parse()?,
            ticket: ticket.to_owned(),
            encoding: Encoding::Plain,
        })
    }

    fn decode_encoded(body: &[u8]) -> Result<Self, DecodeError> {
        let body = ::core::str::from_utf8(body).map_err(|_| DecodeError::Utf8)?;
        if !body.is_ascii() || body.len() < 11 {
            return Err(DecodeError::InvalidEncodedAddress(body.to_owned()));
        }
        let (ip, rest) = body.split_at(8);
        let (port, ticket) = rest.split_at(3);
        let ip = decode_ip(ip).ok_or_else(|| DecodeError::InvalidEncodedAddress(ip.to_owned()))?;
        let port = decode_port(port).ok_or_else(|| DecodeError::InvalidPort(port.to_owned()))?;
        if ticket.is_empty() {
            return Err(DecodeError::EmptyTicket);
        }
        Ok(Self {
            address: Address::new(ip.to_string(), port),
            ticket: ticket.to_owned(),
            encoding: Encoding::Encoded,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let ip = match self.encoding {
            Encoding::Encoded => self.address.host.parse::<Ipv4Addr>().ok(),
            Encoding::Plain => None,
        };
        let mut out = Vec::with_capacity(3 + self.address.host.len() + 7 + self.ticket.len());
        match ip {
            Some(ip) => {
                out.extend_from_slice(SELECT_SERVER_ENCODED);
                out.extend_from_slice(&encode_ip(ip));
                out.extend_from_slice(&encode_port(self.address.port));
            },
            None => {
                out.extend_from_slice(SELECT_SERVER_PLAIN);
                out.extend_from_slice(self.address.to_string().as_bytes());
                out.push(b';');
            },
        }
        out.extend_from_slice(self.ticket.as_bytes());
        out
    }

    /// The same redirect, pointing somewhere else.
    ///
    /// The packed form can only carry an IPv4 address,
    /// so a hostname target turns the redirect into the plain form.
    pub fn redirect(&self, to: &Address) -> Self {
        let encoding = match self.encoding {
            Encoding::Encoded if to.host.parse::<Ipv4Addr>().is_err() => Encoding::Plain,
            e => e,
        };
        Self {
            address: to.clone(),
            ticket: self.ticket.clone(),
            encoding,
        }
    }
}

/// The client's `AT<ticket>`, which opens every game connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketMessage {
    pub ticket: String,
}
impl TicketMessage {
    pub fn decode(msg: &[u8]) -> Result<Option<Self>, DecodeError> {
        let msg = msg.strip_suffix(b"\n").unwrap_or(msg);
        let ticket = match msg.strip_prefix(TICKET) {
            Some(ticket) => ticket,
            None => return Ok(None),
        };
        let ticket = ::core::str::from_utf8(ticket).map_err(|_| DecodeError::Utf8)?;
        if ticket.is_empty() {
            return Err(DecodeError::EmptyTicket);
        }
        Ok(Some(Self { ticket: ticket.to_owned() }))
    }
}

fn encode_ip(ip: Ipv4Addr) -> [u8; 8] {
    let mut out = [0; 8];
    for (pair, octet) in out.chunks_exact_mut(2).zip(ip.octets()) {
        pair[0] = (octet >> 4) + b'0';
        pair[1] = (octet & 15) + b'0';
    }
    out
}

fn decode_ip(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    for (octet, pair) in octets.iter_mut().zip(s.as_bytes().chunks_exact(2)) {
        let hi = pair[0].checked_sub(b'0').filter(|&n| n < 16)?;
        let lo = pair[1].checked_sub(b'0').filter(|&n| n < 16)?;
        *octet = (hi << 4) | lo;
    }
    Some(Ipv4Addr::from(octets))
}

fn encode_port(port: u16) -> [u8; 3] {
    let port = port as usize;
    [
        PORT_ALPHABET[(port >> 12) & 63],
        PORT_ALPHABET[(port >> 6) & 63],
        PORT_ALPHABET[port & 63],
    ]
}

fn decode_port(s: &str) -> Option<u16> {
    s.bytes().try_fold(0u32, |acc, c| {
        let digit = PORT_DIGITS[c as usize]?;
        Some((acc << 6) | u32::from(digit))
    })
    .and_then(|port| u16::try_from(port).ok())
}
