//! Parses the first decrypted bytes of a client connection into a
//! destination address.
//!
//! ```text
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! ```

use crate::errors::Error;
use std::net::Ipv4Addr;

const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;

/// The destination named by a handshake header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Ipv4(Ipv4Addr, u16),
    Domain(String, u16),
}

impl Destination {
    pub fn port(&self) -> u16 {
        match self {
            Destination::Ipv4(_, port) => *port,
            Destination::Domain(_, port) => *port,
        }
    }

    /// A `host:port` string suitable for `tokio::net::lookup_host` /
    /// `TcpStream::connect`; for the IPv4 case this also happens to be a
    /// valid `SocketAddr` string, so a single resolution path covers both.
    pub fn host_port(&self) -> String {
        match self {
            Destination::Ipv4(addr, port) => format!("{}:{}", addr, port),
            Destination::Domain(host, port) => format!("{}:{}", host, port),
        }
    }
}

/// Parses `buf` as a handshake header. On success, returns the destination
/// and the number of bytes consumed from the front of `buf`; everything
/// after that offset is the first payload chunk bound for the upstream.
///
/// Never reads past `buf`'s end: a header too short for its own `ATYP`
/// returns [`Error::TruncatedHandshake`] instead of panicking or reading
/// out of bounds.
pub fn parse(buf: &[u8]) -> Result<(Destination, usize), Error> {
    if buf.is_empty() {
        return Err(Error::TruncatedHandshake);
    }

    let atyp = buf[0];
    match atyp {
        ATYP_IPV4 => {
            // 1 (ATYP) + 4 (address) + 2 (port)
            if buf.len() < 7 {
                return Err(Error::TruncatedHandshake);
            }
            let addr = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
            let port = u16::from_be_bytes([buf[5], buf[6]]);
            Ok((Destination::Ipv4(addr, port), 7))
        }
        ATYP_DOMAIN => {
            if buf.len() < 2 {
                return Err(Error::TruncatedHandshake);
            }
            let len = buf[1] as usize;
            let header_len = 2 + len + 2;
            if buf.len() < header_len {
                return Err(Error::TruncatedHandshake);
            }
            let host = std::str::from_utf8(&buf[2..2 + len])
                .map_err(|_| Error::InvalidHostName)?
                .to_string();
            let port = u16::from_be_bytes([buf[2 + len], buf[2 + len + 1]]);
            Ok((Destination::Domain(host, port), header_len))
        }
        other => Err(Error::UnsupportedAddressType(other)),
    }
}
