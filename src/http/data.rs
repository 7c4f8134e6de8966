use std::io::Read;
use std::str;

use byteorder::ReadBytesExt;

use crate::error::{ProxyError, Result};
use crate::handshake::Target;


macro_rules! get {
    ($e:expr) => ($e.map_err(ProxyError::from_handshake_io)?);
}


pub const CONNECT_PREFIX: &[u8] = b"CONNECT ";

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Upper bound on request line plus headers.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

pub const REPLY_ESTABLISHED: &[u8] =
    b"HTTP/1.1 200 OK\r\nServer: CERN/3.0 libwww/2.17\r\n\r\n";
pub const REPLY_NOT_FOUND: &[u8] = b"HTTP/1.1 404\r\n\r\n";


#[derive(Debug)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
}

impl ConnectRequest {
    /// Reads one byte at a time until the blank line ending the headers,
    /// so nothing past the request is taken off the stream.
    pub fn read<T: Read>(mut data: T) -> Result<ConnectRequest> {
        let mut head = Vec::new();
        while !head.ends_with(HEAD_END) {
            if head.len() >= MAX_HEAD_LEN {
                return Err(ProxyError::invalid("request head too long"));
            }
            head.push(get!(data.read_u8()));
        }
        ConnectRequest::parse(&head)
    }

    pub fn parse(head: &[u8]) -> Result<ConnectRequest> {
        if !head.starts_with(CONNECT_PREFIX) {
            return Err(ProxyError::invalid("not a CONNECT request"));
        }

        let sep = match head.iter().position(|&b| b == b':') {
            Some(sep) if sep > CONNECT_PREFIX.len() => sep,
            _ => return Err(ProxyError::invalid("missing host")),
        };

        let space = match head[sep + 1 ..].iter().position(|&b| b == b' ') {
            Some(offset) => sep + 1 + offset,
            None => return Err(ProxyError::invalid("missing port delimiter")),
        };

        let host = match str::from_utf8(&head[CONNECT_PREFIX.len() .. sep]) {
            Ok(host) => host.to_string(),
            Err(_) => return Err(ProxyError::invalid("host is not valid text")),
        };

        let port = match str::from_utf8(&head[sep + 1 .. space]) {
            Ok(port) if is_integer(port) => port,
            _ => return Err(ProxyError::invalid("bad port")),
        };
        let port = match port.parse::<u16>() {
            Ok(port) => port,
            Err(_) => return Err(ProxyError::UnreachableDestination(
                            format!("{}:{}", host, port))),
        };

        Ok(ConnectRequest{ host, port })
    }

    pub fn target(&self) -> Target {
        Target::new(self.host.clone(), self.port)
    }
}


/// Optionally signed decimal digits, whatever their magnitude.
fn is_integer(text: &str) -> bool {
    let digits = text.trim_start_matches(|c| c == '+' || c == '-');
    text.len() - digits.len() <= 1
        && !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
}


pub struct ConnectReply {
    pub success: bool,
}

impl ConnectReply {
    pub fn new(success: bool) -> ConnectReply {
        ConnectReply{ success }
    }

    pub fn to_bytes(&self) -> &'static [u8] {
        if self.success {
            REPLY_ESTABLISHED
        } else {
            REPLY_NOT_FOUND
        }
    }
}
