use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::error::{Result, UnknownProtocol};
use crate::http::data::{ConnectReply, ConnectRequest};
use crate::socks::data::{SocksReply, SocksRequest};


/// Destination requested by the client. `host` is either a dotted-quad
/// IPv4 literal or a name to be resolved on connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: String, port: u16) -> Target {
        Target{ host, port }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Socks4,
    HttpConnect,
}

impl Protocol {
    /// Decodes the handshake from the first bytes of a fresh connection.
    pub fn read_request<T: Read>(&self, data: T) -> Result<Target> {
        match *self {
            Protocol::Socks4 => SocksRequest::read(data).map(|req| req.target()),
            Protocol::HttpConnect =>
                ConnectRequest::read(data).map(|req| req.target()),
        }
    }

    /// Reply sent to the client once the outbound connect has been tried.
    pub fn response(&self, success: bool) -> Vec<u8> {
        match *self {
            Protocol::Socks4 => SocksReply::new(success).to_bytes().to_vec(),
            Protocol::HttpConnect => ConnectReply::new(success).to_bytes().to_vec(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Protocol::Socks4 => "socks4",
            Protocol::HttpConnect => "http",
        })
    }
}

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> ::std::result::Result<Protocol, UnknownProtocol> {
        match s.to_ascii_lowercase().as_str() {
            "socks4" | "socks" => Ok(Protocol::Socks4),
            "http" | "http-connect" => Ok(Protocol::HttpConnect),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;

    #[test]
    fn dispatches_on_protocol() {
        let socks = b"\x04\x01\x00\x50\x7f\x00\x00\x01\x00";
        assert_eq!(Protocol::Socks4.read_request(&socks[..]).unwrap(),
                   Target::new("127.0.0.1".to_string(), 80));

        let http = b"CONNECT example.org:443 HTTP/1.1\r\n\r\n";
        assert_eq!(Protocol::HttpConnect.read_request(&http[..]).unwrap(),
                   Target::new("example.org".to_string(), 443));
    }

    #[test]
    fn variants_do_not_accept_each_other() {
        let socks = b"\x04\x01\x00\x50\x7f\x00\x00\x01\x00";
        match Protocol::HttpConnect.read_request(&socks[..]) {
            Err(ProxyError::InvalidRequest(_)) => {},
            _ => panic!("socks request accepted by http proxy"),
        }

        let http = b"CONNECT example.org:443 HTTP/1.1\r\n\r\n";
        match Protocol::Socks4.read_request(&http[..]) {
            Err(ProxyError::InvalidRequest(_)) => {},
            _ => panic!("http request accepted by socks proxy"),
        }
    }

    #[test]
    fn responses() {
        assert_eq!(Protocol::Socks4.response(true),
                   vec![0x00, 0x5a, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Protocol::Socks4.response(false),
                   vec![0x00, 0x5b, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Protocol::HttpConnect.response(false),
                   b"HTTP/1.1 404\r\n\r\n".to_vec());
    }

    #[test]
    fn parses_protocol_names() {
        assert_eq!("socks4".parse::<Protocol>().unwrap(), Protocol::Socks4);
        assert_eq!("HTTP".parse::<Protocol>().unwrap(), Protocol::HttpConnect);
        assert!("socks5".parse::<Protocol>().is_err());
    }

    #[test]
    fn target_display() {
        assert_eq!(Target::new("localhost".to_string(), 8080).to_string(),
                   "localhost:8080");
    }
}
