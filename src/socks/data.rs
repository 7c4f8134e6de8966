use std::io::Read;
use std::net::Ipv4Addr;

use byteorder::{NetworkEndian, ReadBytesExt};
use num_traits::FromPrimitive;

use crate::error::{ProxyError, Result};
use crate::handshake::Target;


macro_rules! get {
    ($e:expr) => ($e.map_err(ProxyError::from_handshake_io)?);
}


pub const SOCKS_VERSION: u8 = 4;

/// VER, CMD, DSTPORT, DSTIP and one more byte. Only the first eight
/// are interpreted; the user id field is not read.
pub const REQUEST_LEN: usize = 9;

pub const REPLY_LEN: usize = 8;


#[derive(Clone, Copy, Debug, PartialEq, FromPrimitive)]
pub enum SocksCommand {
    Connect = 0x01,
    Bind = 0x02,
}


pub struct SocksRequest {
    pub command: SocksCommand,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl SocksRequest {
    /// Reads exactly one request off `data`. A peer that closes before
    /// all `REQUEST_LEN` bytes arrive sent an invalid request.
    pub fn read<T: Read>(mut data: T) -> Result<SocksRequest> {
        let mut packet = [0; REQUEST_LEN];
        get!(data.read_exact(&mut packet));
        SocksRequest::parse(&packet)
    }

    pub fn parse(mut data: &[u8]) -> Result<SocksRequest> {
        let version = get!(data.read_u8());
        if version != SOCKS_VERSION {
            return Err(ProxyError::invalid(
                format!("unsupported socks version: {}", version)));
        }

        let command = get!(data.read_u8());
        let command = match SocksCommand::from_u8(command) {
            Some(SocksCommand::Connect) => SocksCommand::Connect,
            _ => return Err(ProxyError::invalid(
                    format!("unsupported socks command: {}", command))),
        };

        let port = get!(data.read_u16::<NetworkEndian>());
        let address = Ipv4Addr::from(get!(data.read_u32::<NetworkEndian>()));

        Ok(SocksRequest{ command, address, port })
    }

    pub fn target(&self) -> Target {
        Target::new(self.address.to_string(), self.port)
    }
}


#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SocksReplyStatus {
    Granted = 0x5a,
    Rejected = 0x5b,
}

pub struct SocksReply {
    pub status: SocksReplyStatus,
}

impl SocksReply {
    pub fn new(success: bool) -> SocksReply {
        let status = if success {
            SocksReplyStatus::Granted
        } else {
            SocksReplyStatus::Rejected
        };
        SocksReply{ status }
    }

    /// The bound port and address fields are never filled in.
    pub fn to_bytes(&self) -> [u8; REPLY_LEN] {
        let mut res = [0; REPLY_LEN];
        res[1] = self.status as u8;
        res
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_request() {
        let packet = b"\x04\x01\x00\x50\x7f\x00\x00\x01\x00";
        let request = SocksRequest::read(&packet[..]).unwrap();
        assert_eq!(request.command, SocksCommand::Connect);
        assert_eq!(request.address, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(request.port, 80);
        assert_eq!(request.target(), Target::new("127.0.0.1".to_string(), 80));
    }

    #[test]
    fn port_is_big_endian() {
        let packet = b"\x04\x01\x1f\x90\x0a\x01\x02\x03\x00";
        let request = SocksRequest::read(&packet[..]).unwrap();
        assert_eq!(request.port, 8080);
        assert_eq!(request.address, Ipv4Addr::new(10, 1, 2, 3));
    }

    #[test]
    fn only_nine_bytes_are_consumed() {
        let packet = b"\x04\x01\x00\x50\x7f\x00\x00\x01userid\x00";
        let mut data = &packet[..];
        SocksRequest::read(&mut data).unwrap();
        assert_eq!(data, b"serid\x00");
    }

    #[test]
    fn rejects_wrong_version() {
        let packet = b"\x05\x01\x00\x50\x7f\x00\x00\x01\x00";
        match SocksRequest::read(&packet[..]) {
            Err(ProxyError::InvalidRequest(_)) => {},
            _ => panic!("socks5 request accepted"),
        }
    }

    #[test]
    fn rejects_bind_and_unknown_commands() {
        for &command in &[0x00u8, 0x02, 0x03, 0xff] {
            let packet = [0x04, command, 0x00, 0x50, 0x7f, 0x00, 0x00, 0x01, 0x00];
            match SocksRequest::read(&packet[..]) {
                Err(ProxyError::InvalidRequest(_)) => {},
                _ => panic!("command {} accepted", command),
            }
        }
    }

    #[test]
    fn truncated_request_is_invalid() {
        let packet = b"\x04\x01\x00\x50\x7f\x00\x00\x01";
        match SocksRequest::read(&packet[..]) {
            Err(ProxyError::InvalidRequest(_)) => {},
            _ => panic!("truncated request accepted"),
        }
        match SocksRequest::read(&b""[..]) {
            Err(ProxyError::InvalidRequest(_)) => {},
            _ => panic!("empty request accepted"),
        }
    }

    #[test]
    fn reply_bytes() {
        assert_eq!(SocksReply::new(true).to_bytes(),
                   [0x00, 0x5a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(SocksReply::new(false).to_bytes(),
                   [0x00, 0x5b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }
}
