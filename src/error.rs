use std::io;
use std::result;

use thiserror::Error;

use crate::handshake::Target;


pub type Result<T> = result::Result<T, ProxyError>;


#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed or truncated handshake. The session is closed without
    /// a reply.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Outbound connect failed. The client gets the failure reply.
    #[error("failed to connect to {target}: {source}")]
    ConnectFailure {
        target: Target,
        source: io::Error,
    },

    /// Well-formed request naming a destination no socket can reach,
    /// such as a port above 65535. Answered like a failed connect.
    #[error("destination {0} is unreachable")]
    UnreachableDestination(String),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("proxy is shutting down")]
    ShutdownRequested,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    pub fn invalid<S: Into<String>>(reason: S) -> ProxyError {
        ProxyError::InvalidRequest(reason.into())
    }

    /// Reading the handshake hit end of stream before the request was
    /// complete: that is a bad request, not a socket failure.
    pub fn from_handshake_io(err: io::Error) -> ProxyError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProxyError::invalid("peer closed during handshake")
        } else {
            ProxyError::Io(err)
        }
    }

    /// Normal ways for a session to end.
    pub fn is_termination(&self) -> bool {
        match self {
            ProxyError::PeerClosed | ProxyError::ShutdownRequested => true,
            _ => false,
        }
    }
}


#[derive(Debug, Error)]
#[error("unknown protocol `{0}`, expected `socks4` or `http`")]
pub struct UnknownProtocol(pub String);
