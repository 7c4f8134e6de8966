//! A loopback TCP relay for protocol tests. Clients open a tunnel with
//! either a SOCKS4 or an HTTP CONNECT handshake; after the reply the
//! proxy forwards bytes untouched in both directions.

#[macro_use]
extern crate log;

#[macro_use]
extern crate num_derive;

pub mod error;
pub mod handshake;
pub mod socks;
pub mod http;
pub mod conn;
pub mod relay;
pub mod listener;

pub use error::{ProxyError, Result, UnknownProtocol};
pub use handshake::{Protocol, Target};
pub use listener::Proxy;

pub struct Config {
    pub port: u16,
    pub protocol: Protocol,
}

/// Starts a proxy on `127.0.0.1:cfg.port`. It runs until the returned
/// handle is terminated or dropped.
pub fn run(cfg: Config) -> Result<Proxy> {
    Proxy::start(cfg)
}
