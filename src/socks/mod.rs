//! SOCKS4 CONNECT, the reduced form spoken by the test fixtures.

pub mod data;
