//! HTTP CONNECT tunnelling.

pub mod data;
