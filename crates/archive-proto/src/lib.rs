//! Types shared between the archive engine, the daemon and its clients.

pub mod config;
pub mod platform;
pub mod protocol;
