//! Purpose: Define the public Rust API boundary for the broker client.
//! Exports: `Client`, `Config`, transport traits, and the protocol value types.
//! Role: Stable surface; core parsing/encoding helpers stay reachable via `core`.
//! Invariants: Every public operation returns `Result<_, Error>`; no global state.

mod client;
mod config;
pub mod transport;

pub use crate::core::charset::Charset;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::lines::{OnlineCounts, OnlineRecord, WatchBatch, WatchEvent};
pub use crate::core::request::{Target, Targets};
pub use client::Client;
pub use config::{Config, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT, TLS_PORT};
pub use transport::{Connection, Endpoint, TcpConnection, TcpTransport, Transport};
