//! Purpose: Blocking client for the Realplexor publish/notify broker.
//! Exports: `api` (client, config, transport, value types) and `core` (wire codec).
//! Role: Builds one pseudo-HTTP request per call and validates the broker's reply.
//! Invariants: Identifiers are namespaced on the way out and stripped on the way in.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;

pub use api::{Client, Config, Error, ErrorKind};
