//! Resilient full-duplex line transport between embedded clients and an
//! always-on server.
//!
//! Both endpoints expose the same surface: a [`Connection`] that sends and
//! receives newline-delimited payloads and survives transport outages.
//! Liveness comes from keepalive frames and a per-side watchdog; delivery
//! guarantees come from message ID envelopes, retransmission across
//! reconnects and receive-side duplicate suppression. Application code
//! never sees an outage as an error, only as a pause.
//!
//! The client end ([`Client`]) dials, identifies itself and redials
//! forever; the server end ([`Server`]) accepts transports and keeps one
//! [`Connection`] per client identity in a [`Registry`], stable across
//! reconnects.

pub mod client;
pub mod config;
pub mod connection;
mod dedup;
pub mod error;
pub mod registry;
pub mod server;

pub use client::{Client, ClientConfig, MAX_IDENTITY};
pub use config::LinkConfig;
pub use connection::{Connection, Transport};
pub use error::{LinkError, Result};
pub use registry::Registry;
pub use server::{Server, ServerConfig};
