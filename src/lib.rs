//! Peregrine - VPN client connection-orchestration core
//!
//! This library is the shared core of the Peregrine multi-platform VPN
//! client. It decides, independent of any GUI, when a server may be
//! connected to, drives the OAuth2 authorization needed to talk to that
//! server, and keeps a verified, freshness-bounded catalog of available
//! servers and organizations. Surrounding apps are thin consumers that
//! render the reported state and forward user choices back in.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `fsm`: the finite state machine governing allowed client operations
//! - `oauth`: authorization-code + PKCE flow, refresh, token storage
//! - `discovery`: signed server/organization catalogs with freshness
//!   bounds and graceful degradation
//! - `server`: per-server portal endpoints, profiles, authenticated API
//! - `client`: the top-level façade composing all of the above
//! - `http`: thin HTTP transport shared by all network traffic
//! - `config`: on-disk snapshot persistence
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition for the diagnostic binary
//!
//! # Example
//!
//! ```no_run
//! use peregrine::client::Client;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::new(
//!         "org.peregrine.app.linux",
//!         "/home/user/.config/peregrine",
//!         "en",
//!         Box::new(|from, to, _payload| println!("{from} -> {to}")),
//!     )?;
//!     client.register().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fsm;
pub mod http;
pub mod oauth;
pub mod server;

// Re-export commonly used types
pub use client::{Client, ClientSnapshot, ConnectOutcome};
pub use error::{PeregrineError, Result};
pub use fsm::{Fsm, FsmState, TransitionPayload};
pub use server::{Profile, Server, ServerType, Servers, VpnConfig, VpnProtocol};
