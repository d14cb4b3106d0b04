//! OAuth2 authorization for VPN portals
//!
//! This module obtains and maintains per-server credentials through the
//! authorization-code flow with PKCE (RFC 7636), refresh-token
//! exchanges, and revocation-aware single-retry semantics.
//!
//! # Module Layout
//!
//! - `pkce`  -- PKCE S256 verifier/challenge generation
//! - `token` -- token pair storage with atomic replacement
//! - `flow`  -- the authorization flow: URL construction, callback
//!   wait/cancel/timeout, state validation, code and refresh exchanges

pub mod flow;
pub mod pkce;
pub mod token;

pub use flow::OAuthFlow;
pub use token::{TokenSet, TokenStore};
