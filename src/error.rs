//! Error types for Peregrine
//!
//! This module defines all error types used throughout the core, using
//! `thiserror` for ergonomic error handling. Every failure path in the
//! library returns one of these kinds so that embedding applications can
//! branch UI behavior on the variant rather than on message text.

use thiserror::Error;

use crate::discovery::verify::VerifyError;

/// Main error type for Peregrine operations
///
/// This enum encompasses all possible errors that can occur during
/// client registration, discovery fetches, OAuth authorization, and
/// server API interactions. Variants carry enough context (resource,
/// server, stage) for logging.
#[derive(Error, Debug)]
pub enum PeregrineError {
    /// An operation was attempted in the wrong FSM state
    #[error("operation requires FSM state '{expected}' but the client is in '{actual}'")]
    WrongFsmState {
        /// The state the operation requires
        expected: String,
        /// The state the client was actually in
        actual: String,
    },

    /// Discovery is not available for "Let's Connect!"-branded clients
    #[error("discovery is not supported for the Let's Connect! client")]
    DiscoveryNotSupported,

    /// Discovery document signature verification failed
    #[error("discovery verification failed for '{resource}'")]
    Verification {
        /// The discovery resource that failed verification
        resource: String,
        /// The underlying verification failure
        #[source]
        source: VerifyError,
    },

    /// A freshly fetched discovery document replayed an old version
    #[error("rollback detected for '{resource}': document version {got} does not supersede accepted version {accepted}")]
    RollbackDetected {
        /// The discovery resource being fetched
        resource: String,
        /// Version embedded in the fetched document
        got: u64,
        /// Version of the last accepted document
        accepted: u64,
    },

    /// No discovery server matches the requested base URL and type
    #[error("no server of type '{server_type}' at URL '{base_url}'")]
    ServerNotFound {
        /// The requested server type tag
        server_type: String,
        /// The requested base URL
        base_url: String,
    },

    /// No secure internet server matches the requested country code
    #[error("no server of type 'secure_internet' with country code '{0}'")]
    CountryNotFound(String),

    /// The organization ID is not present in the organizations catalog
    #[error("no secure internet home found in organization '{0}'")]
    OrganizationNotFound(String),

    /// The OAuth redirect callback was missing a required parameter
    #[error("failed callback parameter: '{parameter}' was not present in the redirect")]
    CallbackParameter {
        /// Name of the absent parameter (`code` or `state`)
        parameter: String,
    },

    /// The OAuth redirect callback carried a state that does not match ours
    #[error("failed callback state match: the 'state' parameter does not equal the generated nonce")]
    CallbackStateMatch,

    /// An OAuth flow is already pending for this server
    #[error("an authorization flow is already pending for this server")]
    AuthorizationPending,

    /// No OAuth flow is waiting for a callback
    #[error("no authorization flow is pending for this server")]
    NoAuthorizationPending,

    /// The pending OAuth flow was canceled before the callback arrived
    #[error("the authorization flow was canceled")]
    AuthorizationCanceled,

    /// The pending OAuth flow timed out waiting for the callback
    #[error("the authorization flow timed out waiting for the redirect callback")]
    AuthorizationTimedOut,

    /// Tokens are unusable and the refresh exchange also failed
    #[error("authorization expired for '{0}': refresh failed, re-authorization required")]
    AuthorizationExpired(String),

    /// The requested VPN profile does not exist on the chosen server
    #[error("no profile with ID '{0}' on the chosen server")]
    ProfileNotFound(String),

    /// An operation that needs a chosen server was called without one
    #[error("no server is currently chosen")]
    NoCurrentServer,

    /// The `/.well-known/vpn-user-portal` document is missing or malformed
    #[error("malformed vpn-user-portal document: {0}")]
    Portal(String),

    /// A non-2xx HTTP status was returned for a resource
    #[error("failed obtaining HTTP resource '{url}': unsuccessful status code {status}")]
    Status {
        /// The URL that was requested
        url: String,
        /// The HTTP status code that was returned
        status: u16,
    },

    /// Internal invariant violation (e.g. re-entrant FSM transition)
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL construction errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for Peregrine operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
