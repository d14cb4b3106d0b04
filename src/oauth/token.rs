//! Token pair storage
//!
//! A [`TokenSet`] is the access/refresh pair issued by one authorization
//! session together with its expiry. The [`TokenStore`] replaces the
//! whole pair atomically: a reader never observes an access token paired
//! with the wrong refresh token, and clearing wipes both together.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TokenSet
// ---------------------------------------------------------------------------

/// An access/refresh token pair from one authorization session.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use peregrine::oauth::TokenSet;
///
/// let tokens = TokenSet {
///     access: "access_abc".to_string(),
///     refresh: "refresh_xyz".to_string(),
///     expires_at: Some(Utc::now() + Duration::hours(1)),
/// };
/// assert!(!tokens.is_expired());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// The access token attached to authenticated API calls.
    pub access: String,

    /// The refresh token used to obtain a new pair without re-running
    /// the authorization flow.
    #[serde(default)]
    pub refresh: String,

    /// UTC instant at which the access token expires. `None` means the
    /// server did not report an expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Returns `true` when the access token is expired or about to
    /// expire.
    ///
    /// A 60-second buffer is applied so callers have time to run the
    /// refresh exchange before the portal starts rejecting the token.
    /// Tokens without an expiry are treated as valid.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => Utc::now() >= expires_at - chrono::Duration::seconds(60),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Per-server token storage with atomic replacement.
///
/// Mutated only by the OAuth subsystem. Readers clone a consistent
/// snapshot; a refresh replaces access and refresh tokens under a single
/// update so partial replacement is never observable.
#[derive(Debug, Default)]
pub struct TokenStore {
    inner: RwLock<Option<TokenSet>>,
}

impl TokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored pair atomically.
    pub fn set(&self, tokens: TokenSet) {
        *self.inner.write().expect("token store lock poisoned") = Some(tokens);
    }

    /// Returns a snapshot of the stored pair, if any.
    pub fn get(&self) -> Option<TokenSet> {
        self.inner.read().expect("token store lock poisoned").clone()
    }

    /// Wipes both tokens together.
    pub fn clear(&self) {
        *self.inner.write().expect("token store lock poisoned") = None;
    }

    /// Returns the access token when a non-expired pair is stored.
    pub fn valid_access_token(&self) -> Option<String> {
        self.get()
            .filter(|tokens| !tokens.is_expired())
            .map(|tokens| tokens.access)
    }
}

impl Clone for TokenStore {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.get()),
        }
    }
}

// Serialized as the bare optional pair so the store round-trips through
// the persisted client snapshot.
impl Serialize for TokenStore {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TokenStore {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tokens = Option::<TokenSet>::deserialize(deserializer)?;
        Ok(Self {
            inner: RwLock::new(tokens),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
