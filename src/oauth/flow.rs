//! OAuth2 authorization-code flow with PKCE
//!
//! Drives the authorization and refresh cycle for one server at a time.
//! The flow has three moving parts:
//!
//! 1. [`OAuthFlow::start`] generates the PKCE pair and state nonce and
//!    returns the authorization URL; the observer is expected to open it
//!    in a browser (the local redirect listener itself is the embedding
//!    application's concern).
//! 2. [`OAuthFlow::wait_token`] suspends until the redirect parameters
//!    are delivered, an explicit cancel is issued, or the optional
//!    timeout elapses. Each outcome is distinct. On delivery the `state`
//!    nonce is validated before any token-endpoint traffic: it is the
//!    CSRF defense for the flow.
//! 3. [`OAuthFlow::deliver_callback`] / [`OAuthFlow::cancel`] resolve
//!    the suspension from the listener or the UI.
//!
//! Only one flow may be pending per server: a second [`OAuthFlow::start`]
//! is rejected with [`PeregrineError::AuthorizationPending`] rather than
//! superseding the first, so two flows can never race on one token
//! store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::oneshot;
use url::Url;

use crate::error::{PeregrineError, Result};
use crate::http::HttpClient;
use crate::oauth::pkce;
use crate::oauth::token::TokenSet;

/// OAuth scope requested from the VPN portal.
const SCOPE: &str = "config";

// ---------------------------------------------------------------------------
// Callback plumbing
// ---------------------------------------------------------------------------

/// How a pending authorization wait was resolved.
#[derive(Debug)]
enum CallbackOutcome {
    /// The redirect listener delivered its query parameters.
    Delivered(HashMap<String, String>),
    /// The flow was canceled before the redirect arrived.
    Canceled,
}

/// State held between `start` and the end of `wait_token`.
struct AuthSession {
    state: String,
    verifier: String,
    tx: Option<oneshot::Sender<CallbackOutcome>>,
    rx: Option<oneshot::Receiver<CallbackOutcome>>,
}

// ---------------------------------------------------------------------------
// Token endpoint response
// ---------------------------------------------------------------------------

/// Raw JSON response from the portal's token endpoint.
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl TokenResponse {
    /// Converts `expires_in` seconds into an absolute expiry instant.
    fn into_token_set(self) -> TokenSet {
        let expires_at = self.expires_in.map(|secs| {
            chrono::Utc::now()
                + chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
        });
        TokenSet {
            access: self.access_token,
            refresh: self.refresh_token,
            expires_at,
        }
    }
}

// ---------------------------------------------------------------------------
// OAuthFlow
// ---------------------------------------------------------------------------

/// The authorization/refresh flow for one server.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use peregrine::http::HttpClient;
/// use peregrine::oauth::OAuthFlow;
///
/// # async fn example() -> peregrine::error::Result<()> {
/// let flow = OAuthFlow::new(
///     HttpClient::new(),
///     "org.peregrine.app.linux",
///     "http://127.0.0.1:8000/callback",
/// );
///
/// let url = flow.start("https://vpn.example.org/oauth/authorize")?;
/// // ... hand `url` to the browser; the redirect listener calls:
/// //     flow.deliver_callback(params)
/// let tokens = flow
///     .wait_token("https://vpn.example.org/oauth/token", None)
///     .await?;
/// println!("access token: {}", tokens.access);
/// # Ok(())
/// # }
/// ```
pub struct OAuthFlow {
    http: HttpClient,
    client_id: String,
    redirect_uri: String,
    session: Mutex<Option<AuthSession>>,
}

impl OAuthFlow {
    /// Creates a flow for the given client identity and redirect URI.
    pub fn new(
        http: HttpClient,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            session: Mutex::new(None),
        }
    }

    /// Returns `true` while an authorization is awaiting its callback.
    pub fn is_pending(&self) -> bool {
        self.session.lock().expect("oauth session lock poisoned").is_some()
    }

    /// Begins a new authorization and returns the URL to open in the
    /// user's browser.
    ///
    /// Generates a fresh PKCE pair and a 16-byte base64url state nonce,
    /// and records them for the callback validation in
    /// [`Self::wait_token`].
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::AuthorizationPending`] when a flow is
    /// already awaiting its callback for this server.
    pub fn start(&self, authorization_endpoint: &str) -> Result<String> {
        let mut session = self.session.lock().expect("oauth session lock poisoned");
        if let Some(existing) = session.as_ref() {
            // A canceled session nobody ever waited on is dead and may
            // be replaced; anything else is a live flow.
            let canceled_without_waiter = existing.tx.is_none() && existing.rx.is_some();
            if !canceled_without_waiter {
                return Err(PeregrineError::AuthorizationPending.into());
            }
        }

        let challenge = pkce::generate();
        let state = generate_state();
        let (tx, rx) = oneshot::channel();

        let mut url = Url::parse(authorization_endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", &self.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("scope", SCOPE);
            query.append_pair("state", &state);
            query.append_pair("code_challenge_method", challenge.method);
            query.append_pair("code_challenge", &challenge.challenge);
        }

        *session = Some(AuthSession {
            state,
            verifier: challenge.verifier,
            tx: Some(tx),
            rx: Some(rx),
        });

        Ok(url.to_string())
    }

    /// Delivers the redirect callback's query parameters to the waiting
    /// flow.
    ///
    /// Called by the embedding application's redirect listener. The
    /// parameters are validated inside [`Self::wait_token`], not here.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::NoAuthorizationPending`] when no flow
    /// is waiting.
    pub fn deliver_callback(&self, parameters: HashMap<String, String>) -> Result<()> {
        let mut session = self.session.lock().expect("oauth session lock poisoned");
        let tx = session
            .as_mut()
            .and_then(|s| s.tx.take())
            .ok_or(PeregrineError::NoAuthorizationPending)?;
        // The receiver can only be gone when the wait already resolved;
        // the callback is then simply late.
        let _ = tx.send(CallbackOutcome::Delivered(parameters));
        Ok(())
    }

    /// Cancels the pending authorization.
    ///
    /// Unblocks a task suspended in [`Self::wait_token`] with the
    /// distinct [`PeregrineError::AuthorizationCanceled`] outcome. When
    /// no task is waiting yet the outcome is buffered, so a wait that
    /// races with the cancel still resolves as canceled. Calling cancel
    /// twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::NoAuthorizationPending`] when no flow
    /// is pending.
    pub fn cancel(&self) -> Result<()> {
        let mut session = self.session.lock().expect("oauth session lock poisoned");
        let current = session
            .as_mut()
            .ok_or(PeregrineError::NoAuthorizationPending)?;
        if let Some(tx) = current.tx.take() {
            // Send fails only when the waiter already resolved; the
            // outcome is then irrelevant.
            let _ = tx.send(CallbackOutcome::Canceled);
        }
        Ok(())
    }

    /// Suspends until the callback is delivered, the flow is canceled,
    /// or `timeout` elapses, then validates the parameters and exchanges
    /// the authorization code for tokens.
    ///
    /// Validation order:
    ///
    /// 1. `code` present, else `CallbackParameter { parameter: "code" }`;
    /// 2. `state` present, else `CallbackParameter { parameter: "state" }`;
    /// 3. `state` equals the generated nonce, else `CallbackStateMatch`.
    ///
    /// The state check runs before any token-endpoint traffic on every
    /// callback. Whatever the outcome, the pending session is cleared:
    /// a failed attempt must be restarted from [`Self::start`].
    ///
    /// # Errors
    ///
    /// - [`PeregrineError::NoAuthorizationPending`] without a prior
    ///   [`Self::start`];
    /// - [`PeregrineError::AuthorizationCanceled`] after [`Self::cancel`];
    /// - [`PeregrineError::AuthorizationTimedOut`] when `timeout` elapses;
    /// - the callback validation errors above;
    /// - [`PeregrineError::Status`] when the token endpoint rejects the
    ///   exchange.
    pub async fn wait_token(
        &self,
        token_endpoint: &str,
        timeout: Option<Duration>,
    ) -> Result<TokenSet> {
        let (rx, expected_state, verifier) = {
            let mut session = self.session.lock().expect("oauth session lock poisoned");
            let current = session
                .as_mut()
                .ok_or(PeregrineError::NoAuthorizationPending)?;
            let rx = current.rx.take().ok_or_else(|| {
                PeregrineError::Internal("authorization wait already in progress".to_string())
            })?;
            (rx, current.state.clone(), current.verifier.clone())
        };

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    self.clear_session();
                    return Err(PeregrineError::AuthorizationTimedOut.into());
                }
            },
            None => rx.await,
        };

        // The attempt is finished one way or another; the caller must
        // restart from `start` on failure.
        self.clear_session();

        let parameters = match received {
            Ok(CallbackOutcome::Delivered(parameters)) => parameters,
            Ok(CallbackOutcome::Canceled) | Err(_) => {
                return Err(PeregrineError::AuthorizationCanceled.into())
            }
        };

        let code = parameters
            .get("code")
            .ok_or_else(|| PeregrineError::CallbackParameter {
                parameter: "code".to_string(),
            })?;
        let callback_state =
            parameters
                .get("state")
                .ok_or_else(|| PeregrineError::CallbackParameter {
                    parameter: "state".to_string(),
                })?;
        if *callback_state != expected_state {
            return Err(PeregrineError::CallbackStateMatch.into());
        }

        self.exchange_code(token_endpoint, code, &verifier).await
    }

    /// Exchanges an authorization code (plus PKCE verifier) for tokens.
    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        verifier: &str,
    ) -> Result<TokenSet> {
        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("client_id", &self.client_id);
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("code_verifier", verifier);
        form.insert("redirect_uri", &self.redirect_uri);

        let body = self
            .http
            .post_form(token_endpoint, &form, &Default::default())
            .await?
            .into_success()?;
        let raw: TokenResponse =
            serde_json::from_slice(&body).map_err(PeregrineError::Serialization)?;
        Ok(raw.into_token_set())
    }

    /// Exchanges a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::Status`] when the portal rejects the
    /// refresh token (expired or revoked) and a serialization error when
    /// the response cannot be parsed.
    pub async fn refresh(&self, token_endpoint: &str, refresh_token: &str) -> Result<TokenSet> {
        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("client_id", &self.client_id);
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);

        let body = self
            .http
            .post_form(token_endpoint, &form, &Default::default())
            .await?
            .into_success()?;
        let raw: TokenResponse =
            serde_json::from_slice(&body).map_err(PeregrineError::Serialization)?;
        Ok(raw.into_token_set())
    }

    fn clear_session(&self) {
        *self.session.lock().expect("oauth session lock poisoned") = None;
    }
}

impl std::fmt::Debug for OAuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthFlow")
            .field("client_id", &self.client_id)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

/// Generates the CSRF state nonce: 16 random bytes, base64url encoded
/// without padding.
fn generate_state() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_flow() -> OAuthFlow {
        OAuthFlow::new(
            HttpClient::new(),
            "org.peregrine.app.linux",
            "http://127.0.0.1:8000/callback",
        )
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn state_from_url(url: &str) -> String {
        let parsed = Url::parse(url).unwrap();
        parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("authorization URL must carry state")
    }

    // -----------------------------------------------------------------------
    // start()
    // -----------------------------------------------------------------------

    #[test]
    fn test_start_builds_authorization_url_with_required_parameters() {
        let flow = make_flow();
        let url = flow
            .start("https://vpn.example.org/oauth/authorize")
            .unwrap();

        assert!(url.starts_with("https://vpn.example.org/oauth/authorize?"));
        assert!(url.contains("client_id=org.peregrine.app.linux"), "{url}");
        assert!(url.contains("response_type=code"), "{url}");
        assert!(url.contains("scope=config"), "{url}");
        assert!(url.contains("state="), "{url}");
        assert!(url.contains("code_challenge="), "{url}");
        assert!(url.contains("code_challenge_method=S256"), "{url}");
        assert!(url.contains("redirect_uri="), "{url}");
    }

    #[test]
    fn test_start_twice_is_rejected_not_superseded() {
        let flow = make_flow();
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();

        let err = flow
            .start("https://vpn.example.org/oauth/authorize")
            .unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        assert!(matches!(err, PeregrineError::AuthorizationPending));
    }

    #[test]
    fn test_start_allowed_again_after_cancel() {
        let flow = make_flow();
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();
        flow.cancel().unwrap();
        assert!(flow
            .start("https://vpn.example.org/oauth/authorize")
            .is_ok());
    }

    // -----------------------------------------------------------------------
    // deliver_callback() / cancel() without a pending flow
    // -----------------------------------------------------------------------

    #[test]
    fn test_deliver_without_pending_flow_is_an_error() {
        let flow = make_flow();
        let err = flow.deliver_callback(params(&[])).unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        assert!(matches!(err, PeregrineError::NoAuthorizationPending));
    }

    #[test]
    fn test_cancel_without_pending_flow_is_an_error() {
        let flow = make_flow();
        let err = flow.cancel().unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        assert!(matches!(err, PeregrineError::NoAuthorizationPending));
    }

    // -----------------------------------------------------------------------
    // wait_token(): callback validation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_callback_without_code_fails_with_parameter_error() {
        let flow = make_flow();
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();
        flow.deliver_callback(params(&[])).unwrap();

        let err = flow
            .wait_token("https://vpn.example.org/oauth/token", None)
            .await
            .unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        match err {
            PeregrineError::CallbackParameter { parameter } => assert_eq!(parameter, "code"),
            other => panic!("expected CallbackParameter, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_callback_without_state_fails_with_parameter_error() {
        let flow = make_flow();
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();
        flow.deliver_callback(params(&[("code", "42")])).unwrap();

        let err = flow
            .wait_token("https://vpn.example.org/oauth/token", None)
            .await
            .unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        match err {
            PeregrineError::CallbackParameter { parameter } => assert_eq!(parameter, "state"),
            other => panic!("expected CallbackParameter, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_callback_with_mismatched_state_fails_with_state_match_error() {
        let flow = make_flow();
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();
        flow.deliver_callback(params(&[("code", "42"), ("state", "21")]))
            .unwrap();

        let err = flow
            .wait_token("https://vpn.example.org/oauth/token", None)
            .await
            .unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        assert!(matches!(err, PeregrineError::CallbackStateMatch));
    }

    #[tokio::test]
    async fn test_failed_callback_clears_session_for_restart() {
        let flow = make_flow();
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();
        flow.deliver_callback(params(&[])).unwrap();
        let _ = flow
            .wait_token("https://vpn.example.org/oauth/token", None)
            .await;

        assert!(!flow.is_pending(), "failed attempt must clear the session");
        assert!(flow
            .start("https://vpn.example.org/oauth/authorize")
            .is_ok());
    }

    // -----------------------------------------------------------------------
    // wait_token(): cancel and timeout
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_unblocks_wait_with_canceled_outcome() {
        let flow = std::sync::Arc::new(make_flow());
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();

        let waiter = std::sync::Arc::clone(&flow);
        let handle = tokio::spawn(async move {
            waiter
                .wait_token("https://vpn.example.org/oauth/token", None)
                .await
        });

        // Let the waiter reach its suspension point, then cancel.
        tokio::time::sleep(Duration::from_millis(20)).await;
        flow.cancel().unwrap();

        let err = handle.await.unwrap().unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        assert!(matches!(err, PeregrineError::AuthorizationCanceled));
        assert!(!flow.is_pending());
    }

    #[tokio::test]
    async fn test_wait_token_times_out_with_distinct_error() {
        let flow = make_flow();
        flow.start("https://vpn.example.org/oauth/authorize").unwrap();

        let err = flow
            .wait_token(
                "https://vpn.example.org/oauth/token",
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        assert!(matches!(err, PeregrineError::AuthorizationTimedOut));
        assert!(!flow.is_pending(), "timeout must clear the session");
    }

    #[tokio::test]
    async fn test_wait_token_without_start_is_an_error() {
        let flow = make_flow();
        let err = flow
            .wait_token("https://vpn.example.org/oauth/token", None)
            .await
            .unwrap_err();
        let err = err.downcast::<PeregrineError>().expect("typed error");
        assert!(matches!(err, PeregrineError::NoAuthorizationPending));
    }

    // -----------------------------------------------------------------------
    // State nonce
    // -----------------------------------------------------------------------

    #[test]
    fn test_generate_state_is_unique_and_urlsafe() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_authorization_url_state_matches_session() {
        // The state embedded in the URL is the one the callback must echo.
        let flow = make_flow();
        let url = flow
            .start("https://vpn.example.org/oauth/authorize")
            .unwrap();
        let state = state_from_url(&url);
        assert_eq!(state.len(), 22, "16 bytes base64url is 22 chars");
    }

    // -----------------------------------------------------------------------
    // TokenResponse conversion
    // -----------------------------------------------------------------------

    #[test]
    fn test_token_response_sets_expiry_from_expires_in() {
        let raw = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(3600),
        };
        let tokens = raw.into_token_set();
        assert!(tokens.expires_at.is_some());
        assert!(!tokens.is_expired());
    }

    #[test]
    fn test_token_response_without_expiry() {
        let raw = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: None,
        };
        let tokens = raw.into_token_set();
        assert!(tokens.expires_at.is_none());
    }
}
