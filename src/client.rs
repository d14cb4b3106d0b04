//! Top-level client façade
//!
//! [`Client`] composes the FSM, the discovery store, and the per-server
//! token stores and OAuth flows into the operations external callers
//! invoke: register, discovery getters, connect, profile selection, and
//! deregister.
//!
//! Every method takes `&self`: the embedding application wraps the
//! client in an `Arc`, serializes its calls into one logical flow, and
//! may call [`Client::deliver_oauth_callback`] and
//! [`Client::cancel_oauth`] from other tasks while a connect is
//! suspended in the OAuth callback wait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::discovery::{
    CatalogOutcome, DiscoveryOrganizations, DiscoveryServers, DiscoveryStore,
};
use crate::error::{PeregrineError, Result};
use crate::fsm::{Fsm, FsmState, Observer, TransitionPayload};
use crate::http::HttpClient;
use crate::oauth::OAuthFlow;
use crate::server::{Profile, ServerType, Servers, VpnConfig};

/// Client identity prefix of the "Let's Connect!" branding.
///
/// Let's Connect! clients connect to self-managed servers only and are
/// not allowed to use discovery.
pub const LETS_CONNECT_PREFIX: &str = "org.letsconnect-vpn.app";

/// Redirect URI the portal sends the OAuth callback to. The local
/// listener behind it is the embedding application's concern.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8000/callback";

// ---------------------------------------------------------------------------
// ClientSnapshot
// ---------------------------------------------------------------------------

/// The serializable snapshot persisted at deregister time and restored
/// at register time.
///
/// Restoring populates the servers and discovery catalogs but never the
/// FSM, which always restarts in [`FsmState::Deregistered`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClientSnapshot {
    /// Every known server, including tokens and cached endpoints.
    pub servers: Servers,
    /// The organizations catalog with version and timestamp.
    pub organizations: DiscoveryOrganizations,
    /// The servers catalog with version and timestamp.
    pub discovery_servers: DiscoveryServers,
}

// ---------------------------------------------------------------------------
// ConnectOutcome
// ---------------------------------------------------------------------------

/// Result of [`Client::connect_to_server`].
#[derive(Debug)]
pub enum ConnectOutcome {
    /// The server offers one profile; its configuration was fetched.
    Config(VpnConfig),
    /// The server offers several profiles; the FSM is in
    /// [`FsmState::AskProfile`] and the caller must resume with
    /// [`Client::select_profile`].
    ProfileRequired(Vec<Profile>),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The main entry point of the core.
///
/// # Examples
///
/// ```no_run
/// use peregrine::client::Client;
///
/// # async fn example() -> peregrine::error::Result<()> {
/// let client = Client::new(
///     "org.peregrine.app.linux",
///     "/home/user/.config/peregrine",
///     "en",
///     Box::new(|from, to, _payload| println!("{from} -> {to}")),
/// )?;
/// client.register().await?;
/// let servers = client.get_disco_servers().await?;
/// println!("{} servers known", servers.catalog.list.len());
/// client.deregister().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    name: String,
    language: String,
    redirect_uri: String,
    http: HttpClient,
    fsm: Fsm,
    config: Config,
    discovery: tokio::sync::Mutex<DiscoveryStore>,
    servers: tokio::sync::RwLock<Servers>,
    flows: std::sync::Mutex<HashMap<String, Arc<OAuthFlow>>>,
}

impl Client {
    /// Creates an unregistered client.
    ///
    /// # Arguments
    ///
    /// * `name` - The client identity, also used as the OAuth
    ///   `client_id` (e.g. `org.peregrine.app.linux`).
    /// * `directory` - Where the state snapshot is stored.
    /// * `language` - Preferred UI language, kept for the embedding
    ///   application's display-name selection. Not persisted.
    /// * `observer` - FSM observer, registered once; invoked
    ///   synchronously on the calling thread for every transition.
    ///
    /// # Errors
    ///
    /// Returns a verification error when the compiled-in discovery keys
    /// fail to decode.
    pub fn new(
        name: impl Into<String>,
        directory: impl AsRef<Path>,
        language: impl Into<String>,
        observer: Observer,
    ) -> Result<Self> {
        let http = HttpClient::new();
        let discovery = DiscoveryStore::with_defaults(http.clone())?;
        Ok(Self {
            name: name.into(),
            language: language.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            http: http.clone(),
            fsm: Fsm::new(observer),
            config: Config::new(directory, "state"),
            discovery: tokio::sync::Mutex::new(discovery),
            servers: tokio::sync::RwLock::new(Servers::new()),
            flows: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the discovery store, e.g. to point at a different
    /// discovery service or inject an embedded snapshot.
    pub fn with_discovery_store(mut self, store: DiscoveryStore) -> Self {
        self.discovery = tokio::sync::Mutex::new(store);
        self
    }

    /// Replaces the OAuth redirect URI.
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    /// The client identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The preferred UI language.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// The current FSM state.
    pub fn current_state(&self) -> FsmState {
        self.fsm.current_state()
    }

    /// Whether the client identity carries the Let's Connect! branding.
    fn is_lets_connect(&self) -> bool {
        self.name.starts_with(LETS_CONNECT_PREFIX)
    }

    // -----------------------------------------------------------------------
    // Registration lifecycle
    // -----------------------------------------------------------------------

    /// Registers the client: loads the persisted snapshot, pre-warms the
    /// discovery catalogs, and lands in [`FsmState::NoServer`] with the
    /// restored servers as payload.
    ///
    /// Discovery failures during pre-warm are logged, not fatal; Let's
    /// Connect! clients skip the pre-warm entirely.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::WrongFsmState`] when the client is not
    /// in [`FsmState::Deregistered`].
    pub async fn register(&self) -> Result<()> {
        if !self.fsm.in_state(FsmState::Deregistered) {
            return Err(PeregrineError::WrongFsmState {
                expected: FsmState::Deregistered.to_string(),
                actual: self.fsm.current_state().to_string(),
            }
            .into());
        }

        match self.config.load::<ClientSnapshot>() {
            Ok(Some(snapshot)) => {
                *self.servers.write().await = snapshot.servers;
                self.discovery
                    .lock()
                    .await
                    .restore(snapshot.organizations, snapshot.discovery_servers);
            }
            Ok(None) => tracing::info!("previous configuration not found"),
            Err(e) => tracing::warn!("failed loading previous configuration: {e:#}"),
        }

        if !self.is_lets_connect() {
            let mut discovery = self.discovery.lock().await;
            let servers = discovery.servers().await;
            if let Some(e) = servers.error {
                tracing::warn!("failed to get discovery servers: {e:#}");
            }
            let organizations = discovery.organizations().await;
            if let Some(e) = organizations.error {
                tracing::warn!("failed to get discovery organizations: {e:#}");
            }
        }

        let infos = self.servers.read().await.infos();
        self.fsm
            .transition_with(FsmState::NoServer, TransitionPayload::Servers(infos), true);
        Ok(())
    }

    /// Deregisters the client: saves the snapshot, clears all in-memory
    /// state, and force-transitions to [`FsmState::Deregistered`].
    pub async fn deregister(&self) {
        let snapshot = self.snapshot().await;
        if let Err(e) = self.config.save(&snapshot) {
            tracing::info!("failed saving configuration: {e:#}");
        }

        *self.servers.write().await = Servers::new();
        self.discovery
            .lock()
            .await
            .restore(DiscoveryOrganizations::default(), DiscoveryServers::default());
        self.flows.lock().expect("flows lock poisoned").clear();

        self.fsm
            .transition_with(FsmState::Deregistered, TransitionPayload::None, true);
    }

    /// The serializable snapshot of the current state.
    pub async fn snapshot(&self) -> ClientSnapshot {
        let (organizations, discovery_servers) = self.discovery.lock().await.snapshot();
        ClientSnapshot {
            servers: self.servers.read().await.clone(),
            organizations,
            discovery_servers,
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Returns the discovery organizations catalog.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::DiscoveryNotSupported`] for Let's
    /// Connect! clients, without attempting a network call. Fetch
    /// failures degrade inside the returned [`CatalogOutcome`].
    pub async fn get_disco_organizations(
        &self,
    ) -> Result<CatalogOutcome<DiscoveryOrganizations>> {
        if self.is_lets_connect() {
            return Err(PeregrineError::DiscoveryNotSupported.into());
        }
        Ok(self.discovery.lock().await.organizations().await)
    }

    /// Returns the discovery servers catalog.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::DiscoveryNotSupported`] for Let's
    /// Connect! clients, without attempting a network call. Fetch
    /// failures degrade inside the returned [`CatalogOutcome`].
    pub async fn get_disco_servers(&self) -> Result<CatalogOutcome<DiscoveryServers>> {
        if self.is_lets_connect() {
            return Err(PeregrineError::DiscoveryNotSupported.into());
        }
        Ok(self.discovery.lock().await.servers().await)
    }

    /// Marks the organizations catalog expired so the next access
    /// refetches, used when a previously chosen organization ID is no
    /// longer present.
    pub async fn expire_organizations(&self) {
        self.discovery.lock().await.mark_organizations_expired();
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    /// Connects to a server: ensures it is known, discovers its
    /// endpoints, obtains authorization (running the OAuth flow when no
    /// valid tokens are stored), and fetches the profile list.
    ///
    /// With a single profile the VPN configuration is fetched directly
    /// and returned as [`ConnectOutcome::Config`]. With several, the FSM
    /// transitions to [`FsmState::AskProfile`] carrying the list and the
    /// caller resumes with [`Client::select_profile`].
    ///
    /// `timeout` bounds the OAuth callback wait; `None` waits until the
    /// callback is delivered or [`Client::cancel_oauth`] is called.
    pub async fn connect_to_server(
        &self,
        base_url: &str,
        server_type: ServerType,
        timeout: Option<Duration>,
    ) -> Result<ConnectOutcome> {
        // Carry the discovery display name onto the server record when
        // the catalog knows it.
        let display_name = {
            let discovery = self.discovery.lock().await;
            discovery
                .server_by_url(base_url, server_type)
                .ok()
                .map(|srv| srv.display_name.clone())
        };

        {
            let mut servers = self.servers.write().await;
            let server = servers.ensure(base_url, server_type);
            if let Some(name) = display_name {
                server.display_name = name;
            }
            servers.set_current(base_url, server_type)?;
        }
        self.fsm.transition(
            FsmState::ChosenServer,
            TransitionPayload::Message(base_url.to_string()),
        );

        let endpoints = {
            let mut servers = self.servers.write().await;
            let server = servers
                .get_mut(base_url, server_type)
                .expect("server was just ensured");
            server.ensure_endpoints(&self.http).await?
        };

        let flow = self.flow_handle(base_url, server_type);

        let has_valid_tokens = {
            let servers = self.servers.read().await;
            servers
                .get(base_url, server_type)
                .and_then(|srv| srv.tokens.valid_access_token())
                .is_some()
        };

        if has_valid_tokens {
            self.fsm
                .transition(FsmState::Authorized, TransitionPayload::None);
        } else {
            let url = flow.start(&endpoints.authorization_endpoint)?;
            self.fsm.transition(
                FsmState::OAuthStarted,
                TransitionPayload::AuthorizationUrl(url),
            );
            match flow.wait_token(&endpoints.token_endpoint, timeout).await {
                Ok(tokens) => {
                    let servers = self.servers.read().await;
                    if let Some(server) = servers.get(base_url, server_type) {
                        server.tokens.set(tokens);
                    }
                    self.fsm
                        .transition(FsmState::Authorized, TransitionPayload::None);
                }
                Err(e) => {
                    // Back to the pre-flow state; the user must restart.
                    self.fsm
                        .transition(FsmState::ChosenServer, TransitionPayload::None);
                    return Err(e);
                }
            }
        }

        let profiles = {
            let mut servers = self.servers.write().await;
            let server = servers
                .get_mut(base_url, server_type)
                .expect("server was just ensured");
            server.fetch_profiles(&self.http, &flow).await?
        };

        match profiles.len() {
            0 => Err(PeregrineError::Portal(format!(
                "{base_url}: server offers no VPN profiles"
            ))
            .into()),
            1 => {
                self.fsm
                    .transition(FsmState::RequestConfig, TransitionPayload::None);
                let config = {
                    let servers = self.servers.read().await;
                    let server = servers
                        .get(base_url, server_type)
                        .expect("server was just ensured");
                    server
                        .connect(&self.http, &flow, &profiles[0].profile_id)
                        .await?
                };
                self.fsm
                    .transition(FsmState::Disconnected, TransitionPayload::None);
                Ok(ConnectOutcome::Config(config))
            }
            _ => {
                self.fsm
                    .transition(FsmState::RequestConfig, TransitionPayload::None);
                self.fsm.transition(
                    FsmState::AskProfile,
                    TransitionPayload::Profiles(profiles.clone()),
                );
                Ok(ConnectOutcome::ProfileRequired(profiles))
            }
        }
    }

    /// Resumes a pending profile choice: fetches the configuration for
    /// the selected profile of the current server.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::WrongFsmState`] when no profile choice
    /// is pending and [`PeregrineError::ProfileNotFound`] when the ID is
    /// not among the offered profiles.
    pub async fn select_profile(&self, profile_id: &str) -> Result<VpnConfig> {
        if !self.fsm.in_state(FsmState::AskProfile) {
            return Err(PeregrineError::WrongFsmState {
                expected: FsmState::AskProfile.to_string(),
                actual: self.fsm.current_state().to_string(),
            }
            .into());
        }

        let (base_url, server_type) = {
            let servers = self.servers.read().await;
            let current = servers.current_server()?;
            if current.find_profile(profile_id).is_none() {
                return Err(PeregrineError::ProfileNotFound(profile_id.to_string()).into());
            }
            (current.base_url.clone(), current.server_type)
        };
        let flow = self.flow_handle(&base_url, server_type);

        self.fsm
            .transition(FsmState::RequestConfig, TransitionPayload::None);
        let config = {
            let servers = self.servers.read().await;
            let server = servers.current_server()?;
            server.connect(&self.http, &flow, profile_id).await?
        };
        self.fsm
            .transition(FsmState::Disconnected, TransitionPayload::None);
        Ok(config)
    }

    // -----------------------------------------------------------------------
    // OAuth callback plumbing
    // -----------------------------------------------------------------------

    /// Delivers the redirect parameters from the embedding application's
    /// local listener to the pending OAuth flow of the current server.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::NoAuthorizationPending`] when no flow
    /// is waiting.
    pub async fn deliver_oauth_callback(
        &self,
        parameters: HashMap<String, String>,
    ) -> Result<()> {
        self.current_flow().await?.deliver_callback(parameters)
    }

    /// Cancels the pending OAuth flow, unblocking a suspended
    /// [`Client::connect_to_server`] with the canceled outcome.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::NoAuthorizationPending`] when no flow
    /// is waiting.
    pub async fn cancel_oauth(&self) -> Result<()> {
        self.current_flow().await?.cancel()
    }

    /// The OAuth flow of the currently chosen server.
    async fn current_flow(&self) -> Result<Arc<OAuthFlow>> {
        let (base_url, server_type) = {
            let servers = self.servers.read().await;
            let current = servers.current_server()?;
            (current.base_url.clone(), current.server_type)
        };
        Ok(self.flow_handle(&base_url, server_type))
    }

    /// Returns (creating on first use) the per-server OAuth flow.
    fn flow_handle(&self, base_url: &str, server_type: ServerType) -> Arc<OAuthFlow> {
        let key = format!("{server_type}|{base_url}");
        let mut flows = self.flows.lock().expect("flows lock poisoned");
        Arc::clone(flows.entry(key).or_insert_with(|| {
            Arc::new(OAuthFlow::new(
                self.http.clone(),
                self.name.clone(),
                self.redirect_uri.clone(),
            ))
        }))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("state", &self.fsm.current_state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
