//! Discovery store: freshness policy, fetching, degradation, lookups
//!
//! The store owns the organizations and servers catalogs and produces
//! data that is "fresh enough" without over-fetching. When a previous
//! catalog exists the caller is never failed outright: fetch and
//! verification failures return the last good copy together with the
//! error so the UI can display data while the failure is logged.

use chrono::{Duration, Utc};

use crate::discovery::types::{
    DiscoveryOrganization, DiscoveryOrganizations, DiscoveryServer, DiscoveryServers,
};
use crate::discovery::verify::{self, PublicKey, VerifyError};
use crate::error::{PeregrineError, Result};
use crate::http::{join_url, HttpClient};
use crate::server::ServerType;

/// Base URL of the production discovery service.
pub const DISCOVERY_URL: &str = "https://disco.eduvpn.org/v2/";

/// How long a fetched servers catalog stays fresh.
fn servers_fresh_for() -> Duration {
    Duration::hours(1)
}

// ---------------------------------------------------------------------------
// EmbeddedSnapshot
// ---------------------------------------------------------------------------

/// Build-time catalog snapshot used when nothing has ever been fetched.
///
/// Passed explicitly at construction instead of living in process-global
/// state, so each store decides independently whether it has a fallback.
#[derive(Debug, Clone)]
pub struct EmbeddedSnapshot {
    organizations: DiscoveryOrganizations,
    servers: DiscoveryServers,
}

impl EmbeddedSnapshot {
    /// Parses a snapshot from the two embedded JSON documents.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when either document is malformed.
    pub fn from_json(organizations_json: &str, servers_json: &str) -> Result<Self> {
        let organizations: DiscoveryOrganizations = serde_json::from_str(organizations_json)
            .map_err(PeregrineError::Serialization)?;
        let servers: DiscoveryServers =
            serde_json::from_str(servers_json).map_err(PeregrineError::Serialization)?;
        Ok(Self {
            organizations,
            servers,
        })
    }
}

// ---------------------------------------------------------------------------
// CatalogOutcome
// ---------------------------------------------------------------------------

/// A catalog returned together with the error (if any) that forced the
/// store to degrade to cached data.
///
/// `error` is `None` on a fresh fetch or an up-to-date cache hit. When
/// set, `catalog` still holds the best available copy: the previously
/// fetched one, the embedded snapshot, or the empty catalog.
#[derive(Debug)]
pub struct CatalogOutcome<T> {
    /// The best available catalog.
    pub catalog: T,
    /// The failure that prevented a fresh fetch, when there was one.
    pub error: Option<anyhow::Error>,
}

impl<T> CatalogOutcome<T> {
    /// Returns `true` when the catalog is stale because the fetch failed.
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// DiscoveryStore
// ---------------------------------------------------------------------------

/// Owns the discovery catalogs and the freshness policy.
///
/// Freshness rules:
///
/// - organizations are refetched iff the stored timestamp is unset
///   (first access, or after [`DiscoveryStore::mark_organizations_expired`]);
/// - servers are refetched iff the timestamp is unset or more than one
///   hour old.
///
/// # Examples
///
/// ```no_run
/// use peregrine::discovery::DiscoveryStore;
/// use peregrine::http::HttpClient;
///
/// # async fn example() -> peregrine::error::Result<()> {
/// let mut store = DiscoveryStore::with_defaults(HttpClient::new())?;
/// let outcome = store.servers().await;
/// for server in &outcome.catalog.list {
///     println!("{}", server.base_url);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DiscoveryStore {
    http: HttpClient,
    base_url: String,
    keys: Vec<PublicKey>,
    force_prehash: bool,
    organizations: DiscoveryOrganizations,
    servers: DiscoveryServers,
    embedded: Option<EmbeddedSnapshot>,
}

impl DiscoveryStore {
    /// Creates a store against the given discovery base URL with the
    /// given trusted keys and optional embedded snapshot.
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        keys: Vec<PublicKey>,
        embedded: Option<EmbeddedSnapshot>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            keys,
            force_prehash: false,
            organizations: DiscoveryOrganizations::default(),
            servers: DiscoveryServers::default(),
            embedded,
        }
    }

    /// Creates a store against the production discovery service with
    /// the compiled-in trusted keys and no embedded snapshot.
    ///
    /// # Errors
    ///
    /// Returns a verification error when the compiled-in keys fail to
    /// decode.
    pub fn with_defaults(http: HttpClient) -> Result<Self> {
        let keys = PublicKey::default_trusted()
            .map_err(|source| PeregrineError::Verification {
                resource: "trusted keys".to_string(),
                source,
            })?;
        Ok(Self::new(http, DISCOVERY_URL, keys, None))
    }

    // -----------------------------------------------------------------------
    // Freshness policy
    // -----------------------------------------------------------------------

    /// Whether the organizations catalog must be refetched: only when it
    /// has never been fetched or was explicitly expired.
    pub fn needs_organizations_update(&self) -> bool {
        self.organizations.timestamp.is_none()
    }

    /// Whether the servers catalog must be refetched: never fetched, or
    /// fetched more than one hour ago.
    pub fn needs_servers_update(&self) -> bool {
        match self.servers.timestamp {
            None => true,
            Some(fetched_at) => Utc::now() >= fetched_at + servers_fresh_for(),
        }
    }

    /// Resets the organizations timestamp so the next access refetches.
    ///
    /// Used when a previously chosen organization ID is no longer
    /// present in a fresh list, signaling the caller to re-prompt.
    pub fn mark_organizations_expired(&mut self) {
        self.organizations.timestamp = None;
    }

    // -----------------------------------------------------------------------
    // Catalog access
    // -----------------------------------------------------------------------

    /// Returns the organizations catalog, refetching when stale.
    ///
    /// On fetch failure the previous copy (or embedded snapshot, or the
    /// empty catalog) is returned together with the error.
    pub async fn organizations(&mut self) -> CatalogOutcome<DiscoveryOrganizations> {
        if !self.needs_organizations_update() {
            return CatalogOutcome {
                catalog: self.organizations.clone(),
                error: None,
            };
        }
        match self.refresh_organizations().await {
            Ok(()) => CatalogOutcome {
                catalog: self.organizations.clone(),
                error: None,
            },
            Err(e) => {
                tracing::warn!("organizations fetch failed, returning cached copy: {e:#}");
                CatalogOutcome {
                    catalog: self.previous_organizations(),
                    error: Some(e),
                }
            }
        }
    }

    /// Returns the servers catalog, refetching when stale.
    ///
    /// On fetch failure the previous copy (or embedded snapshot, or the
    /// empty catalog) is returned together with the error.
    pub async fn servers(&mut self) -> CatalogOutcome<DiscoveryServers> {
        if !self.needs_servers_update() {
            return CatalogOutcome {
                catalog: self.servers.clone(),
                error: None,
            };
        }
        match self.refresh_servers().await {
            Ok(()) => CatalogOutcome {
                catalog: self.servers.clone(),
                error: None,
            },
            Err(e) => {
                tracing::warn!("servers fetch failed, returning cached copy: {e:#}");
                CatalogOutcome {
                    catalog: self.previous_servers(),
                    error: Some(e),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fetching
    // -----------------------------------------------------------------------

    /// Downloads and verifies one discovery document, returning its body.
    async fn fetch_verified(&self, file: &str, previous_version: u64) -> Result<Vec<u8>> {
        let json_url = join_url(&self.base_url, file)?;
        let body = self.http.get(&json_url).await?.into_success()?;

        let sig_file = format!("{file}.minisig");
        let sig_url = join_url(&self.base_url, &sig_file)?;
        let sig_body = self.http.get(&sig_url).await?.into_success()?;
        let sig_text = String::from_utf8_lossy(&sig_body);

        verify::verify(
            &sig_text,
            &body,
            file,
            previous_version,
            self.force_prehash,
            &self.keys,
        )
        .map_err(|source| match source {
            VerifyError::RolledBack { got, accepted } => PeregrineError::RollbackDetected {
                resource: file.to_string(),
                got,
                accepted,
            },
            other => PeregrineError::Verification {
                resource: file.to_string(),
                source: other,
            },
        })?;

        Ok(body)
    }

    async fn refresh_organizations(&mut self) -> Result<()> {
        let file = "organization_list.json";
        let body = self
            .fetch_verified(file, self.organizations.version)
            .await?;
        let mut parsed: DiscoveryOrganizations =
            serde_json::from_slice(&body).map_err(PeregrineError::Serialization)?;

        // Equal version is only legal for a re-signed unchanged document.
        if parsed.version == self.organizations.version
            && self.organizations.version != 0
            && parsed.list != self.organizations.list
        {
            return Err(PeregrineError::RollbackDetected {
                resource: file.to_string(),
                got: parsed.version,
                accepted: self.organizations.version,
            }
            .into());
        }

        parsed.timestamp = Some(Utc::now());
        self.organizations = parsed;
        Ok(())
    }

    async fn refresh_servers(&mut self) -> Result<()> {
        let file = "server_list.json";
        let body = self.fetch_verified(file, self.servers.version).await?;
        let mut parsed: DiscoveryServers =
            serde_json::from_slice(&body).map_err(PeregrineError::Serialization)?;

        if parsed.version == self.servers.version
            && self.servers.version != 0
            && parsed.list != self.servers.list
        {
            return Err(PeregrineError::RollbackDetected {
                resource: file.to_string(),
                got: parsed.version,
                accepted: self.servers.version,
            }
            .into());
        }

        parsed.timestamp = Some(Utc::now());
        self.servers = parsed;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Degradation
    // -----------------------------------------------------------------------

    /// The last good organizations copy: the stored catalog when one was
    /// ever accepted, else the embedded snapshot, else the empty catalog.
    fn previous_organizations(&mut self) -> DiscoveryOrganizations {
        if self.organizations.version != 0 || self.embedded.is_none() {
            return self.organizations.clone();
        }
        if let Some(embedded) = &self.embedded {
            self.organizations = embedded.organizations.clone();
        }
        self.organizations.clone()
    }

    /// The last good servers copy, with the same precedence as
    /// [`Self::previous_organizations`].
    fn previous_servers(&mut self) -> DiscoveryServers {
        if self.servers.version != 0 || self.embedded.is_none() {
            return self.servers.clone();
        }
        if let Some(embedded) = &self.embedded {
            self.servers = embedded.servers.clone();
        }
        self.servers.clone()
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Finds a server by base URL and type.
    pub fn server_by_url(
        &self,
        base_url: &str,
        server_type: ServerType,
    ) -> Result<&DiscoveryServer> {
        self.servers
            .list
            .iter()
            .find(|srv| srv.base_url == base_url && srv.server_type == server_type)
            .ok_or_else(|| {
                PeregrineError::ServerNotFound {
                    server_type: server_type.to_string(),
                    base_url: base_url.to_string(),
                }
                .into()
            })
    }

    /// Finds the secure internet server for a country code.
    pub fn server_by_country(&self, country_code: &str) -> Result<&DiscoveryServer> {
        self.servers
            .list
            .iter()
            .find(|srv| {
                srv.server_type == ServerType::SecureInternet
                    && srv.country_code.as_deref() == Some(country_code)
            })
            .ok_or_else(|| PeregrineError::CountryNotFound(country_code.to_string()).into())
    }

    /// Finds an organization by its ID.
    pub fn organization_by_id(&self, org_id: &str) -> Result<&DiscoveryOrganization> {
        self.organizations
            .list
            .iter()
            .find(|org| org.org_id == org_id)
            .ok_or_else(|| PeregrineError::OrganizationNotFound(org_id.to_string()).into())
    }

    /// Resolves an organization's secure internet home: the organization
    /// record and the secure internet server it designates.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::OrganizationNotFound`] when the
    /// organization is unknown or has no secure internet home, and
    /// [`PeregrineError::ServerNotFound`] when the designated server is
    /// not in the servers catalog.
    pub fn secure_home(
        &self,
        org_id: &str,
    ) -> Result<(&DiscoveryOrganization, &DiscoveryServer)> {
        let org = self.organization_by_id(org_id)?;
        let home = org
            .secure_internet_home
            .as_deref()
            .ok_or_else(|| PeregrineError::OrganizationNotFound(org_id.to_string()))?;
        let server = self.server_by_url(home, ServerType::SecureInternet)?;
        Ok((org, server))
    }

    /// All country codes with a secure internet server, in catalog order.
    pub fn secure_location_list(&self) -> Vec<String> {
        self.servers
            .list
            .iter()
            .filter(|srv| srv.server_type == ServerType::SecureInternet)
            .filter_map(|srv| srv.country_code.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Persistence support
    // -----------------------------------------------------------------------

    /// Clones both catalogs for the persisted client snapshot.
    pub fn snapshot(&self) -> (DiscoveryOrganizations, DiscoveryServers) {
        (self.organizations.clone(), self.servers.clone())
    }

    /// Restores both catalogs from a persisted snapshot, including their
    /// versions and timestamps (so freshness decisions survive restart).
    pub fn restore(
        &mut self,
        organizations: DiscoveryOrganizations,
        servers: DiscoveryServers,
    ) {
        self.organizations = organizations;
        self.servers = servers;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
