//! VPN servers and their portal API
//!
//! A [`Server`] is identified by its base URL and type. It owns the
//! discovered profile list, a [`TokenStore`], and the cached API
//! endpoint URLs from the portal's well-known document. The [`Servers`]
//! collection tracks every server the user has added plus the currently
//! chosen one, and is what gets persisted in the client snapshot.
//!
//! Authenticated API calls attach the stored access token; on a 401
//! rejection exactly one refresh-token exchange is attempted and the
//! original call retried once. A failed refresh clears the token store
//! and escalates, so the flow never loops.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::discovery::types::TranslatedString;
use crate::error::{PeregrineError, Result};
use crate::http::{join_url, HttpClient, HttpResponse, RequestOptions};
use crate::oauth::{OAuthFlow, TokenStore};

/// Well-known path of the portal endpoint document.
const WELL_KNOWN_PATH: &str = "/.well-known/vpn-user-portal";

// ---------------------------------------------------------------------------
// ServerType
// ---------------------------------------------------------------------------

/// Whether a server grants access to its own institute or to the open
/// internet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Access to the institute's own network.
    InstituteAccess,
    /// Secure internet access through an organization's home server.
    SecureInternet,
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerType::InstituteAccess => write!(f, "institute_access"),
            ServerType::SecureInternet => write!(f, "secure_internet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Portal endpoints
// ---------------------------------------------------------------------------

/// One API version's endpoint set from the well-known document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoints {
    /// Base URL for authenticated API calls.
    pub api_endpoint: String,
    /// OAuth authorization endpoint.
    pub authorization_endpoint: String,
    /// OAuth token endpoint.
    pub token_endpoint: String,
}

/// The `/.well-known/vpn-user-portal` document.
///
/// Carries endpoint sets per API version keyed by versioned URIs. v3 is
/// required for operation; v2 is parsed for completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownDocument {
    /// Endpoint sets per API version.
    pub api: WellKnownApi,
    /// Portal software version string.
    #[serde(default)]
    pub v: String,
}

/// The `api` object of the well-known document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownApi {
    /// API version 2 endpoints, when the portal still serves them.
    #[serde(
        default,
        rename = "http://eduvpn.org/api#2",
        skip_serializing_if = "Option::is_none"
    )]
    pub v2: Option<ApiEndpoints>,
    /// API version 3 endpoints.
    #[serde(
        default,
        rename = "http://eduvpn.org/api#3",
        skip_serializing_if = "Option::is_none"
    )]
    pub v3: Option<ApiEndpoints>,
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// One VPN profile offered by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable identifier used in the `/connect` request.
    pub profile_id: String,
    /// Display name(s) for the profile.
    #[serde(default)]
    pub display_name: TranslatedString,
    /// VPN protocols this profile supports (`openvpn`, `wireguard`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vpn_proto_list: Vec<String>,
    /// Whether the profile routes all client traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_gateway: Option<bool>,
}

/// Wire shape of the `/info` response.
#[derive(Debug, Deserialize)]
struct InfoResponse {
    info: InfoBody,
}

#[derive(Debug, Deserialize)]
struct InfoBody {
    #[serde(default)]
    profile_list: Vec<Profile>,
}

// ---------------------------------------------------------------------------
// VPN configuration
// ---------------------------------------------------------------------------

/// VPN protocol of a fetched configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpnProtocol {
    /// OpenVPN configuration text.
    OpenVpn,
    /// WireGuard configuration text.
    WireGuard,
}

/// A VPN configuration fetched from the portal, ready for the platform
/// tunnel layer (out of scope here) to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct VpnConfig {
    /// The raw configuration text.
    pub config: String,
    /// Which protocol the configuration is for.
    pub protocol: VpnProtocol,
}

impl VpnConfig {
    /// Derives the protocol from the `/connect` response content type.
    fn from_response(response: &HttpResponse) -> Self {
        let content_type = response
            .headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let protocol = if content_type.contains("wireguard") {
            VpnProtocol::WireGuard
        } else {
            VpnProtocol::OpenVpn
        };
        Self {
            config: response.body_string(),
            protocol,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerInfo
// ---------------------------------------------------------------------------

/// Lightweight server summary delivered in FSM payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    /// Base URL of the server.
    pub base_url: String,
    /// Server type tag.
    pub server_type: ServerType,
    /// A representative display name, when one is known.
    pub display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A server the user has added: identity, endpoints, profiles, tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Base URL of the server's portal.
    pub base_url: String,
    /// Server type tag; part of the identity together with `base_url`.
    pub server_type: ServerType,
    /// Display name(s) copied from discovery when available.
    #[serde(default)]
    pub display_name: TranslatedString,
    /// Cached endpoint URLs from the well-known document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<ApiEndpoints>,
    /// Profiles discovered through `/info`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<Profile>,
    /// The server's token pair.
    #[serde(default)]
    pub tokens: TokenStore,
}

impl Server {
    /// Creates a server with nothing discovered yet.
    pub fn new(base_url: impl Into<String>, server_type: ServerType) -> Self {
        Self {
            base_url: base_url.into(),
            server_type,
            display_name: TranslatedString::default(),
            endpoints: None,
            profiles: Vec::new(),
            tokens: TokenStore::new(),
        }
    }

    /// A payload-sized summary of this server.
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            base_url: self.base_url.clone(),
            server_type: self.server_type,
            display_name: self.display_name.any().map(str::to_string),
        }
    }

    /// Returns the cached v3 endpoints, fetching the well-known document
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::Portal`] when the document is malformed
    /// or does not offer API v3.
    pub async fn ensure_endpoints(&mut self, http: &HttpClient) -> Result<ApiEndpoints> {
        if let Some(endpoints) = &self.endpoints {
            return Ok(endpoints.clone());
        }

        let url = join_url(&self.base_url, WELL_KNOWN_PATH)?;
        let body = http.get(&url).await?.into_success()?;
        let document: WellKnownDocument = serde_json::from_slice(&body)
            .map_err(|e| PeregrineError::Portal(format!("{url}: {e}")))?;
        let endpoints = document.api.v3.ok_or_else(|| {
            PeregrineError::Portal(format!("{url}: portal does not offer API v3"))
        })?;

        self.endpoints = Some(endpoints.clone());
        Ok(endpoints)
    }

    /// Looks up a profile by its ID.
    pub fn find_profile(&self, profile_id: &str) -> Option<&Profile> {
        self.profiles
            .iter()
            .find(|profile| profile.profile_id == profile_id)
    }

    /// Fetches the profile list through the authenticated `/info` call
    /// and caches it on the server.
    pub async fn fetch_profiles(
        &mut self,
        http: &HttpClient,
        flow: &OAuthFlow,
    ) -> Result<Vec<Profile>> {
        let response = self.request_authenticated(http, flow, "info", None).await?;
        let parsed: InfoResponse = serde_json::from_slice(&response.body)
            .map_err(PeregrineError::Serialization)?;
        self.profiles = parsed.info.profile_list.clone();
        Ok(parsed.info.profile_list)
    }

    /// Requests a VPN configuration for the given profile through the
    /// authenticated `/connect` call.
    pub async fn connect(
        &self,
        http: &HttpClient,
        flow: &OAuthFlow,
        profile_id: &str,
    ) -> Result<VpnConfig> {
        let mut form = HashMap::new();
        form.insert("profile_id", profile_id);
        let response = self
            .request_authenticated(http, flow, "connect", Some(&form))
            .await?;
        Ok(VpnConfig::from_response(&response))
    }

    // -----------------------------------------------------------------------
    // Authenticated requests
    // -----------------------------------------------------------------------

    /// Issues an authenticated API call with the single-refresh retry
    /// policy.
    ///
    /// On a 401 rejection exactly one refresh-token exchange runs and
    /// the original call is retried once with the fresh access token. A
    /// failed refresh clears the stored tokens and escalates with
    /// [`PeregrineError::AuthorizationExpired`] so the caller re-runs
    /// the authorization flow; the retry never loops.
    async fn request_authenticated(
        &self,
        http: &HttpClient,
        flow: &OAuthFlow,
        path: &str,
        form: Option<&HashMap<&str, &str>>,
    ) -> Result<HttpResponse> {
        let endpoints = self.endpoints.clone().ok_or_else(|| {
            PeregrineError::Portal(format!("{}: endpoints not discovered yet", self.base_url))
        })?;
        let tokens = self
            .tokens
            .get()
            .ok_or_else(|| PeregrineError::AuthorizationExpired(self.base_url.clone()))?;

        let url = format!("{}/{}", endpoints.api_endpoint.trim_end_matches('/'), path);

        let first = self.send(http, &url, &tokens.access, form).await?;
        if first.is_success() {
            return Ok(first);
        }
        if first.status != 401 {
            return Err(PeregrineError::Status {
                url: first.url,
                status: first.status,
            }
            .into());
        }

        tracing::info!(server = %self.base_url, "API call rejected with 401, refreshing tokens");
        let refreshed = match flow.refresh(&endpoints.token_endpoint, &tokens.refresh).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(server = %self.base_url, "token refresh failed: {e:#}");
                self.tokens.clear();
                return Err(PeregrineError::AuthorizationExpired(self.base_url.clone()).into());
            }
        };
        self.tokens.set(refreshed.clone());

        let second = self.send(http, &url, &refreshed.access, form).await?;
        if second.is_success() {
            Ok(second)
        } else {
            Err(PeregrineError::Status {
                url: second.url,
                status: second.status,
            }
            .into())
        }
    }

    /// Sends one bearer-authenticated request without retry logic.
    async fn send(
        &self,
        http: &HttpClient,
        url: &str,
        access_token: &str,
        form: Option<&HashMap<&str, &str>>,
    ) -> Result<HttpResponse> {
        let opts = RequestOptions::new().header("Authorization", format!("Bearer {access_token}"));
        match form {
            Some(form) => http.post_form(url, form, &opts).await,
            None => http.get_with_opts(url, &opts).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Servers collection
// ---------------------------------------------------------------------------

/// Identity of a server: base URL plus type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerKey {
    /// Base URL of the server's portal.
    pub base_url: String,
    /// Server type tag.
    pub server_type: ServerType,
}

/// Every server the user has added, plus the currently chosen one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Servers {
    /// The servers, in the order they were added.
    #[serde(default)]
    list: Vec<Server>,
    /// Identity of the currently chosen server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<ServerKey>,
}

impl Servers {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when no server has been added.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Looks up a server by identity.
    pub fn get(&self, base_url: &str, server_type: ServerType) -> Option<&Server> {
        self.list
            .iter()
            .find(|srv| srv.base_url == base_url && srv.server_type == server_type)
    }

    /// Looks up a server by identity, mutably.
    pub fn get_mut(&mut self, base_url: &str, server_type: ServerType) -> Option<&mut Server> {
        self.list
            .iter_mut()
            .find(|srv| srv.base_url == base_url && srv.server_type == server_type)
    }

    /// Returns the server for the identity, creating it when unknown.
    pub fn ensure(&mut self, base_url: &str, server_type: ServerType) -> &mut Server {
        if self.get(base_url, server_type).is_none() {
            self.list.push(Server::new(base_url, server_type));
        }
        self.get_mut(base_url, server_type)
            .expect("server was just inserted")
    }

    /// Removes a server. The current marker is cleared when it pointed
    /// at the removed server.
    pub fn remove(&mut self, base_url: &str, server_type: ServerType) {
        self.list
            .retain(|srv| !(srv.base_url == base_url && srv.server_type == server_type));
        if let Some(current) = &self.current {
            if current.base_url == base_url && current.server_type == server_type {
                self.current = None;
            }
        }
    }

    /// Marks a server as the currently chosen one.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::ServerNotFound`] when the identity is
    /// not in the collection.
    pub fn set_current(&mut self, base_url: &str, server_type: ServerType) -> Result<()> {
        if self.get(base_url, server_type).is_none() {
            return Err(PeregrineError::ServerNotFound {
                server_type: server_type.to_string(),
                base_url: base_url.to_string(),
            }
            .into());
        }
        self.current = Some(ServerKey {
            base_url: base_url.to_string(),
            server_type,
        });
        Ok(())
    }

    /// The currently chosen server.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::NoCurrentServer`] when nothing is
    /// chosen.
    pub fn current_server(&self) -> Result<&Server> {
        let key = self
            .current
            .as_ref()
            .ok_or(PeregrineError::NoCurrentServer)?;
        self.get(&key.base_url, key.server_type)
            .ok_or_else(|| PeregrineError::NoCurrentServer.into())
    }

    /// The currently chosen server, mutably.
    pub fn current_server_mut(&mut self) -> Result<&mut Server> {
        let key = self
            .current
            .clone()
            .ok_or(PeregrineError::NoCurrentServer)?;
        self.get_mut(&key.base_url, key.server_type)
            .ok_or_else(|| PeregrineError::NoCurrentServer.into())
    }

    /// Summaries of every server, for FSM payloads.
    pub fn infos(&self) -> Vec<ServerInfo> {
        self.list.iter().map(Server::info).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_KNOWN: &str = r#"{
        "api": {
            "http://eduvpn.org/api#2": {
                "api_endpoint": "https://vpn.example.org/api/v2",
                "authorization_endpoint": "https://vpn.example.org/oauth/authorize",
                "token_endpoint": "https://vpn.example.org/oauth/token"
            },
            "http://eduvpn.org/api#3": {
                "api_endpoint": "https://vpn.example.org/api/v3",
                "authorization_endpoint": "https://vpn.example.org/oauth/authorize",
                "token_endpoint": "https://vpn.example.org/oauth/token"
            }
        },
        "v": "3.1.0"
    }"#;

    // -----------------------------------------------------------------------
    // Well-known document
    // -----------------------------------------------------------------------

    #[test]
    fn test_well_known_document_parses_both_api_versions() {
        let document: WellKnownDocument = serde_json::from_str(WELL_KNOWN).unwrap();
        let v3 = document.api.v3.expect("v3 endpoints");
        assert_eq!(v3.api_endpoint, "https://vpn.example.org/api/v3");
        assert_eq!(
            v3.token_endpoint,
            "https://vpn.example.org/oauth/token"
        );
        assert!(document.api.v2.is_some());
        assert_eq!(document.v, "3.1.0");
    }

    #[test]
    fn test_well_known_document_tolerates_missing_v2() {
        let json = r#"{
            "api": {
                "http://eduvpn.org/api#3": {
                    "api_endpoint": "https://vpn.example.org/api/v3",
                    "authorization_endpoint": "https://vpn.example.org/a",
                    "token_endpoint": "https://vpn.example.org/t"
                }
            }
        }"#;
        let document: WellKnownDocument = serde_json::from_str(json).unwrap();
        assert!(document.api.v2.is_none());
        assert!(document.api.v3.is_some());
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    #[test]
    fn test_info_response_parses_profile_list() {
        let json = r#"{
            "info": {
                "profile_list": [
                    {
                        "profile_id": "internet",
                        "display_name": {"en": "Internet"},
                        "vpn_proto_list": ["openvpn", "wireguard"],
                        "default_gateway": true
                    },
                    {"profile_id": "internal"}
                ]
            }
        }"#;
        let parsed: InfoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.info.profile_list.len(), 2);
        assert_eq!(parsed.info.profile_list[0].profile_id, "internet");
        assert_eq!(
            parsed.info.profile_list[0].vpn_proto_list,
            vec!["openvpn", "wireguard"]
        );
    }

    #[test]
    fn test_find_profile_matches_by_id() {
        let mut server = Server::new("https://vpn.example.org/", ServerType::InstituteAccess);
        server.profiles = vec![Profile {
            profile_id: "internet".to_string(),
            display_name: TranslatedString::default(),
            vpn_proto_list: Vec::new(),
            default_gateway: None,
        }];
        assert!(server.find_profile("internet").is_some());
        assert!(server.find_profile("missing").is_none());
    }

    // -----------------------------------------------------------------------
    // ServerType
    // -----------------------------------------------------------------------

    #[test]
    fn test_server_type_display_matches_wire_tags() {
        assert_eq!(ServerType::InstituteAccess.to_string(), "institute_access");
        assert_eq!(ServerType::SecureInternet.to_string(), "secure_internet");
    }

    #[test]
    fn test_server_type_serde_roundtrip() {
        let json = serde_json::to_string(&ServerType::SecureInternet).unwrap();
        assert_eq!(json, r#""secure_internet""#);
        let parsed: ServerType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ServerType::SecureInternet);
    }

    // -----------------------------------------------------------------------
    // VpnConfig protocol detection
    // -----------------------------------------------------------------------

    fn response_with_content_type(content_type: &str) -> HttpResponse {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            content_type.parse().unwrap(),
        );
        HttpResponse {
            status: 200,
            headers,
            body: b"[Interface]".to_vec(),
            url: String::new(),
        }
    }

    #[test]
    fn test_vpn_config_detects_wireguard_content_type() {
        let config =
            VpnConfig::from_response(&response_with_content_type("application/x-wireguard-profile"));
        assert_eq!(config.protocol, VpnProtocol::WireGuard);
    }

    #[test]
    fn test_vpn_config_defaults_to_openvpn() {
        let config =
            VpnConfig::from_response(&response_with_content_type("application/x-openvpn-profile"));
        assert_eq!(config.protocol, VpnProtocol::OpenVpn);
    }

    // -----------------------------------------------------------------------
    // Servers collection
    // -----------------------------------------------------------------------

    #[test]
    fn test_ensure_creates_once_and_reuses() {
        let mut servers = Servers::new();
        servers.ensure("https://vpn.example.org/", ServerType::InstituteAccess);
        servers.ensure("https://vpn.example.org/", ServerType::InstituteAccess);
        assert_eq!(servers.infos().len(), 1);
    }

    #[test]
    fn test_same_url_different_type_are_distinct_servers() {
        let mut servers = Servers::new();
        servers.ensure("https://vpn.example.org/", ServerType::InstituteAccess);
        servers.ensure("https://vpn.example.org/", ServerType::SecureInternet);
        assert_eq!(servers.infos().len(), 2);
    }

    #[test]
    fn test_current_server_requires_choice() {
        let servers = Servers::new();
        assert!(servers.current_server().is_err());
    }

    #[test]
    fn test_set_current_rejects_unknown_server() {
        let mut servers = Servers::new();
        assert!(servers
            .set_current("https://vpn.example.org/", ServerType::InstituteAccess)
            .is_err());
    }

    #[test]
    fn test_set_current_then_lookup() {
        let mut servers = Servers::new();
        servers.ensure("https://vpn.example.org/", ServerType::InstituteAccess);
        servers
            .set_current("https://vpn.example.org/", ServerType::InstituteAccess)
            .unwrap();
        let current = servers.current_server().unwrap();
        assert_eq!(current.base_url, "https://vpn.example.org/");
    }

    #[test]
    fn test_remove_clears_current_marker() {
        let mut servers = Servers::new();
        servers.ensure("https://vpn.example.org/", ServerType::InstituteAccess);
        servers
            .set_current("https://vpn.example.org/", ServerType::InstituteAccess)
            .unwrap();
        servers.remove("https://vpn.example.org/", ServerType::InstituteAccess);
        assert!(servers.current_server().is_err());
        assert!(servers.is_empty());
    }

    #[test]
    fn test_servers_roundtrip_through_json() {
        let mut servers = Servers::new();
        let server = servers.ensure("https://vpn.example.org/", ServerType::InstituteAccess);
        server.tokens.set(crate::oauth::TokenSet {
            access: "a".to_string(),
            refresh: "r".to_string(),
            expires_at: None,
        });
        servers
            .set_current("https://vpn.example.org/", ServerType::InstituteAccess)
            .unwrap();

        let json = serde_json::to_string(&servers).unwrap();
        let restored: Servers = serde_json::from_str(&json).unwrap();

        let current = restored.current_server().unwrap();
        assert_eq!(current.base_url, "https://vpn.example.org/");
        assert_eq!(current.tokens.get().unwrap().access, "a");
    }
}
