//! Discovery catalog data model
//!
//! These types mirror the wire format of the two discovery documents
//! (`organization_list.json`, `server_list.json`): a monotonically
//! increasing `v` field plus the list payload. The same types are used
//! for the persisted client snapshot; the `timestamp` field records the
//! last successful fetch and is absent from the wire documents.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::ServerType;

// ---------------------------------------------------------------------------
// TranslatedString
// ---------------------------------------------------------------------------

/// A display string that is either a plain value or a map of language
/// tags to values.
///
/// The discovery documents use both forms interchangeably. Language
/// matching is the embedding application's concern; the core exposes
/// the raw value.
///
/// # Examples
///
/// ```
/// use peregrine::discovery::TranslatedString;
///
/// let plain: TranslatedString = serde_json::from_str(r#""Example University""#).unwrap();
/// assert_eq!(plain.any(), Some("Example University"));
///
/// let translated: TranslatedString =
///     serde_json::from_str(r#"{"en": "Example", "nl": "Voorbeeld"}"#).unwrap();
/// assert!(translated.any().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranslatedString {
    /// A single untranslated value.
    Single(String),
    /// Language tag to value.
    Map(HashMap<String, String>),
}

impl TranslatedString {
    /// Returns some representative value: the single value, the `en`
    /// translation, or an arbitrary entry.
    pub fn any(&self) -> Option<&str> {
        match self {
            TranslatedString::Single(value) => Some(value),
            TranslatedString::Map(map) => map
                .get("en")
                .or_else(|| map.values().next())
                .map(String::as_str),
        }
    }
}

impl Default for TranslatedString {
    fn default() -> Self {
        TranslatedString::Single(String::new())
    }
}

// ---------------------------------------------------------------------------
// Organizations
// ---------------------------------------------------------------------------

/// A single organization from `organization_list.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOrganization {
    /// Unique organization identifier.
    pub org_id: String,

    /// Display name(s) for the organization.
    #[serde(default)]
    pub display_name: TranslatedString,

    /// Base URL of the secure internet server this organization
    /// designates as its members' home. Absent for organizations
    /// without secure internet access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_internet_home: Option<String>,

    /// Search keywords, kept for consumer-side filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_list: Option<TranslatedString>,
}

/// The organizations catalog: ordered list, document version, and the
/// timestamp of the last successful fetch.
///
/// Created empty, replaced wholesale on each successful fetch, degraded
/// to a previous or embedded copy on failure, and invalidated (timestamp
/// reset) to force a refetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOrganizations {
    /// Monotonically increasing document version from the `v` field.
    #[serde(default, rename = "v")]
    pub version: u64,

    /// The organizations, in document order.
    #[serde(default, rename = "organization_list")]
    pub list: Vec<DiscoveryOrganization>,

    /// When the catalog was last fetched successfully. `None` means
    /// never fetched (or explicitly expired); absent from wire documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

/// A single server from `server_list.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryServer {
    /// Base URL of the server's VPN portal.
    pub base_url: String,

    /// Whether this is an institute access or secure internet server.
    pub server_type: ServerType,

    /// Display name(s) for the server.
    #[serde(default)]
    pub display_name: TranslatedString,

    /// ISO country code; only meaningful for secure internet servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,

    /// Support contact URIs published by the operator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub support_contact: Vec<String>,
}

/// The servers catalog. Same lifecycle shape as
/// [`DiscoveryOrganizations`], but with a time-based freshness rule
/// (one hour) instead of a purely presence-based one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryServers {
    /// Monotonically increasing document version from the `v` field.
    #[serde(default, rename = "v")]
    pub version: u64,

    /// The servers, in document order.
    #[serde(default, rename = "server_list")]
    pub list: Vec<DiscoveryServer>,

    /// When the catalog was last fetched successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_LIST: &str = r#"{
        "v": 21,
        "server_list": [
            {
                "base_url": "https://vpn.example.edu/",
                "server_type": "institute_access",
                "display_name": {"en": "Example University"}
            },
            {
                "base_url": "https://nl.secure.example.org/",
                "server_type": "secure_internet",
                "country_code": "NL"
            }
        ]
    }"#;

    const ORGANIZATION_LIST: &str = r#"{
        "v": 9,
        "organization_list": [
            {
                "org_id": "https://idp.example.edu",
                "display_name": "Example",
                "secure_internet_home": "https://nl.secure.example.org/"
            },
            {
                "org_id": "https://idp.other.example",
                "display_name": {"en": "Other"}
            }
        ]
    }"#;

    #[test]
    fn test_server_list_parses_from_wire_format() {
        let servers: DiscoveryServers = serde_json::from_str(SERVER_LIST).unwrap();
        assert_eq!(servers.version, 21);
        assert_eq!(servers.list.len(), 2);
        assert!(servers.timestamp.is_none(), "wire documents carry no timestamp");
        assert_eq!(servers.list[0].server_type, ServerType::InstituteAccess);
        assert_eq!(servers.list[1].country_code.as_deref(), Some("NL"));
    }

    #[test]
    fn test_organization_list_parses_from_wire_format() {
        let orgs: DiscoveryOrganizations = serde_json::from_str(ORGANIZATION_LIST).unwrap();
        assert_eq!(orgs.version, 9);
        assert_eq!(orgs.list.len(), 2);
        assert_eq!(
            orgs.list[0].secure_internet_home.as_deref(),
            Some("https://nl.secure.example.org/")
        );
        assert!(orgs.list[1].secure_internet_home.is_none());
    }

    #[test]
    fn test_empty_document_defaults_to_zero_version() {
        let servers: DiscoveryServers = serde_json::from_str("{}").unwrap();
        assert_eq!(servers.version, 0);
        assert!(servers.list.is_empty());
    }

    #[test]
    fn test_catalog_roundtrip_preserves_timestamp_and_version() {
        let mut servers: DiscoveryServers = serde_json::from_str(SERVER_LIST).unwrap();
        servers.timestamp = Some(chrono::Utc::now());

        let json = serde_json::to_string(&servers).unwrap();
        let restored: DiscoveryServers = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, servers, "round-trip must be lossless");
    }

    #[test]
    fn test_translated_string_any_prefers_english() {
        let mut map = HashMap::new();
        map.insert("nl".to_string(), "Voorbeeld".to_string());
        map.insert("en".to_string(), "Example".to_string());
        assert_eq!(TranslatedString::Map(map).any(), Some("Example"));
    }

    #[test]
    fn test_catalog_content_equality_ignores_timestamp_via_list() {
        // Rollback policy compares the parsed lists; two fetches of the
        // same document compare equal on `list` even with different
        // fetch timestamps.
        let first: DiscoveryServers = serde_json::from_str(SERVER_LIST).unwrap();
        let second: DiscoveryServers = serde_json::from_str(SERVER_LIST).unwrap();
        assert_eq!(first.list, second.list);
    }
}
