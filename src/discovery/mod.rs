//! Server/organization discovery
//!
//! This module maintains the catalog of known VPN servers and
//! organizations published by the discovery service. Catalogs are
//! downloaded as JSON documents with detached minisign signatures,
//! verified against trusted keys, bounded by a freshness policy, and
//! degraded to previously cached or embedded data when anything fails.
//!
//! # Module Layout
//!
//! - `types`  -- catalog data model (organizations, servers, versions)
//! - `verify` -- pure minisign detached-signature verification
//! - `store`  -- freshness policy, fetching, degradation, lookups

pub mod store;
pub mod types;
pub mod verify;

pub use store::{CatalogOutcome, DiscoveryStore, EmbeddedSnapshot};
pub use types::{
    DiscoveryOrganization, DiscoveryOrganizations, DiscoveryServer, DiscoveryServers,
    TranslatedString,
};
