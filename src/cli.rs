//! Command-line interface definition for the Peregrine diagnostic tool
//!
//! This module defines the CLI structure using clap's derive API. The
//! binary is a read-only diagnostic surface over the discovery catalog;
//! it never runs the OAuth flow.

use clap::{Parser, Subcommand};

/// Peregrine - VPN discovery diagnostic tool
///
/// Inspect the signed server/organization catalogs the Peregrine core
/// uses to decide which servers may be connected to.
#[derive(Parser, Debug, Clone)]
#[command(name = "peregrine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override the discovery base URL
    #[arg(long, env = "PEREGRINE_DISCOVERY_URL")]
    pub discovery_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the diagnostic tool
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the discovery servers catalog
    Servers,

    /// List the discovery organizations catalog
    Organizations,

    /// List country codes with a secure internet server
    Locations,

    /// Resolve an organization's secure internet home server
    SecureHome {
        /// The organization ID to resolve
        org_id: String,
    },
}

impl Cli {
    /// Parses the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servers_command_parses() {
        let cli = Cli::try_parse_from(["peregrine", "servers"]).unwrap();
        assert!(matches!(cli.command, Commands::Servers));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_secure_home_requires_org_id() {
        assert!(Cli::try_parse_from(["peregrine", "secure-home"]).is_err());
        let cli =
            Cli::try_parse_from(["peregrine", "secure-home", "https://idp.example.edu"]).unwrap();
        match cli.command {
            Commands::SecureHome { org_id } => assert_eq!(org_id, "https://idp.example.edu"),
            other => panic!("expected SecureHome, got {other:?}"),
        }
    }

    #[test]
    fn test_discovery_url_override_parses() {
        let cli = Cli::try_parse_from([
            "peregrine",
            "--discovery-url",
            "https://disco.test.example/v2/",
            "locations",
        ])
        .unwrap();
        assert_eq!(
            cli.discovery_url.as_deref(),
            Some("https://disco.test.example/v2/")
        );
    }
}
