//! Peregrine - VPN discovery diagnostic tool
//!
//! Main entry point for the read-only diagnostic binary. Fetches the
//! signed discovery catalogs and prints them; never touches OAuth or
//! any persisted client state.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use peregrine::cli::{Cli, Commands};
use peregrine::discovery::{store::DISCOVERY_URL, CatalogOutcome, DiscoveryStore};
use peregrine::discovery::verify::PublicKey;
use peregrine::error::PeregrineError;
use peregrine::http::HttpClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let base_url = cli
        .discovery_url
        .clone()
        .unwrap_or_else(|| DISCOVERY_URL.to_string());
    let keys = PublicKey::default_trusted().map_err(|source| PeregrineError::Verification {
        resource: "trusted keys".to_string(),
        source,
    })?;
    let mut store = DiscoveryStore::new(HttpClient::new(), base_url, keys, None);

    match cli.command {
        Commands::Servers => {
            let outcome = store.servers().await;
            report_degradation(&outcome);
            println!("version: {}", outcome.catalog.version);
            for server in &outcome.catalog.list {
                let name = server.display_name.any().unwrap_or("-");
                println!("{:<18} {:<40} {}", server.server_type, server.base_url, name);
            }
        }
        Commands::Organizations => {
            let outcome = store.organizations().await;
            report_degradation(&outcome);
            println!("version: {}", outcome.catalog.version);
            for org in &outcome.catalog.list {
                let name = org.display_name.any().unwrap_or("-");
                let home = org.secure_internet_home.as_deref().unwrap_or("-");
                println!("{:<50} {:<40} {}", org.org_id, home, name);
            }
        }
        Commands::Locations => {
            let outcome = store.servers().await;
            report_degradation(&outcome);
            for location in store.secure_location_list() {
                println!("{location}");
            }
        }
        Commands::SecureHome { org_id } => {
            // Both catalogs are needed: the organization names the home,
            // the servers catalog holds the record.
            let organizations = store.organizations().await;
            report_degradation(&organizations);
            let servers = store.servers().await;
            report_degradation(&servers);

            let (org, server) = store.secure_home(&org_id)?;
            let name = org.display_name.any().unwrap_or("-");
            println!("organization: {} ({})", org.org_id, name);
            println!("secure internet home: {}", server.base_url);
        }
    }

    Ok(())
}

/// Prints a warning when a catalog came from cache because the fetch
/// failed.
fn report_degradation<T>(outcome: &CatalogOutcome<T>) {
    if let Some(e) = &outcome.error {
        eprintln!("warning: discovery fetch failed, showing cached data: {e:#}");
    }
}

/// Initializes tracing with an env-filter; `-v` raises the default
/// level to debug.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("peregrine={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
