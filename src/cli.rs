use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::client::ClientConfig;
use crate::constants::{DEFAULT_BACKEND_URL, DEFAULT_ENRICH_TIMEOUT_SECS, DEFAULT_MAX_RETRIES};

#[derive(Parser, Debug)]
#[command(name = "npi-profiler")]
#[command(about = "HCP profiling backend: NPI extraction, enrichment proxy, profile export", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the dashboard HTTP API.
    Serve(ServeArgs),
    /// Print the NPIs found in a CSV/text file as a JSON array.
    Extract(ExtractArgs),
    /// Extract NPIs from a file, enrich them, and write the CSV export.
    Enrich(EnrichArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct BackendArgs {
    /// Base URL of the enrichment backend.
    #[arg(long, env = "BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Upper bound for one enrichment round trip, retries included.
    #[arg(long, default_value_t = DEFAULT_ENRICH_TIMEOUT_SECS)]
    pub enrich_timeout_secs: u64,

    /// Max attempts for transient enrichment failures.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
}

impl BackendArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            backend_url: self.backend_url.clone(),
            timeout: Duration::from_secs(self.enrich_timeout_secs.max(1)),
            max_retries: self.max_retries,
            ..ClientConfig::default()
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,

    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Uploaded list (CSV or plain text).
    pub file: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct EnrichArgs {
    /// Uploaded list (CSV or plain text).
    pub file: PathBuf,

    /// Export path. Defaults to hcp_profiles_<date>.csv in the working directory.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Only export profiles matching this search term.
    #[arg(long)]
    pub search: Option<String>,

    /// Sort key for the export (e.g. fullName, publications).
    #[arg(long)]
    pub sort: Option<String>,

    /// Sort descending instead of ascending.
    #[arg(long, requires = "sort")]
    pub desc: bool,

    #[command(flatten)]
    pub backend: BackendArgs,
}
