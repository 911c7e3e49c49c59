//! Shared setup for the command line tools.

use std::time::Duration;

use clap::Args;
use tracing_subscriber::EnvFilter;
use url::Url;
use vmap_lib::{Client, ClientConfig, HttpLog, HttpMap, PollConfig, VerifiableMap};

pub const DEFAULT_BASE_URL: &str = "https://api.continusec.com/v1";

/// Where the map lives. Every flag can also come from the environment or a
/// `.env` file.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    #[arg(long, env = "VMAP_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: Url,

    #[arg(long, env = "VMAP_ACCOUNT")]
    pub account: String,

    #[arg(long, env = "VMAP_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "VMAP_MAP")]
    pub map: String,

    /// First wait between polls, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub poll_ms: u64,
}

impl ConnectArgs {
    pub fn connect(&self) -> VerifiableMap<HttpMap, HttpLog> {
        let client = Client::new(ClientConfig {
            base_url: self.base_url.clone(),
            account: self.account.clone(),
            api_key: self.api_key.clone(),
        });
        let poll = PollConfig { initial_backoff: Duration::from_millis(self.poll_ms) };
        client.verifiable_map(&self.map).with_poll_config(poll)
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn setup_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
