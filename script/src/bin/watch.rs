//! Follows a map, verifying every new state against the last one.
//!
//! The last verified state is kept in `--state-file` so a restart picks up
//! the chain of trust where it left off.
//!
//! Usage:
//! RUST_LOG=info cargo run --bin watch -- --account 1234 --map users --state-file map.json

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::sleep;
use tracing::{error, info, warn};
use vmap_lib::{Error, MapTreeState, VerifiableEntry};
use vmap_script::{setup_logger, ConnectArgs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    connect: ConnectArgs,

    #[arg(long, env = "VMAP_STATE_FILE", default_value = "map-state.json")]
    state_file: PathBuf,

    /// Seconds between checks
    #[arg(long, default_value_t = 12)]
    interval: u64,

    /// Keys to read and print on every new state
    #[arg(long = "key")]
    keys: Vec<String>,
}

fn load(path: &PathBuf) -> Result<Option<MapTreeState>> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data).context("parsing state file")?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn store(path: &PathBuf, state: &MapTreeState) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    std::fs::rename(&tmp, path).with_context(|| format!("writing {}", path.display()))
}

fn describe(entry: &VerifiableEntry) -> String {
    if entry.is_empty() {
        "(not set)".to_string()
    } else {
        String::from_utf8_lossy(entry.data()).into_owned()
    }
}

/// Verification failures end the watch. Anything else is logged and retried
/// on the next tick.
fn tolerate(err: Error, what: &str) -> Result<()> {
    if err.is_verification_failure() {
        error!(error = %err, "{what}: map failed verification");
        return Err(err.into());
    }
    warn!(error = %err, "{what} failed, retrying");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_logger();

    let args = Args::parse();
    let map = args.connect.connect();
    let mut state = load(&args.state_file)?;
    match &state {
        Some(s) => info!(size = s.tree_size(), "resuming from saved state"),
        None => warn!("no saved state, trusting the first head seen"),
    }

    loop {
        match map.verified_latest_map_state(state.as_ref()).await {
            Ok(next) if Some(next) == state => {
                info!(size = next.tree_size(), "no new state");
            }
            Ok(next) => {
                info!(
                    size = next.tree_size(),
                    root = %hex::encode(next.map_tree_head.root_hash),
                    "verified new map state"
                );
                for key in &args.keys {
                    match map.verified_get(key.as_bytes(), &next, Default::default()).await {
                        Ok(entry) => info!(key = %key, value = %describe(&entry), "verified value"),
                        Err(e) => tolerate(e, "reading key")?,
                    }
                }
                store(&args.state_file, &next)?;
                state = Some(next);
            }
            Err(e) => tolerate(e, "fetching map state")?,
        }

        tokio::select! {
            _ = sleep(Duration::from_secs(args.interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmap_lib::ProofKind;

    #[test]
    fn test_transient_errors_keep_watching() {
        assert!(tolerate(Error::Transport("connection reset".into()), "reading key").is_ok());
        assert!(tolerate(Error::NotFound, "reading key").is_ok());
        let unavailable = Error::Status { code: 503, message: String::new() };
        assert!(tolerate(unavailable, "fetching map state").is_ok());
    }

    #[test]
    fn test_verification_failure_stops_watching() {
        for kind in [ProofKind::MapInclusion, ProofKind::LogInclusion, ProofKind::LogConsistency] {
            assert!(tolerate(Error::VerificationFailed(kind), "reading key").is_err());
        }
    }
}
