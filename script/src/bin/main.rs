//! Command line access to a verifiable map.
//!
//! ```shell
//! RUST_LOG=debug cargo run --bin vmap -- --account 1234 --map users get alice
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use vmap_lib::{EntryFormat, MapTreeState, UploadableEntry, VerifiableEntry, HEAD};
use vmap_script::{setup_logger, ConnectArgs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Verified state to extend, as written by `vmap state` or `watch`.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the raw map head. Not verified.
    TreeHead {
        #[arg(long, default_value_t = HEAD)]
        size: u64,
    },
    /// Verify and print the latest map state, extending --state-file if given.
    State,
    /// Read a key, proven against a verified map state.
    Get {
        key: String,
        #[arg(long, value_enum, default_value_t = Format::Raw)]
        format: Format,
        /// Skip verification and print the value with its audit path.
        #[arg(long)]
        unverified: bool,
    },
    Set {
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = Upload::Raw)]
        format: Upload,
    },
    /// Set a key only if it currently has the given leaf hash.
    Update {
        key: String,
        value: String,
        /// Hex leaf hash of the current value
        #[arg(long)]
        previous: String,
        #[arg(long, value_enum, default_value_t = Upload::Raw)]
        format: Upload,
    },
    Delete {
        key: String,
    },
    /// Wait for the map to reach a size.
    Wait {
        size: u64,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Raw,
    Json,
    Redacted,
}

impl From<Format> for EntryFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Raw => EntryFormat::Raw,
            Format::Json => EntryFormat::Json,
            Format::Redacted => EntryFormat::RedactedJson,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Upload {
    Raw,
    Json,
    Redactable,
}

impl Upload {
    fn entry(self, value: String) -> UploadableEntry {
        let bytes = value.into_bytes();
        match self {
            Upload::Raw => UploadableEntry::Raw(bytes),
            Upload::Json => UploadableEntry::Json(bytes),
            Upload::Redactable => UploadableEntry::RedactableJson(bytes),
        }
    }
}

fn load_state(path: &Option<PathBuf>) -> Result<Option<MapTreeState>> {
    let Some(path) = path else { return Ok(None) };
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Some(serde_json::from_slice(&data).context("parsing state file")?))
}

fn save_state(path: &Option<PathBuf>, state: &MapTreeState) -> Result<()> {
    if let Some(path) = path {
        std::fs::write(path, serde_json::to_vec_pretty(state)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn render(entry: &VerifiableEntry) -> Result<String> {
    Ok(match entry.value()? {
        Some(value) => serde_json::to_string_pretty(&value)?,
        None => String::from_utf8_lossy(entry.data()).into_owned(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_logger();

    let args = Args::parse();
    let map = args.connect.connect();

    match args.command {
        Command::TreeHead { size } => {
            let head = map.tree_head(size).await?;
            println!("{}", serde_json::to_string_pretty(&head)?);
        }
        Command::State => {
            let prev = load_state(&args.state_file)?;
            let state = map.verified_latest_map_state(prev.as_ref()).await?;
            save_state(&args.state_file, &state)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Get { key, format, unverified } => {
            if unverified {
                let proof = map.get(key.as_bytes(), HEAD, format.into()).await?;
                println!("tree size: {}", proof.tree_size);
                for (depth, hash) in proof.audit_path.iter().enumerate() {
                    if !hash.is_empty() {
                        println!("  {depth}/{}", hex::encode(hash));
                    }
                }
                println!("{}", render(&proof.value)?);
            } else {
                let prev = load_state(&args.state_file)?;
                let state = map.verified_latest_map_state(prev.as_ref()).await?;
                save_state(&args.state_file, &state)?;
                let entry = map.verified_get(key.as_bytes(), &state, format.into()).await?;
                info!(size = state.tree_size(), key = %key, "verified value");
                if entry.is_empty() {
                    println!("(not set)");
                } else {
                    println!("{}", render(&entry)?);
                }
            }
        }
        Command::Set { key, value, format } => {
            let receipt = map.set(key.as_bytes(), &format.entry(value)).await?;
            println!("{}", hex::encode(receipt.entry_leaf_hash));
        }
        Command::Update { key, value, previous, format } => {
            let previous: [u8; 32] = hex::decode(&previous)?
                .try_into()
                .map_err(|_| anyhow::anyhow!("previous leaf hash must be 32 bytes"))?;
            let receipt = map.update(key.as_bytes(), &format.entry(value), &previous).await?;
            println!("{}", hex::encode(receipt.entry_leaf_hash));
        }
        Command::Delete { key } => {
            let receipt = map.delete(key.as_bytes()).await?;
            println!("{}", hex::encode(receipt.entry_leaf_hash));
        }
        Command::Wait { size, timeout_secs } => {
            let head = match timeout_secs {
                Some(secs) => {
                    map.block_until_size_with_deadline(size, Duration::from_secs(secs)).await?
                }
                None => {
                    map.block_until_size_or_cancel(size, async {
                        let _ = tokio::signal::ctrl_c().await;
                    })
                    .await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&head)?);
        }
    }

    Ok(())
}
