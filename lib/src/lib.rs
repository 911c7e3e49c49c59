//! Client-side verification for a verifiable map: a sparse Merkle tree of
//! depth 256 whose mutations and published heads live in two append-only logs.

pub mod entry;
pub mod error;
pub mod log;
pub mod map;
pub mod map_proof;
pub mod merkle;
pub mod objecthash;
pub mod path;
pub mod types;

#[cfg(feature = "std")]
pub mod builder;

#[cfg(feature = "client")]
pub mod client;

pub use entry::{EntryFormat, UploadableEntry, VerifiableEntry};
pub use error::{Error, ProofKind, Result};
pub use log::VerifiableLog;
pub use map::{MapService, PollConfig, RawMapValue, VerifiableMap};
pub use map_proof::parse_audit_path;
pub use types::*;

#[cfg(feature = "std")]
pub use builder::{LogBuilder, MapBuilder};

#[cfg(feature = "client")]
pub use client::{Client, ClientConfig, HttpLog, HttpMap};
