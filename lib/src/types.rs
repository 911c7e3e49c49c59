use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::entry::VerifiableEntry;
use crate::error::Result;
use crate::merkle::leaf_hash;
use crate::objecthash::object_hash;

/// 32-byte SHA-256 digest
pub type Hash = [u8; 32];

/// Tree size sentinel asking the server for its latest state.
pub const HEAD: u64 = 0;

/// Number of levels in the map's sparse Merkle tree, and the length of every
/// map audit path.
pub const MAP_DEPTH: usize = 256;

/// State of an append-only log at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTreeHead {
    pub tree_size: u64,
    #[serde(with = "hex_hash")]
    pub root_hash: Hash,
}

impl LogTreeHead {
    pub fn new(tree_size: u64, root_hash: Hash) -> Self {
        Self { tree_size, root_hash }
    }

    /// Larger logs are later logs.
    pub fn is_newer_than(&self, other: &LogTreeHead) -> bool {
        self.tree_size > other.tree_size
    }
}

/// Root hash of the map together with the mutation log state that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTreeHead {
    #[serde(with = "hex_hash")]
    pub root_hash: Hash,
    pub mutation_log_tree_head: LogTreeHead,
}

impl MapTreeHead {
    /// The map's size is the size of its mutation log.
    pub fn tree_size(&self) -> u64 {
        self.mutation_log_tree_head.tree_size
    }

    /// Leaf hash of this head as recorded in the tree head log.
    pub fn leaf_hash(&self) -> Result<Hash> {
        let record = json!({
            "map_hash": STANDARD.encode(self.root_hash),
            "mutation_log": {
                "tree_size": self.mutation_log_tree_head.tree_size as f64,
                "tree_hash": STANDARD.encode(self.mutation_log_tree_head.root_hash),
            },
        });
        Ok(leaf_hash(&object_hash(&record)?))
    }
}

/// A map head proven to be included in the tree head log.
///
/// Only `VerifiableMap` constructs these, so holding one means the inclusion
/// was checked. Pass the latest one back as `prev` to extend the chain of trust.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTreeState {
    pub map_tree_head: MapTreeHead,
    pub tree_head_log_tree_head: LogTreeHead,
}

impl MapTreeState {
    pub fn tree_size(&self) -> u64 {
        self.map_tree_head.tree_size()
    }
}

/// Unverified claim from the server about a key's value at a tree size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapInclusionProof {
    pub value: VerifiableEntry,
    pub tree_size: u64,
    /// One slot per tree level, root first. Empty slots stand for the default
    /// subtree hash at that level.
    pub audit_path: Vec<Vec<u8>>,
    pub key: Vec<u8>,
}

/// Receipt for a map mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEntryResponse {
    /// Leaf hash of the mutation in the mutation log.
    #[serde(with = "hex_hash")]
    pub entry_leaf_hash: Hash,
}

/// Inclusion proof for one leaf of a log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogInclusionProof {
    pub leaf_index: u64,
    pub tree_size: u64,
    pub leaf_hash: Hash,
    pub audit_path: Vec<Hash>,
}

/// Consistency proof between two sizes of a log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConsistencyProof {
    pub first_size: u64,
    pub second_size: u64,
    pub audit_path: Vec<Hash>,
}

/// Copy a variable-length digest into a `Hash`.
pub fn to_hash(bytes: &[u8]) -> Option<Hash> {
    bytes.try_into().ok()
}

/// Hex (de)serialization for hashes in persisted state.
pub mod hex_hash {
    use super::Hash;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(D::Error::custom)?;
        super::to_hash(&bytes).ok_or_else(|| D::Error::custom("hash must be 32 bytes"))
    }
}
