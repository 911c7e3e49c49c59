//! In-memory map and log that produce proofs in the same shape the server
//! does. Useful as a reference producer for conformance checks.

use std::collections::BTreeMap;

use crate::entry::VerifiableEntry;
use crate::error::Result;
use crate::merkle::{leaf_hash, node_hash, sha256};
use crate::path::{default_hashes, key_bit};
use crate::types::{
    Hash, LogConsistencyProof, LogInclusionProof, LogTreeHead, MapInclusionProof, MapTreeHead,
    MAP_DEPTH,
};

/// An in-memory sparse Merkle map of depth 256
#[derive(Clone, Debug, Default)]
pub struct MapBuilder {
    // Keyed by SHA-256 of the key, so iteration order is tree order
    entries: BTreeMap<Hash, (Vec<u8>, VerifiableEntry)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key. An empty value deletes it.
    pub fn set(&mut self, key: &[u8], value: VerifiableEntry) {
        let key_hash = sha256(key);
        if value.is_empty() {
            self.entries.remove(&key_hash);
        } else {
            self.entries.insert(key_hash, (key.to_vec(), value));
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&VerifiableEntry> {
        self.entries.get(&sha256(key)).map(|(_, v)| v)
    }

    fn leaves(&self) -> Result<Vec<(Hash, Hash)>> {
        self.entries
            .iter()
            .map(|(k, (_, v))| Ok((*k, v.leaf_hash()?)))
            .collect()
    }

    /// Current root hash
    pub fn root(&self) -> Result<Hash> {
        Ok(subtree_hash(&self.leaves()?, 0))
    }

    /// Map head pinned to the given mutation log state
    pub fn tree_head(&self, mutation_log: LogTreeHead) -> Result<MapTreeHead> {
        Ok(MapTreeHead { root_hash: self.root()?, mutation_log_tree_head: mutation_log })
    }

    /// Audit path for a key, root level first, with default siblings left empty
    pub fn audit_path(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let key_hash = sha256(key);
        let defaults = default_hashes();
        let leaves = self.leaves()?;

        let mut path = Vec::with_capacity(MAP_DEPTH);
        let mut current: &[(Hash, Hash)] = &leaves;
        for depth in 0..MAP_DEPTH {
            let split = current.partition_point(|(k, _)| !key_bit(k, depth));
            let (left, right) = current.split_at(split);
            let (same, other) =
                if key_bit(&key_hash, depth) { (right, left) } else { (left, right) };

            let sibling = subtree_hash(other, depth + 1);
            if sibling == defaults[depth + 1] {
                path.push(Vec::new());
            } else {
                path.push(sibling.to_vec());
            }
            current = same;
        }
        Ok(path)
    }

    /// Full proof for a key as the server would return it
    pub fn proof(&self, key: &[u8], tree_size: u64) -> Result<MapInclusionProof> {
        let value = self.get(key).cloned().unwrap_or_else(|| VerifiableEntry::Raw(Vec::new()));
        Ok(MapInclusionProof {
            value,
            tree_size,
            audit_path: self.audit_path(key)?,
            key: key.to_vec(),
        })
    }
}

/// Hash of the subtree at `depth` holding `leaves`, which must share the
/// first `depth` key bits and be sorted by key hash.
fn subtree_hash(leaves: &[(Hash, Hash)], depth: usize) -> Hash {
    if leaves.is_empty() {
        return default_hashes()[depth];
    }
    if depth == MAP_DEPTH {
        return leaves[0].1;
    }
    let split = leaves.partition_point(|(k, _)| !key_bit(k, depth));
    let (left, right) = leaves.split_at(split);
    node_hash(&subtree_hash(left, depth + 1), &subtree_hash(right, depth + 1))
}

/// An in-memory RFC 6962 append-only log
#[derive(Clone, Debug, Default)]
pub struct LogBuilder {
    leaves: Vec<Hash>,
}

impl LogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw data, returning its leaf hash
    pub fn append(&mut self, data: &[u8]) -> Hash {
        self.append_leaf_hash(leaf_hash(data))
    }

    /// Append a record whose leaf hash is already known
    pub fn append_leaf_hash(&mut self, leaf: Hash) -> Hash {
        self.leaves.push(leaf);
        leaf
    }

    pub fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn tree_head(&self) -> LogTreeHead {
        self.tree_head_at(self.size())
    }

    /// Head of the log as it was after `tree_size` entries
    pub fn tree_head_at(&self, tree_size: u64) -> LogTreeHead {
        LogTreeHead::new(tree_size, mth(&self.leaves[..tree_size as usize]))
    }

    pub fn index_of(&self, leaf: &Hash) -> Option<u64> {
        self.leaves.iter().position(|l| l == leaf).map(|i| i as u64)
    }

    pub fn inclusion_proof(&self, leaf_index: u64, tree_size: u64) -> LogInclusionProof {
        LogInclusionProof {
            leaf_index,
            tree_size,
            leaf_hash: self.leaves[leaf_index as usize],
            audit_path: inclusion_path(leaf_index as usize, &self.leaves[..tree_size as usize]),
        }
    }

    pub fn consistency_proof(&self, first_size: u64, second_size: u64) -> LogConsistencyProof {
        let audit_path = if first_size == 0 || first_size == second_size {
            Vec::new()
        } else {
            subproof(first_size as usize, &self.leaves[..second_size as usize], true)
        };
        LogConsistencyProof { first_size, second_size, audit_path }
    }
}

/// Largest power of two strictly less than `n`, for `n > 1`
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

fn mth(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => sha256(b""),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            node_hash(&mth(&leaves[..k]), &mth(&leaves[k..]))
        }
    }
}

fn inclusion_path(m: usize, leaves: &[Hash]) -> Vec<Hash> {
    let n = leaves.len();
    if n <= 1 {
        return Vec::new();
    }
    let k = split_point(n);
    if m < k {
        let mut path = inclusion_path(m, &leaves[..k]);
        path.push(mth(&leaves[k..]));
        path
    } else {
        let mut path = inclusion_path(m - k, &leaves[k..]);
        path.push(mth(&leaves[..k]));
        path
    }
}

fn subproof(m: usize, leaves: &[Hash], complete: bool) -> Vec<Hash> {
    let n = leaves.len();
    if m == n {
        return if complete { Vec::new() } else { vec![mth(leaves)] };
    }
    let k = split_point(n);
    if m <= k {
        let mut path = subproof(m, &leaves[..k], complete);
        path.push(mth(&leaves[k..]));
        path
    } else {
        let mut path = subproof(m - k, &leaves[k..], false);
        path.push(mth(&leaves[..k]));
        path
    }
}
