//! RFC 6962 Merkle tree hashing and log proof verification.

use sha2::{Digest, Sha256};

use crate::error::{Error, ProofKind, Result};
use crate::types::{Hash, LogConsistencyProof, LogInclusionProof, LogTreeHead};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash of a leaf: `SHA-256(0x00 || data)`
pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash of an interior node: `SHA-256(0x01 || left || right)`
pub fn node_hash(left: &[u8], right: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn inclusion_failed() -> Error {
    Error::VerificationFailed(ProofKind::LogInclusion)
}

fn consistency_failed() -> Error {
    Error::VerificationFailed(ProofKind::LogConsistency)
}

/// Verify that `proof.leaf_hash` sits at `proof.leaf_index` in the log
/// described by `head`.
pub fn verify_inclusion_proof(head: &LogTreeHead, proof: &LogInclusionProof) -> Result<()> {
    if proof.tree_size != head.tree_size || proof.leaf_index >= proof.tree_size {
        return Err(inclusion_failed());
    }

    let mut fn_ = proof.leaf_index;
    let mut sn = proof.tree_size - 1;
    let mut r = proof.leaf_hash;

    for p in &proof.audit_path {
        if sn == 0 {
            return Err(inclusion_failed());
        }
        if fn_ & 1 == 1 || fn_ == sn {
            r = node_hash(p, &r);
            while fn_ & 1 == 0 && fn_ != 0 {
                fn_ >>= 1;
                sn >>= 1;
            }
        } else {
            r = node_hash(&r, p);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    if sn != 0 || r != head.root_hash {
        return Err(inclusion_failed());
    }
    Ok(())
}

/// Verify that `second` is an append-only extension of `first`.
pub fn verify_consistency_proof(
    first: &LogTreeHead,
    second: &LogTreeHead,
    proof: &LogConsistencyProof,
) -> Result<()> {
    if proof.first_size != first.tree_size || proof.second_size != second.tree_size {
        return Err(consistency_failed());
    }
    if first.tree_size > second.tree_size {
        return Err(consistency_failed());
    }
    if first.tree_size == second.tree_size {
        if !proof.audit_path.is_empty() || first.root_hash != second.root_hash {
            return Err(consistency_failed());
        }
        return Ok(());
    }
    // The empty tree is a prefix of every tree.
    if first.tree_size == 0 {
        return Ok(());
    }
    if proof.audit_path.is_empty() {
        return Err(consistency_failed());
    }

    // When the first tree is a complete subtree its root is the implicit
    // first element of the path.
    let mut path: Vec<Hash> = Vec::with_capacity(proof.audit_path.len() + 1);
    if first.tree_size.is_power_of_two() {
        path.push(first.root_hash);
    }
    path.extend_from_slice(&proof.audit_path);

    let mut fn_ = first.tree_size - 1;
    let mut sn = second.tree_size - 1;
    while fn_ & 1 == 1 {
        fn_ >>= 1;
        sn >>= 1;
    }

    let mut fr = path[0];
    let mut sr = path[0];
    for c in &path[1..] {
        if sn == 0 {
            return Err(consistency_failed());
        }
        if fn_ & 1 == 1 || fn_ == sn {
            fr = node_hash(c, &fr);
            sr = node_hash(c, &sr);
            while fn_ & 1 == 0 && fn_ != 0 {
                fn_ >>= 1;
                sn >>= 1;
            }
        } else {
            sr = node_hash(&sr, c);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    if fr != first.root_hash || sr != second.root_hash || sn != 0 {
        return Err(consistency_failed());
    }
    Ok(())
}
