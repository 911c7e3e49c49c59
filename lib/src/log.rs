//! Append-only log collaborator used by the map verifier.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, ProofKind, Result};
use crate::merkle::{verify_consistency_proof, verify_inclusion_proof};
use crate::types::{Hash, LogConsistencyProof, LogInclusionProof, LogTreeHead, HEAD};

/// Read access to one verifiable log.
///
/// Implementors only fetch raw data. The provided methods do the checking and
/// should not normally be overridden.
#[async_trait]
pub trait VerifiableLog: Send + Sync {
    /// Raw, unverified tree head at `tree_size`, or the latest for [`HEAD`].
    async fn tree_head(&self, tree_size: u64) -> Result<LogTreeHead>;

    /// Inclusion proof for the leaf with hash `leaf_hash` in the log of size `tree_size`.
    async fn inclusion_proof(&self, tree_size: u64, leaf_hash: &Hash) -> Result<LogInclusionProof>;

    /// Consistency proof between sizes `first` and `second`, `first < second`.
    async fn consistency_proof(&self, first: u64, second: u64) -> Result<LogConsistencyProof>;

    /// Check that two heads describe the same history. Heads may be given in
    /// either order.
    async fn verify_consistency(&self, a: &LogTreeHead, b: &LogTreeHead) -> Result<()> {
        if a.tree_size == b.tree_size {
            if a.root_hash != b.root_hash {
                return Err(Error::VerificationFailed(ProofKind::LogConsistency));
            }
            return Ok(());
        }
        let (old, new) = if a.tree_size < b.tree_size { (a, b) } else { (b, a) };
        // An empty log is a prefix of every log.
        if old.tree_size == 0 {
            return Ok(());
        }
        let proof = self.consistency_proof(old.tree_size, new.tree_size).await?;
        verify_consistency_proof(old, new, &proof)
    }

    /// Check that the leaf with hash `leaf_hash` is part of the log at `head`.
    async fn verify_inclusion(&self, head: &LogTreeHead, leaf_hash: &Hash) -> Result<()> {
        if head.tree_size == 0 {
            return Err(Error::VerificationFailed(ProofKind::LogInclusion));
        }
        let proof = self.inclusion_proof(head.tree_size, leaf_hash).await?;
        if &proof.leaf_hash != leaf_hash {
            return Err(Error::VerificationFailed(ProofKind::LogInclusion));
        }
        verify_inclusion_proof(head, &proof)
    }

    /// Tree head at `tree_size`, proven consistent with `prev` when given.
    async fn verified_tree_head(
        &self,
        prev: Option<&LogTreeHead>,
        tree_size: u64,
    ) -> Result<LogTreeHead> {
        if let Some(prev) = prev {
            if tree_size != HEAD && prev.tree_size == tree_size {
                return Ok(*prev);
            }
        }
        let head = self.tree_head(tree_size).await?;
        if let Some(prev) = prev {
            self.verify_consistency(prev, &head).await?;
        }
        Ok(head)
    }

    /// Latest tree head, proven consistent with `prev`. A head that is not
    /// newer than `prev` is treated as a lagging replica and `prev` is kept.
    async fn verified_latest_tree_head(&self, prev: Option<&LogTreeHead>) -> Result<LogTreeHead> {
        let head = self.verified_tree_head(prev, HEAD).await?;
        match prev {
            Some(prev) if head.tree_size <= prev.tree_size => {
                debug!(
                    seen = head.tree_size,
                    kept = prev.tree_size,
                    "log head not newer, keeping previous"
                );
                Ok(*prev)
            }
            _ => Ok(head),
        }
    }
}

#[cfg(all(test, feature = "std"))]
pub(crate) mod tests {
    use super::*;
    use crate::builder::LogBuilder;
    use std::sync::Mutex;

    /// Log served from a `LogBuilder`, reporting a configurable size as HEAD.
    pub(crate) struct MemoryLog {
        pub log: Mutex<LogBuilder>,
        pub head_size: Mutex<Option<u64>>,
        pub consistency_calls: Mutex<u32>,
    }

    impl MemoryLog {
        pub fn new(log: LogBuilder) -> Self {
            Self {
                log: Mutex::new(log),
                head_size: Mutex::new(None),
                consistency_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl VerifiableLog for MemoryLog {
        async fn tree_head(&self, tree_size: u64) -> Result<LogTreeHead> {
            let log = self.log.lock().unwrap();
            let size = match tree_size {
                HEAD => self.head_size.lock().unwrap().unwrap_or(log.size()),
                n if n > log.size() => return Err(Error::InvalidRange),
                n => n,
            };
            Ok(log.tree_head_at(size))
        }

        async fn inclusion_proof(
            &self,
            tree_size: u64,
            leaf_hash: &Hash,
        ) -> Result<LogInclusionProof> {
            let log = self.log.lock().unwrap();
            match log.index_of(leaf_hash) {
                Some(index) if index < tree_size => Ok(log.inclusion_proof(index, tree_size)),
                _ => Err(Error::NotFound),
            }
        }

        async fn consistency_proof(&self, first: u64, second: u64) -> Result<LogConsistencyProof> {
            *self.consistency_calls.lock().unwrap() += 1;
            Ok(self.log.lock().unwrap().consistency_proof(first, second))
        }
    }

    fn log_of(n: usize) -> LogBuilder {
        let mut log = LogBuilder::new();
        for i in 0..n {
            log.append(format!("record {i}").as_bytes());
        }
        log
    }

    #[tokio::test]
    async fn test_verify_inclusion_of_record() {
        let mut builder = log_of(5);
        let leaf = builder.append(b"mine");
        builder.append(b"later");
        let log = MemoryLog::new(builder);

        let head = log.tree_head(HEAD).await.unwrap();
        log.verify_inclusion(&head, &leaf).await.unwrap();

        // Not yet present at size 5
        let early = log.tree_head(5).await.unwrap();
        assert!(log.verify_inclusion(&early, &leaf).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_inclusion_empty_log_fails() {
        let log = MemoryLog::new(LogBuilder::new());
        let head = log.tree_head(HEAD).await.unwrap();
        assert!(matches!(
            log.verify_inclusion(&head, &[0u8; 32]).await,
            Err(Error::VerificationFailed(ProofKind::LogInclusion))
        ));
    }

    #[tokio::test]
    async fn test_verify_consistency_either_order() {
        let log = MemoryLog::new(log_of(9));
        let small = log.tree_head(3).await.unwrap();
        let big = log.tree_head(9).await.unwrap();
        log.verify_consistency(&small, &big).await.unwrap();
        log.verify_consistency(&big, &small).await.unwrap();
    }

    #[tokio::test]
    async fn test_equal_heads_need_no_proof() {
        let log = MemoryLog::new(log_of(4));
        let head = log.tree_head(4).await.unwrap();
        log.verify_consistency(&head, &head).await.unwrap();
        assert_eq!(*log.consistency_calls.lock().unwrap(), 0);

        let forged = LogTreeHead::new(4, [1u8; 32]);
        assert!(log.verify_consistency(&head, &forged).await.is_err());
    }

    #[tokio::test]
    async fn test_verified_latest_keeps_newer_prev() {
        let log = MemoryLog::new(log_of(10));
        let latest = log.verified_latest_tree_head(None).await.unwrap();
        assert_eq!(latest.tree_size, 10);

        // Replica falls behind
        *log.head_size.lock().unwrap() = Some(7);
        let again = log.verified_latest_tree_head(Some(&latest)).await.unwrap();
        assert_eq!(again, latest);
    }

    #[tokio::test]
    async fn test_verified_tree_head_fast_path() {
        let log = MemoryLog::new(log_of(6));
        let prev = log.tree_head(6).await.unwrap();
        let same = log.verified_tree_head(Some(&prev), 6).await.unwrap();
        assert_eq!(same, prev);
        assert_eq!(*log.consistency_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verified_tree_head_rejects_fork() {
        let honest = MemoryLog::new(log_of(6));
        let prev = honest.tree_head(4).await.unwrap();

        let mut forked = LogBuilder::new();
        for i in 0..6 {
            forked.append(format!("other {i}").as_bytes());
        }
        let forked = MemoryLog::new(forked);
        assert!(matches!(
            forked.verified_tree_head(Some(&prev), HEAD).await,
            Err(Error::VerificationFailed(ProofKind::LogConsistency))
        ));
    }
}
