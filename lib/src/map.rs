//! Verified access to a remote map.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::entry::{EntryFormat, UploadableEntry, VerifiableEntry};
use crate::error::{Error, ProofKind, Result};
use crate::log::VerifiableLog;
use crate::map_proof::parse_audit_path;
use crate::types::{AddEntryResponse, Hash, MapInclusionProof, MapTreeHead, MapTreeState, HEAD};

/// Value for one key as returned by the server, before any checking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMapValue {
    /// Encoded value, empty when the key is not set.
    pub body: Vec<u8>,
    /// Tree size the server answered at. Concrete even when HEAD was asked for.
    pub tree_size: u64,
    /// Raw audit path header values, `index/hex` tokens separated by commas.
    pub proof_headers: Vec<String>,
}

/// Transport for the map's own endpoints.
#[async_trait]
pub trait MapService: Send + Sync {
    /// Raw map head at `tree_size`, or the latest for [`HEAD`].
    async fn tree_head(&self, tree_size: u64) -> Result<MapTreeHead>;

    /// Value of `key` at `tree_size`, requested in the format selected by `format_suffix`.
    async fn get_value(
        &self,
        key: &[u8],
        tree_size: u64,
        format_suffix: &str,
    ) -> Result<RawMapValue>;

    async fn set(&self, key: &[u8], value: &UploadableEntry) -> Result<AddEntryResponse>;

    /// Set `key` only if its current leaf hash is `previous_leaf_hash`. The
    /// server enforces the precondition.
    async fn update(
        &self,
        key: &[u8],
        value: &UploadableEntry,
        previous_leaf_hash: &Hash,
    ) -> Result<AddEntryResponse>;

    async fn delete(&self, key: &[u8]) -> Result<AddEntryResponse>;
}

/// Backoff settings for [`VerifiableMap::block_until_size`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait after a poll that saw progress. Doubles on every poll that did not.
    pub initial_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { initial_backoff: Duration::from_secs(1) }
    }
}

/// A map together with its mutation log and tree head log.
pub struct VerifiableMap<S, L> {
    service: S,
    mutation_log: L,
    tree_head_log: L,
    poll: PollConfig,
}

impl<S: MapService, L: VerifiableLog> VerifiableMap<S, L> {
    pub fn new(service: S, mutation_log: L, tree_head_log: L) -> Self {
        Self { service, mutation_log, tree_head_log, poll: PollConfig::default() }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Log of every mutation applied to the map. Read only.
    pub fn mutation_log(&self) -> &L {
        &self.mutation_log
    }

    /// Log of every root hash the map has published. Read only.
    pub fn tree_head_log(&self) -> &L {
        &self.tree_head_log
    }

    /// Raw, unverified map head.
    pub async fn tree_head(&self, tree_size: u64) -> Result<MapTreeHead> {
        self.service.tree_head(tree_size).await
    }

    /// Fetch the value of `key` at `tree_size` together with its audit path.
    ///
    /// Nothing here is verified. Use [`VerifiableMap::verified_get`] unless the
    /// proof is checked separately.
    pub async fn get(
        &self,
        key: &[u8],
        tree_size: u64,
        format: EntryFormat,
    ) -> Result<MapInclusionProof> {
        let raw = self.service.get_value(key, tree_size, format.format_suffix()).await?;
        let audit_path = parse_audit_path(raw.proof_headers.as_slice())?;
        Ok(MapInclusionProof {
            value: format.decode(&raw.body),
            tree_size: raw.tree_size,
            audit_path,
            key: key.to_vec(),
        })
    }

    /// Value of `key` in `state`, proven against the state's map root.
    pub async fn verified_get(
        &self,
        key: &[u8],
        state: &MapTreeState,
        format: EntryFormat,
    ) -> Result<VerifiableEntry> {
        let proof = self.get(key, state.tree_size(), format).await?;
        if proof.tree_size != state.tree_size() {
            debug!(
                asked = state.tree_size(),
                answered = proof.tree_size,
                "value proof for wrong tree size"
            );
            return Err(Error::VerificationFailed(ProofKind::MapInclusion));
        }
        proof.verify(&state.map_tree_head)?;
        Ok(proof.value)
    }

    pub async fn set(&self, key: &[u8], value: &UploadableEntry) -> Result<AddEntryResponse> {
        self.service.set(key, value).await
    }

    pub async fn update(
        &self,
        key: &[u8],
        value: &UploadableEntry,
        previous_leaf_hash: &Hash,
    ) -> Result<AddEntryResponse> {
        self.service.update(key, value, previous_leaf_hash).await
    }

    /// Same as setting an empty value.
    pub async fn delete(&self, key: &[u8]) -> Result<AddEntryResponse> {
        self.service.delete(key).await
    }

    /// Map state at `tree_size`, proven to extend `prev` and to be recorded
    /// in the tree head log.
    ///
    /// The returned tree head log head may differ between calls for the same
    /// size, since every later tree head log also contains the map head.
    pub async fn verified_map_state(
        &self,
        prev: Option<&MapTreeState>,
        tree_size: u64,
    ) -> Result<MapTreeState> {
        if let Some(prev) = prev {
            if tree_size != HEAD && prev.tree_size() == tree_size {
                return Ok(*prev);
            }
        }

        let map_head = self.service.tree_head(tree_size).await?;
        debug!(size = map_head.tree_size(), "fetched map head");

        if let Some(prev) = prev {
            self.mutation_log
                .verify_consistency(
                    &prev.map_tree_head.mutation_log_tree_head,
                    &map_head.mutation_log_tree_head,
                )
                .await?;
            debug!(from = prev.tree_size(), to = map_head.tree_size(), "mutation log consistent");
        }

        let leaf = map_head.leaf_hash()?;
        let prev_thlth = prev.map(|p| p.tree_head_log_tree_head);

        // A tree head log head we already trust is often big enough to hold
        // the new map head; try it before asking for a newer one.
        if let Some(thlth) = prev_thlth {
            if thlth.tree_size >= map_head.tree_size() {
                match self.tree_head_log.verify_inclusion(&thlth, &leaf).await {
                    Ok(()) => {
                        return Ok(MapTreeState {
                            map_tree_head: map_head,
                            tree_head_log_tree_head: thlth,
                        });
                    }
                    Err(e) => debug!(error = %e, "map head not in previous tree head log head"),
                }
            }
        }

        let thlth = self.tree_head_log.verified_latest_tree_head(prev_thlth.as_ref()).await?;
        self.tree_head_log.verify_inclusion(&thlth, &leaf).await?;
        debug!(tree_head_log_size = thlth.tree_size, "map head included in tree head log");

        Ok(MapTreeState { map_tree_head: map_head, tree_head_log_tree_head: thlth })
    }

    /// Latest map state, proven to extend `prev`.
    ///
    /// If the server reports a state that is not newer than `prev`, which can
    /// happen when it is a lagging replica, `prev` is returned unchanged.
    pub async fn verified_latest_map_state(
        &self,
        prev: Option<&MapTreeState>,
    ) -> Result<MapTreeState> {
        let state = self.verified_map_state(prev, HEAD).await?;
        if let Some(prev) = prev {
            if state.tree_size() <= prev.tree_size() {
                debug!(
                    seen = state.tree_size(),
                    kept = prev.tree_size(),
                    "map state not newer, keeping previous"
                );
                return Ok(*prev);
            }
        }
        info!(size = state.tree_size(), "accepted map state");
        Ok(state)
    }

    /// Wait until the map reaches at least `tree_size` entries.
    ///
    /// Polls the raw head: nothing returned here is verified. The wait
    /// between polls resets whenever the size grew and doubles when it did not.
    pub async fn block_until_size(&self, tree_size: u64) -> Result<MapTreeHead> {
        let mut last_size: Option<u64> = None;
        let mut wait = self.poll.initial_backoff;
        loop {
            let head = self.service.tree_head(HEAD).await?;
            if head.tree_size() >= tree_size {
                return Ok(head);
            }
            if last_size.map_or(true, |last| head.tree_size() > last) {
                last_size = Some(head.tree_size());
                wait = self.poll.initial_backoff;
            } else {
                wait = wait.saturating_mul(2);
            }
            debug!(
                size = head.tree_size(),
                target = tree_size,
                wait_ms = wait.as_millis() as u64,
                "map not there yet"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// [`VerifiableMap::block_until_size`] that gives up with
    /// [`Error::Cancelled`] once `cancel` completes.
    pub async fn block_until_size_or_cancel<F>(
        &self,
        tree_size: u64,
        cancel: F,
    ) -> Result<MapTreeHead>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            head = self.block_until_size(tree_size) => head,
            _ = cancel => Err(Error::Cancelled),
        }
    }

    /// [`VerifiableMap::block_until_size`] bounded by `deadline`.
    pub async fn block_until_size_with_deadline(
        &self,
        tree_size: u64,
        deadline: Duration,
    ) -> Result<MapTreeHead> {
        tokio::time::timeout(deadline, self.block_until_size(tree_size))
            .await
            .map_err(|_| Error::DeadlineExceeded)?
    }
}
