//! The snapshot hash agreement round
//!
//! One [`SnapshotHashAgent`] drives one collect-then-vote round:
//! concurrent per-peer collection with a per-task timeout, a strict
//! supermajority tally, Lagrange recovery of the aggregate signature
//! and verification against the network's common public key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use snapsync_config::ChainConfig;
use snapsync_crypto::{hash_from_hex, hash_to_hex, PublicKey, Signature, ThresholdScheme};

use crate::client::PeerRpc;
use crate::{AgentError, Hash, Result, DEFAULT_COLLECT_TIMEOUT};

/// One peer's contribution to a voting round, indexed by the peer's
/// ordinal in the node list.
#[derive(Debug, Clone)]
pub struct PeerVote {
    /// The snapshot hash the peer claims
    pub hash: Hash,
    /// The peer's signature share over that hash
    pub signature: Signature,
    /// The peer's public key share
    pub public_key: PublicKey,
}

/// The outcome of a successful voting round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotedHash {
    /// The canonical snapshot hash
    pub hash: Hash,
    /// The aggregate signature over it, verified against the network's
    /// common public key
    pub signature: Signature,
}

/// Determines the canonical snapshot hash for a block via a quorum of
/// peers, and the subset of peers trustworthy enough to download from.
pub struct SnapshotHashAgent<R: PeerRpc> {
    config: ChainConfig,
    rpc: Arc<R>,
    scheme: ThresholdScheme,
    common_key: PublicKey,
    collect_timeout: Duration,
    voted: Option<VotedHash>,
    download_sources: Vec<usize>,
}

impl<R: PeerRpc + 'static> SnapshotHashAgent<R> {
    /// Create an agent over the configured node list.
    ///
    /// The threshold scheme is parameterized `t = ceil(2n/3)` over the
    /// full node set, and the common public key is decoded up front.
    pub fn new(config: ChainConfig, rpc: Arc<R>) -> Result<Self> {
        if config.own_index().is_none() {
            return Err(AgentError::OwnNodeMissing(config.own_node_id));
        }
        let n = config.node_count();
        let scheme = ThresholdScheme::new(ThresholdScheme::supermajority(n), n)?;
        let common_key = PublicKey::from_components(&config.common_public_key)?;

        Ok(Self {
            config,
            rpc,
            scheme,
            common_key,
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
            voted: None,
            download_sources: Vec::new(),
        })
    }

    /// Override the per-peer collection timeout.
    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }

    /// Query one peer for its vote.
    async fn collect_one(rpc: Arc<R>, endpoint: &str, block: u64) -> Result<PeerVote> {
        let signature = rpc.snapshot_signature(endpoint, block).await?;
        let info = rpc.node_info(endpoint).await?;

        Ok(PeerVote {
            hash: hash_from_hex(&signature.hash)?,
            signature: Signature::from_coordinates(
                &signature.signature_share_x,
                &signature.signature_share_y,
            )?,
            public_key: PublicKey::from_components(&info.components())?,
        })
    }

    /// Fan out to every peer except self and collect their votes.
    ///
    /// Each task owns exactly one slot of the returned vector; RPC
    /// failures, malformed responses and timeouts leave the slot empty
    /// and never abort the round.
    async fn collect(&self, block: u64) -> Vec<Option<PeerVote>> {
        let n = self.config.node_count();
        let mut tasks = JoinSet::new();

        for (ordinal, node) in self.config.nodes.iter().enumerate() {
            if self.config.is_self(ordinal) {
                continue;
            }
            let rpc = Arc::clone(&self.rpc);
            let endpoint = node.endpoint();
            let timeout = self.collect_timeout;

            tasks.spawn(async move {
                let vote =
                    tokio::time::timeout(timeout, Self::collect_one(rpc, &endpoint, block)).await;
                let vote = match vote {
                    Ok(Ok(vote)) => Some(vote),
                    Ok(Err(err)) => {
                        warn!(peer = ordinal, endpoint = %endpoint, error = %err,
                            "failed to collect snapshot signature");
                        None
                    }
                    Err(_) => {
                        warn!(peer = ordinal, endpoint = %endpoint,
                            "timed out collecting snapshot signature");
                        None
                    }
                };
                (ordinal, vote)
            });
        }

        let mut slots: Vec<Option<PeerVote>> = vec![None; n];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ordinal, vote)) => slots[ordinal] = vote,
                Err(err) => warn!(error = %err, "collection task failed"),
            }
        }
        slots
    }

    /// Verify every collected share against its own public key share.
    ///
    /// A single invalid share is a hard fault: it proves active forgery
    /// rather than an unresponsive peer.
    fn verify_collected(&self, slots: &[Option<PeerVote>]) -> Result<()> {
        for (ordinal, slot) in slots.iter().enumerate() {
            if let Some(vote) = slot {
                if !self.scheme.verify(&vote.hash, &vote.signature, &vote.public_key) {
                    return Err(AgentError::ShareVerification { peer: ordinal });
                }
            }
        }
        Ok(())
    }

    /// Tally the collected votes and try to establish the canonical
    /// hash.
    ///
    /// Returns `Ok(None)` when no hash reaches the supermajority or the
    /// recovered aggregate signature does not verify (negative but
    /// expected outcomes). Only a forged individual share is an error.
    pub fn vote_for_hash(&mut self, slots: &[Option<PeerVote>]) -> Result<Option<VotedHash>> {
        self.verify_collected(slots)?;

        let n = self.config.node_count();
        let mut tally: HashMap<Hash, usize> = HashMap::new();
        for vote in slots.iter().flatten() {
            *tally.entry(vote.hash).or_default() += 1;
        }

        let winner = tally
            .iter()
            .find(|(_, count)| 3 * **count > 2 * n)
            .map(|(hash, _)| *hash);
        let Some(winner) = winner else {
            warn!("not enough votes to choose a snapshot hash");
            return Ok(None);
        };

        let mut contributors = Vec::new();
        let mut indices = Vec::new();
        let mut shares = Vec::new();
        for (ordinal, slot) in slots.iter().enumerate() {
            if let Some(vote) = slot {
                if vote.hash == winner {
                    contributors.push(ordinal);
                    // interpolation points are 1-based
                    indices.push(ordinal as u64 + 1);
                    shares.push(vote.signature);
                }
            }
        }

        let aggregate = match self
            .scheme
            .lagrange_coeffs(&indices)
            .and_then(|coeffs| self.scheme.recover_signature(&shares, &coeffs))
        {
            Ok(aggregate) => aggregate,
            Err(err) => {
                warn!(error = %err, "failed to recover aggregate signature");
                return Ok(None);
            }
        };

        if !self.scheme.verify(&winner, &aggregate, &self.common_key) {
            warn!("aggregate signature failed verification against the common public key");
            return Ok(None);
        }

        debug!(hash = %hash_to_hex(&winner), contributors = ?contributors, "hash vote succeeded");
        self.download_sources = contributors;
        let voted = VotedHash {
            hash: winner,
            signature: aggregate,
        };
        self.voted = Some(voted.clone());
        Ok(Some(voted))
    }

    /// Drive one full round for `block` and return the RPC endpoints of
    /// exactly the peers whose reported hash won the vote.
    ///
    /// An empty list means no canonical snapshot hash could be
    /// established for the block.
    pub async fn nodes_to_download_snapshot_from(&mut self, block: u64) -> Result<Vec<String>> {
        let slots = self.collect(block).await;
        let collected = slots.iter().filter(|s| s.is_some()).count();
        debug!(block, collected, "collected peer votes");

        match self.vote_for_hash(&slots)? {
            Some(voted) => {
                info!(block, hash = %hash_to_hex(&voted.hash), "established canonical snapshot hash");
                Ok(self
                    .download_sources
                    .iter()
                    .map(|ordinal| self.config.nodes[*ordinal].endpoint())
                    .collect())
            }
            None => {
                warn!(block, "no canonical snapshot hash could be established");
                Ok(Vec::new())
            }
        }
    }

    /// The result of the last successful voting round.
    ///
    /// # Panics
    ///
    /// Calling this before a round has succeeded, or after a round that
    /// produced a degenerate value, is a programming error and panics.
    pub fn voted_hash(&self) -> &VotedHash {
        let voted = self
            .voted
            .as_ref()
            .expect("voted hash queried before a successful voting round");
        assert!(voted.hash != [0u8; 32], "voted hash is zero");
        assert!(!voted.signature.is_identity(), "voted signature is degenerate");
        voted
    }
}
