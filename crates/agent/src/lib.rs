//! # Snapsync Hash Agent
//!
//! Distributed agreement on the canonical snapshot hash for a block.
//!
//! A node that needs to bootstrap from a snapshot cannot trust any
//! single peer's claim about the snapshot content. Instead it runs a
//! *hash-vote round*:
//!
//! 1. **Collecting**: every peer in the network node list (self
//!    excluded) is queried concurrently for its claimed snapshot hash
//!    and a threshold-signature share over that hash, plus its public
//!    key share. Unresponsive or malformed peers simply leave their
//!    slot empty.
//! 2. **Voting**: each collected share is verified against the peer's
//!    own key share (a forged share aborts the round hard), hashes are
//!    tallied, and a hash wins only with a strict supermajority
//!    (`3k > 2n` over the full node set). The winners' shares are
//!    combined via Lagrange interpolation into an aggregate signature,
//!    which must verify against the network's common public key.
//! 3. **Done**: the round yields the voted hash plus the endpoints of
//!    exactly the peers that reported it: the set of nodes safe to
//!    download the snapshot from.
//!
//! Rounds are one-shot and stateless across invocations; a failed round
//! (no quorum, failed aggregate verification) is a negative result, not
//! an error.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod agent;
mod client;

pub use agent::{PeerVote, SnapshotHashAgent, VotedHash};
pub use client::{HttpPeerRpc, NodeInfoResponse, PeerRpc, SignatureResponse};

use std::time::Duration;
use thiserror::Error;

/// A 32-byte snapshot hash
pub type Hash = snapsync_crypto::Hash;

/// Result type for hash-agreement operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Default per-peer collection timeout
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

/// RPC method queried for a peer's snapshot hash and signature share
pub const SNAPSHOT_SIGNATURE_METHOD: &str = "snapsync_getSnapshotSignature";

/// RPC method queried for a peer's public key share
pub const NODE_INFO_METHOD: &str = "snapsync_getNodeInfo";

/// Errors raised during a hash-vote round
#[derive(Debug, Error)]
pub enum AgentError {
    /// A cryptographic primitive rejected its input
    #[error("crypto error: {0}")]
    Crypto(#[from] snapsync_crypto::CryptoError),

    /// A peer RPC call failed; collection treats this as an empty slot
    #[error("rpc to {endpoint} failed: {message}")]
    Rpc {
        /// Endpoint the call was made against
        endpoint: String,
        /// Transport or decode failure description
        message: String,
    },

    /// A collected signature share failed verification against the
    /// peer's own public key share; a forged share is a hard fault
    /// that aborts the round
    #[error("signature share from peer {peer} failed verification")]
    ShareVerification {
        /// Ordinal of the offending peer in the node list
        peer: usize,
    },

    /// The configuration does not include this node itself
    #[error("own node id {0} is not in the configured node list")]
    OwnNodeMissing(u64),
}
