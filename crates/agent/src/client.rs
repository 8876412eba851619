//! Peer RPC client interface
//!
//! The hash agent talks to peers through [`PeerRpc`], so tests inject
//! doubles and deployments choose their transport. [`HttpPeerRpc`] is
//! the production implementation over JSON-RPC/HTTP.

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::HttpClientBuilder;
use jsonrpsee::rpc_params;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{AgentError, Result, DEFAULT_COLLECT_TIMEOUT, NODE_INFO_METHOD,
    SNAPSHOT_SIGNATURE_METHOD};

/// Response of `snapsync_getSnapshotSignature`: the peer's claimed
/// snapshot hash and its signature share over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResponse {
    /// Hex-encoded 32-byte snapshot hash
    pub hash: String,
    /// Affine x coordinate of the G1 signature share
    pub signature_share_x: String,
    /// Affine y coordinate of the G1 signature share
    pub signature_share_y: String,
}

/// Response of `snapsync_getNodeInfo`: the peer's public key share as
/// four field-element components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoResponse {
    /// Component x.c0 of the G2 public key share
    pub public_key_share0: String,
    /// Component x.c1 of the G2 public key share
    pub public_key_share1: String,
    /// Component y.c0 of the G2 public key share
    pub public_key_share2: String,
    /// Component y.c1 of the G2 public key share
    pub public_key_share3: String,
}

impl NodeInfoResponse {
    /// The four components in `[x.c0, x.c1, y.c0, y.c1]` order.
    pub fn components(&self) -> [String; 4] {
        [
            self.public_key_share0.clone(),
            self.public_key_share1.clone(),
            self.public_key_share2.clone(),
            self.public_key_share3.clone(),
        ]
    }
}

/// Client interface for the two peer RPCs the hash agent consumes.
#[async_trait]
pub trait PeerRpc: Send + Sync {
    /// Fetch the peer's claimed hash and signature share for `block`.
    async fn snapshot_signature(&self, endpoint: &str, block: u64) -> Result<SignatureResponse>;

    /// Fetch the peer's public key share.
    async fn node_info(&self, endpoint: &str) -> Result<NodeInfoResponse>;
}

/// JSON-RPC/HTTP implementation of [`PeerRpc`].
#[derive(Debug, Clone)]
pub struct HttpPeerRpc {
    request_timeout: Duration,
}

impl HttpPeerRpc {
    /// Create a client with the default request timeout
    pub fn new() -> Self {
        Self {
            request_timeout: DEFAULT_COLLECT_TIMEOUT,
        }
    }

    /// Override the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn rpc_error(endpoint: &str, err: impl std::fmt::Display) -> AgentError {
        AgentError::Rpc {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

impl Default for HttpPeerRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerRpc for HttpPeerRpc {
    async fn snapshot_signature(&self, endpoint: &str, block: u64) -> Result<SignatureResponse> {
        let client = HttpClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(endpoint)
            .map_err(|e| Self::rpc_error(endpoint, e))?;
        client
            .request(SNAPSHOT_SIGNATURE_METHOD, rpc_params![block])
            .await
            .map_err(|e| Self::rpc_error(endpoint, e))
    }

    async fn node_info(&self, endpoint: &str) -> Result<NodeInfoResponse> {
        let client = HttpClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(endpoint)
            .map_err(|e| Self::rpc_error(endpoint, e))?;
        client
            .request(NODE_INFO_METHOD, rpc_params![])
            .await
            .map_err(|e| Self::rpc_error(endpoint, e))
    }
}
