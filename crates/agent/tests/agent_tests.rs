//! Integration tests for the snapshot hash agreement round
//!
//! Peers are mocked with deterministic threshold key shares derived
//! from the polynomial f(x) = 5 + 4x + 2x²; the group secret is f(0).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use snapsync_agent::{
    AgentError, Hash, NodeInfoResponse, PeerRpc, SignatureResponse, SnapshotHashAgent,
};
use snapsync_config::{ChainConfig, NodeInfo, VolumeSpec};
use snapsync_crypto::{hash_to_hex, sha256, SecretKeyShare, ThresholdScheme};

fn secret_share(index: u64) -> SecretKeyShare {
    let value = 5 + 4 * index + 2 * index * index;
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&value.to_be_bytes());
    SecretKeyShare::from_bytes(&bytes).unwrap()
}

fn config(n: u64) -> ChainConfig {
    let nodes = (1..=n)
        .map(|id| NodeInfo {
            id,
            ip: format!("10.0.0.{id}"),
            rpc_port: 1234,
        })
        .collect();
    ChainConfig {
        data_dir: PathBuf::from("/var/lib/snapsync"),
        volumes: vec![VolumeSpec::database("state")],
        nodes,
        own_node_id: 1,
        common_public_key: secret_share(0).public_key().to_components(),
    }
}

#[derive(Clone)]
enum PeerBehavior {
    /// Signs the hash it reports with its real share
    Honest { index: u64, hash: Hash },
    /// Reports one hash but signs another, a forged share
    Forged { index: u64, hash: Hash },
    /// Honest, but only after a long delay
    Slow {
        index: u64,
        hash: Hash,
        delay: Duration,
    },
    /// Every RPC fails
    Unreachable,
}

struct MockRpc {
    peers: HashMap<String, PeerBehavior>,
}

impl MockRpc {
    /// Behaviors keyed by peer ordinal (0-based); the share index of
    /// ordinal `i` is `i + 1`.
    fn new(behaviors: Vec<(u64, PeerBehavior)>) -> Arc<Self> {
        let peers = behaviors
            .into_iter()
            .map(|(id, behavior)| (format!("http://10.0.0.{id}:1234"), behavior))
            .collect();
        Arc::new(Self { peers })
    }

    fn signature_response(index: u64, reported: &Hash, signed: &Hash) -> SignatureResponse {
        let signature = secret_share(index).sign(signed);
        let (x, y) = signature.to_coordinates();
        SignatureResponse {
            hash: hash_to_hex(reported),
            signature_share_x: x,
            signature_share_y: y,
        }
    }

    fn unreachable(endpoint: &str) -> AgentError {
        AgentError::Rpc {
            endpoint: endpoint.to_string(),
            message: "connection refused".into(),
        }
    }
}

#[async_trait]
impl PeerRpc for MockRpc {
    async fn snapshot_signature(
        &self,
        endpoint: &str,
        _block: u64,
    ) -> snapsync_agent::Result<SignatureResponse> {
        match self.peers.get(endpoint) {
            Some(PeerBehavior::Honest { index, hash }) => {
                Ok(Self::signature_response(*index, hash, hash))
            }
            Some(PeerBehavior::Forged { index, hash }) => {
                Ok(Self::signature_response(*index, hash, &sha256(b"forged")))
            }
            Some(PeerBehavior::Slow { index, hash, delay }) => {
                tokio::time::sleep(*delay).await;
                Ok(Self::signature_response(*index, hash, hash))
            }
            _ => Err(Self::unreachable(endpoint)),
        }
    }

    async fn node_info(&self, endpoint: &str) -> snapsync_agent::Result<NodeInfoResponse> {
        let index = match self.peers.get(endpoint) {
            Some(PeerBehavior::Honest { index, .. })
            | Some(PeerBehavior::Forged { index, .. })
            | Some(PeerBehavior::Slow { index, .. }) => *index,
            _ => return Err(Self::unreachable(endpoint)),
        };
        let [c0, c1, c2, c3] = secret_share(index).public_key().to_components();
        Ok(NodeInfoResponse {
            public_key_share0: c0,
            public_key_share1: c1,
            public_key_share2: c2,
            public_key_share3: c3,
        })
    }
}

#[tokio::test]
async fn supermajority_establishes_canonical_hash() {
    let h1 = sha256(b"canonical snapshot");
    // n = 4, self is ordinal 0; the three peers (ordinals 1..=3, share
    // indices 2..=4) all report h1: k = 3, 3k = 9 > 2n = 8
    let rpc = MockRpc::new(vec![
        (2, PeerBehavior::Honest { index: 2, hash: h1 }),
        (3, PeerBehavior::Honest { index: 3, hash: h1 }),
        (4, PeerBehavior::Honest { index: 4, hash: h1 }),
    ]);
    let mut agent = SnapshotHashAgent::new(config(4), rpc).unwrap();

    let sources = agent.nodes_to_download_snapshot_from(77).await.unwrap();
    assert_eq!(
        sources,
        vec![
            "http://10.0.0.2:1234",
            "http://10.0.0.3:1234",
            "http://10.0.0.4:1234"
        ]
    );

    let voted = agent.voted_hash();
    assert_eq!(voted.hash, h1);
    assert!(!voted.signature.is_identity());

    // the aggregate verifies against the network's common public key
    let scheme = ThresholdScheme::new(ThresholdScheme::supermajority(4), 4).unwrap();
    assert!(scheme.verify(&h1, &voted.signature, &secret_share(0).public_key()));
}

#[tokio::test]
async fn split_vote_yields_no_sources() {
    let h1 = sha256(b"variant one");
    let h2 = sha256(b"variant two");
    // 2 votes for h1, 1 for h2: no k satisfies 3k > 8
    let rpc = MockRpc::new(vec![
        (2, PeerBehavior::Honest { index: 2, hash: h1 }),
        (3, PeerBehavior::Honest { index: 3, hash: h1 }),
        (4, PeerBehavior::Honest { index: 4, hash: h2 }),
    ]);
    let mut agent = SnapshotHashAgent::new(config(4), rpc).unwrap();

    let sources = agent.nodes_to_download_snapshot_from(77).await.unwrap();
    assert!(sources.is_empty());
}

#[tokio::test]
async fn forged_share_aborts_the_round() {
    let h1 = sha256(b"canonical snapshot");
    let rpc = MockRpc::new(vec![
        (2, PeerBehavior::Honest { index: 2, hash: h1 }),
        (3, PeerBehavior::Forged { index: 3, hash: h1 }),
        (4, PeerBehavior::Honest { index: 4, hash: h1 }),
    ]);
    let mut agent = SnapshotHashAgent::new(config(4), rpc).unwrap();

    let result = agent.nodes_to_download_snapshot_from(77).await;
    assert!(matches!(
        result,
        Err(AgentError::ShareVerification { peer: 2 })
    ));
}

#[tokio::test]
async fn unreachable_peer_is_skipped_not_fatal() {
    let h1 = sha256(b"canonical snapshot");
    // one peer down leaves k = 2: collection succeeds, voting fails
    let rpc = MockRpc::new(vec![
        (2, PeerBehavior::Honest { index: 2, hash: h1 }),
        (3, PeerBehavior::Honest { index: 3, hash: h1 }),
        (4, PeerBehavior::Unreachable),
    ]);
    let mut agent = SnapshotHashAgent::new(config(4), rpc).unwrap();

    let sources = agent.nodes_to_download_snapshot_from(77).await.unwrap();
    assert!(sources.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_peer_times_out_instead_of_stalling_the_round() {
    let h1 = sha256(b"canonical snapshot");
    let rpc = MockRpc::new(vec![
        (2, PeerBehavior::Honest { index: 2, hash: h1 }),
        (3, PeerBehavior::Honest { index: 3, hash: h1 }),
        (
            4,
            PeerBehavior::Slow {
                index: 4,
                hash: h1,
                delay: Duration::from_secs(3600),
            },
        ),
    ]);
    let mut agent = SnapshotHashAgent::new(config(4), rpc)
        .unwrap()
        .with_collect_timeout(Duration::from_secs(5));

    // the round completes; the stalled peer counts as an empty slot
    let sources = agent.nodes_to_download_snapshot_from(77).await.unwrap();
    assert!(sources.is_empty());
}

#[tokio::test]
async fn larger_network_tolerates_minority_dissent() {
    let h1 = sha256(b"canonical snapshot");
    let h2 = sha256(b"minority snapshot");
    // n = 7, self is ordinal 0; five peers report h1, one reports h2:
    // k = 5, 3k = 15 > 2n = 14
    let mut behaviors = vec![(7, PeerBehavior::Honest { index: 7, hash: h2 })];
    for id in 2..=6 {
        behaviors.push((id, PeerBehavior::Honest { index: id, hash: h1 }));
    }
    let rpc = MockRpc::new(behaviors);
    let mut agent = SnapshotHashAgent::new(config(7), rpc).unwrap();

    let sources = agent.nodes_to_download_snapshot_from(128).await.unwrap();
    assert_eq!(sources.len(), 5);
    assert!(!sources.contains(&"http://10.0.0.7:1234".to_string()));
    assert_eq!(agent.voted_hash().hash, h1);
}

#[test]
#[should_panic(expected = "voted hash queried before a successful voting round")]
fn voted_hash_before_round_is_a_programming_error() {
    let rpc = MockRpc::new(Vec::new());
    let agent = SnapshotHashAgent::new(config(4), rpc).unwrap();
    let _ = agent.voted_hash();
}
