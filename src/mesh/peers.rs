//! Static-peer mesh over HTTP.
//!
//! Each peer is a node reachable at a base URL and hosting one capability.
//! Outbound messages are POSTed as JSON to the peer's `/meta/message`
//! endpoint; inbound messages arrive on this node's own endpoint and are
//! handed to a local channel for topic dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use super::{ChannelMesh, Mesh, MeshError, Message, MessageHandler, Pod, Result};
use crate::fqfn::Fqfn;
use crate::utils::bootstrap::parse_static_endpoints;

/// Path peers accept mesh messages on.
pub const MESSAGE_PATH: &str = "/meta/message";

/// Timeout for a single peer delivery.
const PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// A statically configured peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub capability: String,
    pub url: String,
}

impl Peer {
    /// Parse `"capability=url,capability=url"`.
    pub fn parse_list(endpoints: &str) -> Vec<Peer> {
        parse_static_endpoints(endpoints)
            .into_iter()
            .map(|(capability, url)| Peer {
                capability,
                url: url.trim_end_matches('/').to_string(),
            })
            .collect()
    }

    /// Whether the peer may serve an application with `identifier`.
    ///
    /// Peers advertising an unqualified capability belong to every
    /// application; an empty `identifier` accepts all peers.
    pub fn belongs_to(&self, identifier: &str) -> bool {
        if identifier.is_empty() {
            return true;
        }
        let fqfn = Fqfn::parse(&self.capability);
        !fqfn.is_qualified() || fqfn.identifier == identifier
    }

    fn message_url(&self) -> String {
        format!("{}{}", self.url, MESSAGE_PATH)
    }
}

/// Mesh that reaches static peers over HTTP.
pub struct HttpMesh {
    capability: String,
    peers: Arc<Vec<Peer>>,
    client: reqwest::Client,
    local: ChannelMesh,
    next_peer: Arc<AtomicUsize>,
}

impl HttpMesh {
    /// Create a mesh for a node hosting `capability`.
    pub fn new(capability: impl Into<String>, peers: Vec<Peer>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .map_err(|e| MeshError::Connection(e.to_string()))?;

        Ok(Self {
            capability: capability.into(),
            peers: Arc::new(peers),
            client,
            local: ChannelMesh::new(),
            next_peer: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// Pod that POSTs to peers and loops local traffic through the channel.
pub struct HttpPod {
    capability: String,
    peers: Arc<Vec<Peer>>,
    client: reqwest::Client,
    local: Box<dyn Pod>,
    next_peer: Arc<AtomicUsize>,
}

impl HttpPod {
    async fn post(&self, peer: &Peer, msg: &Message) -> Result<()> {
        self.client
            .post(peer.message_url())
            .json(msg)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| MeshError::Publish(format!("{}: {}", peer.url, e)))?;
        debug!(peer = %peer.url, msg_type = %msg.msg_type, "Delivered message to peer");
        Ok(())
    }
}

#[async_trait]
impl Pod for HttpPod {
    async fn send(&self, msg: Message) -> Result<()> {
        let mut urls: Vec<&Peer> = Vec::new();
        for peer in self.peers.iter() {
            if !urls.iter().any(|p| p.url == peer.url) {
                urls.push(peer);
            }
        }

        let results = join_all(urls.iter().map(|peer| self.post(peer, &msg))).await;
        self.local.send(msg).await?;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            warn!(error = %failure, "Peer delivery failed");
        }
        Err(MeshError::Publish(format!(
            "{} of {} peers unreachable",
            failures.len(),
            urls.len()
        )))
    }

    async fn tunnel(&self, capability: &str, msg: Message) -> Result<()> {
        if capability == self.capability {
            return self.local.tunnel(capability, msg).await;
        }

        let candidates: Vec<&Peer> = self
            .peers
            .iter()
            .filter(|p| p.capability == capability)
            .collect();
        if candidates.is_empty() {
            return Err(MeshError::NoPeer(capability.to_string()));
        }

        let index = self.next_peer.fetch_add(1, Ordering::Relaxed) % candidates.len();
        self.post(candidates[index], &msg).await
    }
}

#[async_trait]
impl Mesh for HttpMesh {
    fn connect(&self) -> Box<dyn Pod> {
        Box::new(HttpPod {
            capability: self.capability.clone(),
            peers: self.peers.clone(),
            client: self.client.clone(),
            local: self.local.connect(),
            next_peer: self.next_peer.clone(),
        })
    }

    async fn subscribe(&self, topic: &str, handler: Box<dyn MessageHandler>) -> Result<()> {
        self.local.subscribe(topic, handler).await
    }

    async fn start_consuming(&self) -> Result<()> {
        self.local.start_consuming().await
    }

    async fn receive(&self, msg: Message) -> Result<()> {
        self.local.receive(msg).await
    }
}
