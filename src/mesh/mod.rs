//! Mesh pub/sub bus.
//!
//! This module contains:
//! - `Message`: the envelope routed between peers
//! - `Mesh` trait: advertise capability, subscribe, open pods
//! - `Pod` trait: a transient connection used to send or tunnel messages
//! - Mesh configuration types and the `init_mesh` factory
//! - Implementations: in-process channel, static-peer HTTP, mock

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::utils::encoding;

// Implementation modules
pub mod channel;
pub mod peers;
pub mod mock;

// Re-exports
pub use channel::ChannelMesh;
pub use peers::{HttpMesh, Peer, MESSAGE_PATH};
pub use mock::{MockMesh, RecordingHandler, SentMessage};

// ============================================================================
// Envelope
// ============================================================================

/// Message routed across the mesh.
///
/// `msg_type` is the routing topic: either a function FQFN (invoke it) or a
/// reserved type such as the function-result report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    /// Correlation id linking this message to an originating request.
    pub parent_id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, with = "encoding::bytes")]
    pub data: Vec<u8>,
    /// Stamped on receipt when the sender omits it.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::with_parent(msg_type, String::new(), data)
    }

    pub fn with_parent(
        msg_type: impl Into<String>,
        parent_id: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            parent_id: parent_id.into(),
            msg_type: msg_type.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Result type for mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors that can occur during mesh operations.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("No peer hosts capability '{0}'")]
    NoPeer(String),

    #[error("Handler failed: {0}")]
    Handler(String),
}

/// Handler for messages received on a subscribed topic.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, msg: Arc<Message>) -> BoxFuture<'static, Result<()>>;
}

/// A transient connection to the mesh, scoped to one operation.
///
/// Dropping the pod disconnects it.
#[async_trait]
pub trait Pod: Send + Sync {
    /// Broadcast a message to every peer.
    async fn send(&self, msg: Message) -> Result<()>;

    /// Send a message to whichever peer hosts `capability`.
    async fn tunnel(&self, capability: &str, msg: Message) -> Result<()>;
}

/// Peer mesh the node belongs to.
#[async_trait]
pub trait Mesh: Send + Sync {
    /// Open a pod for sending.
    fn connect(&self) -> Box<dyn Pod>;

    /// Register a handler for messages whose type equals `topic`.
    async fn subscribe(&self, topic: &str, handler: Box<dyn MessageHandler>) -> Result<()>;

    /// Start delivering messages to subscribed handlers.
    async fn start_consuming(&self) -> Result<()>;

    /// Accept a message that arrived from a remote peer.
    async fn receive(&self, msg: Message) -> Result<()>;
}

/// Topic subscriptions shared by mesh implementations.
pub(crate) type Subscriptions = Arc<RwLock<Vec<(String, Box<dyn MessageHandler>)>>>;

/// Spawn every handler subscribed to the message's type.
///
/// Each handler runs on its own task so distinct messages are processed
/// concurrently.
pub(crate) async fn dispatch_to_handlers(subscriptions: &Subscriptions, msg: &Arc<Message>) {
    let futures: Vec<_> = {
        let subs = subscriptions.read().await;
        subs.iter()
            .filter(|(topic, _)| *topic == msg.msg_type)
            .map(|(_, handler)| handler.handle(Arc::clone(msg)))
            .collect()
    };

    for fut in futures {
        let msg_type = msg.msg_type.clone();
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                error!(msg_type = %msg_type, error = %e, "Message handler failed");
            }
        });
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Mesh backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshType {
    /// In-process broadcast channel.
    #[default]
    Channel,
    /// Static peers over HTTP.
    Http,
}

/// Mesh configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    #[serde(rename = "type")]
    pub mesh_type: MeshType,
    /// Static peers, format `"capability=url,capability=url"`.
    pub peers: String,
    /// Application identifier override; defaults to the FQFN identifier.
    pub identifier: Option<String>,
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the mesh for a node hosting `capability` in application
/// `identifier`.
///
/// Static peers whose capability names a different application are left out.
pub fn init_mesh(config: &MeshConfig, capability: &str, identifier: &str) -> Result<Arc<dyn Mesh>> {
    match config.mesh_type {
        MeshType::Channel => {
            info!(mesh_type = "channel", capability = %capability, "Mesh initialized");
            Ok(Arc::new(ChannelMesh::new()))
        }
        MeshType::Http => {
            let (peers, foreign): (Vec<_>, Vec<_>) = Peer::parse_list(&config.peers)
                .into_iter()
                .partition(|peer| peer.belongs_to(identifier));
            for peer in &foreign {
                warn!(
                    peer = %peer.url,
                    capability = %peer.capability,
                    identifier = %identifier,
                    "Ignoring peer from another application"
                );
            }
            let mesh = HttpMesh::new(capability, peers)?;
            info!(
                mesh_type = "http",
                capability = %capability,
                identifier = %identifier,
                peers = mesh.peer_count(),
                "Mesh initialized"
            );
            Ok(Arc::new(mesh))
        }
    }
}
