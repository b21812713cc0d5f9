//! In-memory channel-based mesh.
//!
//! Uses a tokio broadcast channel for pub/sub within a single process. Every
//! node built with `with_shared` sees every message and keeps the ones whose
//! type matches a subscribed topic, which is how tunneling by function name
//! reaches the right node. Ideal for local development and testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use super::{dispatch_to_handlers, Mesh, Message, MessageHandler, Pod, Result, Subscriptions};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process mesh using a tokio broadcast channel.
pub struct ChannelMesh {
    /// Broadcast sender shared by every linked mesh.
    sender: broadcast::Sender<Arc<Message>>,
    /// Registered topic handlers.
    subscriptions: Subscriptions,
    /// Flag indicating if consumer task is running.
    consuming: Arc<RwLock<bool>>,
}

impl Default for ChannelMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMesh {
    /// Create a new mesh with its own channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self::from_sender(sender)
    }

    fn from_sender(sender: broadcast::Sender<Arc<Message>>) -> Self {
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            consuming: Arc::new(RwLock::new(false)),
        }
    }

    /// Create a new mesh member that shares this channel but has its own
    /// subscriptions (a second node in the same process).
    pub fn with_shared(&self) -> Self {
        Self::from_sender(self.sender.clone())
    }

    async fn start_consuming_impl(&self) -> Result<()> {
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        let mut receiver = self.sender.subscribe();
        let subscriptions = self.subscriptions.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        debug!(msg_type = %msg.msg_type, uuid = %msg.uuid, "Received message via channel");
                        dispatch_to_handlers(&subscriptions, &msg).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        info!("Channel mesh consumer started");
        Ok(())
    }
}

/// Pod writing into the shared broadcast channel.
pub struct ChannelPod {
    sender: broadcast::Sender<Arc<Message>>,
}

impl ChannelPod {
    fn publish(&self, msg: Message) {
        let msg_type = msg.msg_type.clone();
        match self.sender.send(Arc::new(msg)) {
            Ok(receivers) => {
                debug!(msg_type = %msg_type, receivers, "Published message to channel");
            }
            Err(_) => {
                // No receivers, that's okay for publish-only scenarios
                debug!(msg_type = %msg_type, "Published message (no receivers)");
            }
        }
    }
}

impl Drop for ChannelPod {
    fn drop(&mut self) {
        debug!("Channel pod disconnected");
    }
}

#[async_trait]
impl Pod for ChannelPod {
    async fn send(&self, msg: Message) -> Result<()> {
        self.publish(msg);
        Ok(())
    }

    async fn tunnel(&self, capability: &str, msg: Message) -> Result<()> {
        // Routing is by message type; every member filters on its own topics.
        debug!(capability = %capability, "Tunneling message via channel");
        self.publish(msg);
        Ok(())
    }
}

#[async_trait]
impl Mesh for ChannelMesh {
    fn connect(&self) -> Box<dyn Pod> {
        Box::new(ChannelPod {
            sender: self.sender.clone(),
        })
    }

    async fn subscribe(&self, topic: &str, handler: Box<dyn MessageHandler>) -> Result<()> {
        let count = {
            let mut subs = self.subscriptions.write().await;
            subs.push((topic.to_string(), handler));
            subs.len()
        };

        info!(topic = %topic, handler_count = count, "Handler subscribed to channel mesh");
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        self.start_consuming_impl().await
    }

    async fn receive(&self, msg: Message) -> Result<()> {
        let _ = self.sender.send(Arc::new(msg));
        Ok(())
    }
}
