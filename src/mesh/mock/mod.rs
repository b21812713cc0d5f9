//! Mock mesh implementation for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use super::{Mesh, MeshError, Message, MessageHandler, Pod, Result, Subscriptions};

/// How a recorded message left the pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendKind {
    Broadcast,
    Tunnel { capability: String },
}

/// A message captured by `MockMesh`.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub kind: SendKind,
    pub message: Message,
}

/// Mock mesh that records everything sent through its pods.
#[derive(Default)]
pub struct MockMesh {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    open_pods: Arc<AtomicUsize>,
    pods_opened: AtomicUsize,
    fail_on_send: Arc<AtomicBool>,
    subscriptions: Subscriptions,
}

impl MockMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        self.fail_on_send.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Messages sent with `Pod::send`.
    pub async fn broadcasts(&self) -> Vec<Message> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| s.kind == SendKind::Broadcast)
            .map(|s| s.message.clone())
            .collect()
    }

    /// Messages sent with `Pod::tunnel`, paired with their capability.
    pub async fn tunnels(&self) -> Vec<(String, Message)> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|s| match &s.kind {
                SendKind::Tunnel { capability } => Some((capability.clone(), s.message.clone())),
                SendKind::Broadcast => None,
            })
            .collect()
    }

    pub async fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock().await)
    }

    /// Pods currently connected.
    pub fn open_pods(&self) -> usize {
        self.open_pods.load(Ordering::SeqCst)
    }

    /// Pods connected over the mesh's lifetime.
    pub fn pods_opened(&self) -> usize {
        self.pods_opened.load(Ordering::SeqCst)
    }

    /// Run every handler subscribed to the message's type to completion.
    pub async fn deliver(&self, msg: Message) -> Result<()> {
        let msg = Arc::new(msg);
        let futures: Vec<_> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|(topic, _)| *topic == msg.msg_type)
                .map(|(_, handler)| handler.handle(Arc::clone(&msg)))
                .collect()
        };
        for fut in futures {
            fut.await?;
        }
        Ok(())
    }
}

/// Pod handed out by `MockMesh`.
pub struct MockPod {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    open_pods: Arc<AtomicUsize>,
    fail_on_send: Arc<AtomicBool>,
}

impl MockPod {
    async fn record(&self, kind: SendKind, message: Message) -> Result<()> {
        if self.fail_on_send.load(Ordering::SeqCst) {
            return Err(MeshError::Publish("Mock send failure".to_string()));
        }
        self.sent.lock().await.push(SentMessage { kind, message });
        Ok(())
    }
}

impl Drop for MockPod {
    fn drop(&mut self) {
        self.open_pods.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Pod for MockPod {
    async fn send(&self, msg: Message) -> Result<()> {
        self.record(SendKind::Broadcast, msg).await
    }

    async fn tunnel(&self, capability: &str, msg: Message) -> Result<()> {
        self.record(
            SendKind::Tunnel {
                capability: capability.to_string(),
            },
            msg,
        )
        .await
    }
}

#[async_trait]
impl Mesh for MockMesh {
    fn connect(&self) -> Box<dyn Pod> {
        self.open_pods.fetch_add(1, Ordering::SeqCst);
        self.pods_opened.fetch_add(1, Ordering::SeqCst);
        Box::new(MockPod {
            sent: self.sent.clone(),
            open_pods: self.open_pods.clone(),
            fail_on_send: self.fail_on_send.clone(),
        })
    }

    async fn subscribe(&self, topic: &str, handler: Box<dyn MessageHandler>) -> Result<()> {
        self.subscriptions
            .write()
            .await
            .push((topic.to_string(), handler));
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        Ok(())
    }

    async fn receive(&self, msg: Message) -> Result<()> {
        self.deliver(msg).await
    }
}

/// Handler that records every message it receives.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<Message>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Arc<Mutex<Vec<Message>>> {
        self.received.clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, msg: Arc<Message>) -> BoxFuture<'static, Result<()>> {
        let received = self.received.clone();
        Box::pin(async move {
            received.lock().await.push((*msg).clone());
            Ok(())
        })
    }
}
