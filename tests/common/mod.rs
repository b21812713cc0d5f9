//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use meshrun::config::{Config, NodeConfig, RunnableOverride};
use meshrun::mesh::{MeshConfig, Message};
use meshrun::sequence::{CallableFn, Sequence, Step};

pub const PROC_UUID: &str = "0b7e3a52-4c1d-4f8e-9d2a-6e5f4c3b2a10";

pub fn fqfn(name: &str) -> String {
    format!("acme#default::{name}@v1")
}

/// Resolve a node configuration for a function given by FQFN.
pub fn node_config(fqfn: &str, mesh: MeshConfig) -> NodeConfig {
    Config {
        runnable: fqfn.to_string(),
        uuid: Some(PROC_UUID.to_string()),
        mesh,
        ..Default::default()
    }
    .resolve_with(RunnableOverride::default())
    .unwrap()
}

/// Serialized plan running the named functions in order.
pub fn plan(names: &[&str]) -> Vec<u8> {
    Sequence::new(
        names
            .iter()
            .map(|n| Step::callable(CallableFn::new(*n, fqfn(n))))
            .collect(),
    )
    .unwrap()
    .steps_json()
    .unwrap()
}

/// Wait until at least `count` messages were recorded.
pub async fn wait_for_messages(received: &Arc<Mutex<Vec<Message>>>, count: usize) -> Vec<Message> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let messages = received.lock().await;
                if messages.len() >= count {
                    return messages.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for messages")
}
