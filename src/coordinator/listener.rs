//! Mesh listener: run the local function for each message addressed to this
//! node, then hand the result to the coordinator.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use super::SequenceCoordinator;
use crate::invoker::{FunctionInvoker, Invocation};
use crate::mesh::{self, Mesh, Message, MessageHandler};
use crate::request::CoordinatedRequest;

/// Message handler that invokes the local function and coordinates the step.
pub struct StepHandler {
    invoker: Arc<dyn FunctionInvoker>,
    coordinator: Arc<SequenceCoordinator>,
}

impl StepHandler {
    pub fn new(invoker: Arc<dyn FunctionInvoker>, coordinator: Arc<SequenceCoordinator>) -> Self {
        Self {
            invoker,
            coordinator,
        }
    }
}

impl MessageHandler for StepHandler {
    fn handle(&self, msg: Arc<Message>) -> BoxFuture<'static, mesh::Result<()>> {
        let invoker = self.invoker.clone();
        let coordinator = self.coordinator.clone();

        Box::pin(async move {
            if !coordinator.admit(&msg) {
                return Ok(());
            }

            let invocation = match CoordinatedRequest::from_json(&msg.data) {
                Ok(req) => {
                    debug!(request_id = %req.id, fqfn = %msg.msg_type, "Invoking function for mesh message");
                    let invocation = invoker.invoke(&req).await;
                    coordinator.metrics().record_invocation(&invocation);
                    invocation
                }
                // The coordinator rejects the payload itself; nothing to run.
                Err(e) => Invocation::ExecutionFailure(e.to_string()),
            };

            // Protocol errors are logged by the coordinator and never retried.
            let _ = coordinator.process_step(&msg, invocation).await;
            Ok(())
        })
    }
}

/// Subscribe to the coordinator's FQFN and start consuming.
///
/// Each matching message runs on its own task, concurrently with other
/// messages and with ingress calls.
pub async fn listen_and_run(
    mesh: Arc<dyn Mesh>,
    invoker: Arc<dyn FunctionInvoker>,
    coordinator: Arc<SequenceCoordinator>,
) -> mesh::Result<()> {
    let topic = coordinator.fqfn().to_string();
    mesh.subscribe(&topic, Box::new(StepHandler::new(invoker, coordinator)))
        .await?;
    mesh.start_consuming().await?;
    info!(topic = %topic, "Listening for sequence steps");
    Ok(())
}
