//! Worker node runtime.
//!
//! A node hosts one function. It joins the mesh under the function's FQFN,
//! coordinates sequence steps for messages addressed to it, and serves the
//! synchronous HTTP ingress.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::NodeConfig;
use crate::coordinator::{listen_and_run, SequenceCoordinator};
use crate::ingress::{self, IngressError, IngressState};
use crate::invoker::FunctionInvoker;
use crate::mesh::{init_mesh, Mesh, MeshError};

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors that stop the node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ingress(#[from] IngressError),
}

/// A worker node hosting a single function.
pub struct Node {
    config: NodeConfig,
    invoker: Arc<dyn FunctionInvoker>,
    mesh: Arc<dyn Mesh>,
    coordinator: Arc<SequenceCoordinator>,
}

impl Node {
    /// Create a node, initializing the mesh from its configuration.
    pub fn new(config: NodeConfig, invoker: Arc<dyn FunctionInvoker>) -> Result<Self> {
        let mesh = init_mesh(&config.mesh, &config.job_type, &config.identifier)?;
        Ok(Self::with_mesh(config, invoker, mesh))
    }

    /// Create a node on an existing mesh.
    pub fn with_mesh(
        config: NodeConfig,
        invoker: Arc<dyn FunctionInvoker>,
        mesh: Arc<dyn Mesh>,
    ) -> Self {
        let coordinator = Arc::new(SequenceCoordinator::new(
            config.job_type.clone(),
            mesh.clone(),
            config.delivery,
        ));
        Self {
            config,
            invoker,
            mesh,
            coordinator,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn mesh(&self) -> &Arc<dyn Mesh> {
        &self.mesh
    }

    pub fn coordinator(&self) -> &Arc<SequenceCoordinator> {
        &self.coordinator
    }

    /// HTTP router for this node.
    pub fn router(&self) -> Router {
        ingress::router(IngressState {
            fqfn: self.config.job_type.clone(),
            proc_uuid: self.config.proc_uuid.clone(),
            invoker: self.invoker.clone(),
            mesh: Some(self.mesh.clone()),
            metrics: self.coordinator.metrics().clone(),
        })
    }

    /// Join the mesh so messages for this node's function are processed.
    pub async fn join_mesh(&self) -> Result<()> {
        listen_and_run(
            self.mesh.clone(),
            self.invoker.clone(),
            self.coordinator.clone(),
        )
        .await?;
        info!(
            name = %self.config.pretty_name,
            identifier = %self.config.identifier,
            capability = %self.config.job_type,
            "Joined mesh"
        );
        Ok(())
    }

    /// Bind the configured address and run until Ctrl+C.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Join the mesh and serve ingress on `listener` until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.join_mesh().await?;

        let port = listener.local_addr()?.port();
        info!(name = %self.config.pretty_name, port, "Node listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!(name = %self.config.pretty_name, "Node stopped");
        Ok(())
    }

    /// Invoke the function once with a line from stdin and print the output.
    pub async fn exec_from_stdin(&self) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        ingress::exec_from_reader(
            self.invoker.as_ref(),
            BufReader::new(tokio::io::stdin()),
            &mut stdout,
        )
        .await?;
        Ok(())
    }
}
