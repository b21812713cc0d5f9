//! meshrun: mesh worker node
//!
//! Hosts a single function, invokes it for direct HTTP calls, and
//! coordinates sequence steps for invocations routed over the mesh.
//!
//! ## Usage
//! ```text
//! meshrun [--config node.yaml] [--stdin] <runnable>
//! ```
//!
//! ## Configuration
//! - MESHRUN_CONFIG: Path to a YAML configuration file
//! - MESHRUN_SERVER__PORT: HTTP port (random 1000-10999 when unset)
//! - MESHRUN_MESH__TYPE / MESHRUN_MESH__PEERS: mesh backend and static peers
//! - MESHRUN_UUID: Process UUID
//! - MESHRUN_RUNNABLE_IDENT / MESHRUN_RUNNABLE_VERSION: FQFN overrides
//! - MESHRUN_LOG: Log filter (default: info)

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use meshrun::config::Config;
use meshrun::invoker::CommandInvoker;
use meshrun::node::Node;
use meshrun::utils::bootstrap::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "meshrun")]
#[command(version)]
#[command(about = "Mesh worker node hosting a single function")]
struct Args {
    /// Runnable to host (path or FQFN)
    runnable: Option<String>,

    /// Path to a YAML configuration file
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Read stdin as input, print the output and exit
    #[arg(long)]
    stdin: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if let Some(runnable) = args.runnable {
        config.runnable = runnable;
    }
    if args.stdin {
        config.use_stdin = true;
    }

    let node_config = config.resolve().map_err(|e| {
        error!("Failed to resolve configuration: {}", e);
        e
    })?;

    let invoker = Arc::new(CommandInvoker::new(node_config.command.clone()));

    if node_config.use_stdin {
        let node = Node::new(node_config, invoker)?;
        node.exec_from_stdin().await?;
        return Ok(());
    }

    info!(
        name = %node_config.pretty_name,
        port = node_config.port,
        "meshrun starting"
    );

    let node = Node::new(node_config, invoker)?;
    node.start().await?;

    Ok(())
}
