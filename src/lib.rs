//! meshrun - mesh worker node
//!
//! A node hosts one function on a peer mesh. It serves direct invocations
//! over HTTP and takes part in multi-step sequences: each step runs on the
//! node hosting that step's function, reports its result to the caller, and
//! forwards the request (plan and accumulated state included) to the next
//! step's node.

pub mod config;
pub mod coordinator;
pub mod fqfn;
pub mod ingress;
pub mod invoker;
pub mod mesh;
pub mod metrics;
pub mod node;
pub mod request;
pub mod sequence;
pub mod utils;
