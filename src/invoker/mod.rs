//! Function invocation seam.
//!
//! The node never inspects error types to learn how an invocation went: every
//! invoker returns a tagged `Invocation` that already says whether the
//! function succeeded, failed on its own terms, or could not be run at all.
//!
//! Implementations:
//! - `CommandInvoker`: runs a local executable per request
//! - `FnInvoker`: wraps a closure (embedding and tests)

mod command;

use std::sync::Arc;

use async_trait::async_trait;

use crate::request::{CoordinatedRequest, CoordinatedResponse};
use crate::sequence::RunErr;

pub use command::{CommandConfig, CommandInvoker, CommandProtocol};

/// Errors that keep an invocation from being carried out.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("failed to spawn function process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to exchange data with function process: {0}")]
    Io(#[source] std::io::Error),

    #[error("function timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("function process terminated without exit code")]
    Killed,

    #[error("failed to encode: {0}")]
    Encode(#[from] crate::request::RequestError),
}

/// Tagged result of running the local function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Serialized `CoordinatedResponse`.
    Success(Vec<u8>),
    /// The function ran and signalled failure.
    RuntimeFailure(RunErr),
    /// The invocation machinery failed.
    ExecutionFailure(String),
}

impl Invocation {
    /// Wrap a response as a successful invocation.
    pub fn respond(response: &CoordinatedResponse) -> Self {
        match response.to_json() {
            Ok(bytes) => Invocation::Success(bytes),
            Err(e) => Invocation::ExecutionFailure(e.to_string()),
        }
    }
}

impl From<InvokeError> for Invocation {
    fn from(err: InvokeError) -> Self {
        Invocation::ExecutionFailure(err.to_string())
    }
}

/// Runs the node's single function. Must tolerate concurrent calls.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, request: &CoordinatedRequest) -> Invocation;
}

type InvokeFn = dyn Fn(&CoordinatedRequest) -> Invocation + Send + Sync;

/// Invoker backed by a closure.
#[derive(Clone)]
pub struct FnInvoker {
    f: Arc<InvokeFn>,
}

impl FnInvoker {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&CoordinatedRequest) -> Invocation + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Invoker whose function maps the request body to an output or a run error.
    pub fn from_output<F>(f: F) -> Self
    where
        F: Fn(&CoordinatedRequest) -> Result<Vec<u8>, RunErr> + Send + Sync + 'static,
    {
        Self::new(move |req| match f(req) {
            Ok(output) => Invocation::respond(&CoordinatedResponse::new(output)),
            Err(err) => Invocation::RuntimeFailure(err),
        })
    }
}

#[async_trait]
impl FunctionInvoker for FnInvoker {
    async fn invoke(&self, request: &CoordinatedRequest) -> Invocation {
        (self.f)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_invoker_success_is_serialized_response() {
        let invoker = FnInvoker::from_output(|req| Ok(req.body.to_ascii_uppercase()));
        let req = CoordinatedRequest::from_input("r", b"abc".to_vec());

        let Invocation::Success(bytes) = invoker.invoke(&req).await else {
            panic!("expected success");
        };
        let resp = CoordinatedResponse::from_json(&bytes).unwrap();
        assert_eq!(resp.output, b"ABC");
    }

    #[tokio::test]
    async fn test_fn_invoker_run_err() {
        let invoker = FnInvoker::from_output(|_| Err(RunErr::new(422, "bad input")));
        let req = CoordinatedRequest::from_input("r", Vec::new());
        assert_eq!(
            invoker.invoke(&req).await,
            Invocation::RuntimeFailure(RunErr::new(422, "bad input"))
        );
    }

    #[test]
    fn test_invoke_error_becomes_execution_failure() {
        let inv: Invocation = InvokeError::Killed.into();
        assert!(matches!(inv, Invocation::ExecutionFailure(msg) if msg.contains("terminated")));
    }
}
