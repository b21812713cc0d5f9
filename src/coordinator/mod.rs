//! Sequence coordinator.
//!
//! Drives one step of sequence progress after the local function has run on
//! a mesh message addressed to this node:
//!
//! 1. Decode the request and its embedded plan, locate the current step
//! 2. Mark the step completed before anything else
//! 3. Classify the invocation and report an `FnResult` to the originator
//! 4. Halt on execution errors, or on runtime errors the plan does not tolerate
//! 5. Fold the result into request state and tunnel the request to the next
//!    step's function, or stop when the plan is finished
//!
//! Reports carry the request id as parent id; advance messages carry the
//! inbound message's parent id so every hop correlates to the first caller.

mod delivery;
mod listener;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::invoker::Invocation;
use crate::mesh::{Mesh, Message, Pod};
use crate::metrics::NodeMetrics;
use crate::request::{CoordinatedRequest, CoordinatedResponse};
use crate::sequence::{
    handle_step_errs, handle_step_results, FnResult, Outcome, RunErr, Sequence, SequenceError,
};

pub use delivery::{DeliveryConfig, DeliveryPolicy, DEFAULT_DEDUPE_CAPACITY};
pub use listener::{listen_and_run, StepHandler};

use delivery::DeliveryTracker;

/// Message type marking a function-result report.
pub const MSG_TYPE_FN_RESULT: &str = "meshrun.fnresult";

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Protocol errors. Each is fatal to the current message and never retried.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("no incomplete step in sequence for request '{request_id}'")]
    SequenceInconsistent { request_id: String },

    #[error("failed to serialize function result: {0}")]
    ReportSerializationFailed(#[source] serde_json::Error),

    #[error("failed to prepare next step: {0}")]
    Forward(String),
}

/// Why a sequence stopped at this step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The invocation machinery failed.
    ExecutionError(String),
    /// The function failed and its error policy says return.
    RuntimeError(RunErr),
}

/// What the coordinator did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The plan has no further steps.
    Completed,
    /// The request was tunneled to the next step's function.
    Advanced { next: String },
    /// The sequence was halted after reporting.
    Halted(HaltReason),
    /// Dropped by the delivery policy as a duplicate.
    Skipped,
}

/// Coordinates sequence steps for the function hosted by this node.
pub struct SequenceCoordinator {
    fqfn: String,
    mesh: Arc<dyn Mesh>,
    deliveries: DeliveryTracker,
    metrics: Arc<NodeMetrics>,
}

impl SequenceCoordinator {
    pub fn new(fqfn: impl Into<String>, mesh: Arc<dyn Mesh>, policy: DeliveryPolicy) -> Self {
        Self {
            fqfn: fqfn.into(),
            mesh,
            deliveries: DeliveryTracker::new(policy),
            metrics: Arc::new(NodeMetrics::default()),
        }
    }

    /// Counters for this node; ingress records into the same set.
    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    /// FQFN of the local function; also the topic this node listens on.
    pub fn fqfn(&self) -> &str {
        &self.fqfn
    }

    /// Apply the delivery policy. Returns false for a message to skip.
    pub fn admit(&self, msg: &Message) -> bool {
        let admitted = self.deliveries.admit(&msg.uuid);
        if !admitted {
            self.metrics.record_step(&StepOutcome::Skipped);
            debug!(uuid = %msg.uuid, msg_type = %msg.msg_type, "Skipping duplicate delivery");
        }
        admitted
    }

    /// Admit the message, then run one coordination step for it.
    pub async fn handle_message(&self, msg: &Message, invocation: Invocation) -> Result<StepOutcome> {
        if !self.admit(msg) {
            return Ok(StepOutcome::Skipped);
        }
        self.process_step(msg, invocation).await
    }

    /// Run one coordination step for an already admitted message.
    #[tracing::instrument(
        name = "coordinator.step",
        skip_all,
        fields(msg_type = %msg.msg_type, parent_id = %msg.parent_id)
    )]
    pub async fn process_step(&self, msg: &Message, invocation: Invocation) -> Result<StepOutcome> {
        let result = self.run_step(msg, invocation).await;
        match &result {
            Ok(outcome) => self.metrics.record_step(outcome),
            Err(_) => self.metrics.record_rejected(),
        }
        result
    }

    async fn run_step(&self, msg: &Message, invocation: Invocation) -> Result<StepOutcome> {
        info!("Function finished executing");

        let mut req = CoordinatedRequest::from_json(&msg.data).map_err(|e| {
            error!(error = %e, "Failed to decode request from message");
            CoordinatorError::MalformedRequest(e.to_string())
        })?;

        let mut seq = Sequence::from_json(req.sequence_json.as_deref().unwrap_or_default())
            .map_err(|e| {
                error!(request_id = %req.id, error = %e, "Failed to decode sequence");
                CoordinatorError::MalformedRequest(e.to_string())
            })?;

        let Some(index) = seq.next_step_index() else {
            error!(request_id = %req.id, "Received message for a sequence with no remaining steps");
            return Err(CoordinatorError::SequenceInconsistent {
                request_id: req.id.clone(),
            });
        };

        // Completion must reflect this attempt regardless of outcome.
        seq.complete_step(index);
        let step = seq.steps()[index].clone();

        let result = FnResult::new(msg.msg_type.clone(), step.exec.key(), classify(invocation));

        let pod = self.mesh.connect();

        self.send_fn_result(pod.as_ref(), &result, &req.id).await?;

        if let Some(err) = result.exec_err() {
            error!(
                request_id = %req.id,
                fqfn = %msg.msg_type,
                error = %err,
                "Stopping execution after failed execution"
            );
            return Ok(StepOutcome::Halted(HaltReason::ExecutionError(err.to_string())));
        }

        let results = [result];
        match handle_step_errs(&results, &step) {
            Ok(()) => {}
            Err(SequenceError::RunErr { err, .. }) => {
                error!(request_id = %req.id, fqfn = %msg.msg_type, error = %err, "Stopping sequence after function error");
                return Ok(StepOutcome::Halted(HaltReason::RuntimeError(err)));
            }
            Err(e) => return Err(forward_error(e)),
        }

        handle_step_results(&results, &mut req.state).map_err(forward_error)?;

        let steps_json = seq.steps_json().map_err(forward_error)?;
        let req = req.with_sequence(steps_json);

        self.send_next_step(pod.as_ref(), msg, &seq, req).await
    }

    async fn send_fn_result(&self, pod: &dyn Pod, result: &FnResult, request_id: &str) -> Result<()> {
        let data = result.to_json().map_err(|e| {
            error!(request_id = %request_id, error = %e, "Failed to serialize function result");
            CoordinatorError::ReportSerializationFailed(e)
        })?;

        info!(fqfn = %self.fqfn, request_id = %request_id, "Function completed, sending result");

        let report = Message::with_parent(MSG_TYPE_FN_RESULT, request_id, data);
        match pod.send(report).await {
            Ok(()) => self.metrics.record_report(),
            Err(e) => warn!(request_id = %request_id, error = %e, "Failed to publish function result"),
        }
        Ok(())
    }

    async fn send_next_step(
        &self,
        pod: &dyn Pod,
        msg: &Message,
        seq: &Sequence,
        req: CoordinatedRequest,
    ) -> Result<StepOutcome> {
        let Some(next) = seq.next_step() else {
            info!(request_id = %req.id, "Sequence completed, no next step to send");
            return Ok(StepOutcome::Completed);
        };

        let next_fqfn = next.exec.fqfn().to_string();
        let data = req.to_json().map_err(forward_error)?;

        info!(request_id = %req.id, next = %next_fqfn, "Sending next step");

        let next_msg = Message::with_parent(next_fqfn.as_str(), msg.parent_id.as_str(), data);
        if let Err(e) = pod.tunnel(&next_fqfn, next_msg).await {
            warn!(next = %next_fqfn, error = %e, "Failed to tunnel next step");
        }

        Ok(StepOutcome::Advanced { next: next_fqfn })
    }
}

/// Turn an invocation into the outcome reported for the step.
pub fn classify(invocation: Invocation) -> Outcome {
    match invocation {
        Invocation::Success(bytes) => match CoordinatedResponse::from_json(&bytes) {
            Ok(resp) => Outcome::Response(resp),
            Err(e) => {
                error!(error = %e, "Failed to decode function response");
                Outcome::ExecErr(e.to_string())
            }
        },
        Invocation::RuntimeFailure(err) => Outcome::RunErr(err),
        Invocation::ExecutionFailure(msg) => Outcome::ExecErr(msg),
    }
}

fn forward_error(e: impl std::fmt::Display) -> CoordinatorError {
    error!(error = %e, "Failed to prepare next step");
    CoordinatorError::Forward(e.to_string())
}
