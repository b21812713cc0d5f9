//! Node counters served on `/meta/metrics`.
//!
//! One `NodeMetrics` is shared by ingress and the coordinator of a node.
//! Counters only grow; readers take a `MetricsSnapshot`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::coordinator::StepOutcome;
use crate::invoker::Invocation;

/// Live counters for a node.
#[derive(Debug, Default)]
pub struct NodeMetrics {
    invocations_succeeded: AtomicU64,
    invocations_failed: AtomicU64,
    invocations_errored: AtomicU64,
    steps_reported: AtomicU64,
    steps_advanced: AtomicU64,
    steps_completed: AtomicU64,
    steps_halted: AtomicU64,
    steps_skipped: AtomicU64,
    steps_rejected: AtomicU64,
}

/// Invocation counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvocationCounts {
    /// The function returned output.
    pub succeeded: u64,
    /// The function reported a runtime error.
    pub failed: u64,
    /// The invocation machinery failed.
    pub errored: u64,
}

/// Coordinator step counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    /// Function results published to the originator.
    pub reported: u64,
    /// Requests tunneled to a next step.
    pub advanced: u64,
    /// Sequences finished at this node.
    pub completed: u64,
    /// Sequences stopped after an error.
    pub halted: u64,
    /// Duplicate deliveries dropped.
    pub skipped: u64,
    /// Messages refused as malformed or inconsistent.
    pub rejected: u64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub invocations: InvocationCounts,
    pub steps: StepCounts,
}

impl NodeMetrics {
    pub fn record_invocation(&self, invocation: &Invocation) {
        let counter = match invocation {
            Invocation::Success(_) => &self.invocations_succeeded,
            Invocation::RuntimeFailure(_) => &self.invocations_failed,
            Invocation::ExecutionFailure(_) => &self.invocations_errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report(&self) {
        self.steps_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step(&self, outcome: &StepOutcome) {
        let counter = match outcome {
            StepOutcome::Advanced { .. } => &self.steps_advanced,
            StepOutcome::Completed => &self.steps_completed,
            StepOutcome::Halted(_) => &self.steps_halted,
            StepOutcome::Skipped => &self.steps_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.steps_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: InvocationCounts {
                succeeded: self.invocations_succeeded.load(Ordering::Relaxed),
                failed: self.invocations_failed.load(Ordering::Relaxed),
                errored: self.invocations_errored.load(Ordering::Relaxed),
            },
            steps: StepCounts {
                reported: self.steps_reported.load(Ordering::Relaxed),
                advanced: self.steps_advanced.load(Ordering::Relaxed),
                completed: self.steps_completed.load(Ordering::Relaxed),
                halted: self.steps_halted.load(Ordering::Relaxed),
                skipped: self.steps_skipped.load(Ordering::Relaxed),
                rejected: self.steps_rejected.load(Ordering::Relaxed),
            },
        }
    }
}
