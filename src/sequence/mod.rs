//! Sequence plans: ordered multi-step function chains.
//!
//! A plan is a list of steps processed strictly in order. The "next step" is
//! always the first step whose `completed` flag is false; a plan with no such
//! step is finished. Plans travel serialized inside `CoordinatedRequest`, and
//! each hop deserializes, advances, and re-serializes them.
//!
//! This module also owns the chain-level policies applied after a step:
//! - `handle_step_errs`: decides whether runtime errors halt the chain
//! - `handle_step_results`: folds step output into request state

mod result;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub use result::{FnResult, Outcome, RunErr};

/// Result type for sequence operations.
pub type Result<T> = std::result::Result<T, SequenceError>;

/// Errors produced while decoding or advancing a sequence.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("failed to decode sequence: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode sequence: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("step {index} is an empty group")]
    EmptyGroup { index: usize },

    #[error("function '{key}' declares onErr.any together with onErr.code or onErr.other")]
    ConflictingErrHandler { key: String },

    #[error("function '{fqfn}' ({key}) failed: {err}")]
    RunErr {
        fqfn: String,
        key: String,
        #[source]
        err: RunErr,
    },
}

// ============================================================================
// Plan Types
// ============================================================================

/// What to do when a function returns a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrAction {
    /// Halt the sequence.
    Return,
    /// Record the error in state and keep going.
    Continue,
}

/// Per-function runtime error policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrHandler {
    /// Actions keyed by error code.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub code: BTreeMap<i32, ErrAction>,
    /// Action for every error. Exclusive with `code` and `other`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<ErrAction>,
    /// Action for codes not listed in `code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<ErrAction>,
}

impl ErrHandler {
    /// Resolve the action for an error code. Unhandled codes halt.
    pub fn resolve(&self, code: i32) -> ErrAction {
        if let Some(action) = self.code.get(&code) {
            return *action;
        }
        self.any.or(self.other).unwrap_or(ErrAction::Return)
    }

    fn is_conflicting(&self) -> bool {
        self.any.is_some() && (!self.code.is_empty() || self.other.is_some())
    }
}

/// One planned function call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableFn {
    /// Short function name.
    #[serde(rename = "fn")]
    pub name: String,
    pub fqfn: String,
    /// State key to store output under, instead of `name`.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_key: Option<String>,
    /// State key aliases made available to the function.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
    #[serde(rename = "onErr", default, skip_serializing_if = "Option::is_none")]
    pub on_err: Option<ErrHandler>,
}

impl CallableFn {
    pub fn new(name: impl Into<String>, fqfn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fqfn: fqfn.into(),
            ..Default::default()
        }
    }

    /// Identity of this callable within a step; also its state key.
    pub fn key(&self) -> &str {
        self.as_key.as_deref().unwrap_or(&self.name)
    }

    fn err_action(&self, err: &RunErr) -> ErrAction {
        self.on_err
            .as_ref()
            .map(|handler| handler.resolve(err.code))
            .unwrap_or(ErrAction::Return)
    }
}

/// The work a step performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Executable {
    Callable(CallableFn),
    /// Callables intended to run concurrently as one logical step.
    Group(Vec<CallableFn>),
}

impl Executable {
    /// The callable that coordinates this step: itself, or a group's first.
    pub fn primary(&self) -> Option<&CallableFn> {
        match self {
            Executable::Callable(callable) => Some(callable),
            Executable::Group(group) => group.first(),
        }
    }

    pub fn callables(&self) -> &[CallableFn] {
        match self {
            Executable::Callable(callable) => std::slice::from_ref(callable),
            Executable::Group(group) => group,
        }
    }

    /// FQFN used to route this step over the mesh.
    pub fn fqfn(&self) -> &str {
        self.primary().map(|c| c.fqfn.as_str()).unwrap_or_default()
    }

    /// Key of the coordinating callable.
    pub fn key(&self) -> &str {
        self.primary().map(CallableFn::key).unwrap_or_default()
    }

    fn find(&self, key: &str) -> Option<&CallableFn> {
        self.callables().iter().find(|c| c.key() == key)
    }
}

/// A planned step and its completion flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub exec: Executable,
    #[serde(default)]
    pub completed: bool,
}

impl Step {
    pub fn callable(callable: CallableFn) -> Self {
        Self {
            exec: Executable::Callable(callable),
            completed: false,
        }
    }

    pub fn group(callables: Vec<CallableFn>) -> Self {
        Self {
            exec: Executable::Group(callables),
            completed: false,
        }
    }
}

/// An ordered sequence plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    steps: Vec<Step>,
}

impl Sequence {
    /// Build a plan, validating every step.
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        let seq = Self { steps };
        seq.validate()?;
        Ok(seq)
    }

    /// Decode a serialized plan. Empty input yields an empty plan.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::default());
        }
        let steps: Vec<Step> = serde_json::from_slice(data).map_err(SequenceError::Decode)?;
        Self::new(steps)
    }

    /// Serialize the plan for the next hop.
    pub fn steps_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.steps).map_err(SequenceError::Encode)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Index of the first incomplete step.
    pub fn next_step_index(&self) -> Option<usize> {
        self.steps.iter().position(|step| !step.completed)
    }

    /// The first incomplete step, or `None` when the sequence is finished.
    pub fn next_step(&self) -> Option<&Step> {
        self.next_step_index().map(|i| &self.steps[i])
    }

    /// Mark a step completed. Re-marking is a no-op; returns false for an
    /// out-of-range index.
    pub fn complete_step(&mut self, index: usize) -> bool {
        match self.steps.get_mut(index) {
            Some(step) => {
                step.completed = true;
                true
            }
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_step_index().is_none()
    }

    fn validate(&self) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            if matches!(&step.exec, Executable::Group(g) if g.is_empty()) {
                return Err(SequenceError::EmptyGroup { index });
            }
            for callable in step.exec.callables() {
                if callable.on_err.as_ref().is_some_and(ErrHandler::is_conflicting) {
                    return Err(SequenceError::ConflictingErrHandler {
                        key: callable.key().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Step Policies
// ============================================================================

/// Decide whether the runtime errors in `results` allow the chain to continue.
///
/// Each runtime error is resolved against the `onErr` policy of the callable
/// that produced it. The first error resolving to `Return` halts the chain.
/// Execution errors are not considered here; they always halt upstream.
pub fn handle_step_errs(results: &[FnResult], step: &Step) -> Result<()> {
    for result in results {
        let Some(err) = result.run_err() else {
            continue;
        };

        let callable = step.exec.find(&result.key).or_else(|| step.exec.primary());
        let action = callable
            .map(|c| c.err_action(err))
            .unwrap_or(ErrAction::Return);

        if action == ErrAction::Return {
            return Err(SequenceError::RunErr {
                fqfn: result.fqfn.clone(),
                key: result.key.clone(),
                err: err.clone(),
            });
        }
    }
    Ok(())
}

/// Fold step results into request state. Later writes win per key.
///
/// Successful output is stored under the result key, followed by any state
/// the function returned. A continued runtime error is stored as JSON under
/// the result key so later steps can inspect it.
pub fn handle_step_results(
    results: &[FnResult],
    state: &mut HashMap<String, Vec<u8>>,
) -> Result<()> {
    for result in results {
        match &result.outcome {
            Outcome::Response(resp) => {
                state.insert(result.key.clone(), resp.output.clone());
                for (k, v) in &resp.state {
                    state.insert(k.clone(), v.clone());
                }
            }
            Outcome::RunErr(err) => {
                let encoded = serde_json::to_vec(err).map_err(SequenceError::Encode)?;
                state.insert(result.key.clone(), encoded);
            }
            Outcome::ExecErr(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
