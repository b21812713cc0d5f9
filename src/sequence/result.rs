//! Outcome report for one completed step.

use serde::{Deserialize, Serialize};

use crate::request::CoordinatedResponse;

/// Failure signalled by a function that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RunErr {
    pub code: i32,
    pub message: String,
}

impl RunErr {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Classified result of an invocation. Exactly one variant is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// The function succeeded.
    Response(CoordinatedResponse),
    /// The function ran and reported failure.
    RunErr(RunErr),
    /// The invocation itself could not be carried out.
    ExecErr(String),
}

/// Report for one completed step, sent back toward the sequence originator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnResult {
    pub fqfn: String,
    pub key: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl FnResult {
    pub fn new(fqfn: impl Into<String>, key: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            fqfn: fqfn.into(),
            key: key.into(),
            outcome,
        }
    }

    pub fn response(&self) -> Option<&CoordinatedResponse> {
        match &self.outcome {
            Outcome::Response(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn run_err(&self) -> Option<&RunErr> {
        match &self.outcome {
            Outcome::RunErr(err) => Some(err),
            _ => None,
        }
    }

    pub fn exec_err(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::ExecErr(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}
