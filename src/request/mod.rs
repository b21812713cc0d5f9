//! Wire model for a single function invocation and its result.
//!
//! `CoordinatedRequest` is the only carrier of sequence progress: the
//! serialized plan rides inside it from hop to hop, so re-serialization must
//! be lossless.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::encoding;

/// Result type for request (de)serialization.
pub type Result<T> = std::result::Result<T, RequestError>;

/// Errors raised while moving requests on and off the wire.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("failed to decode: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One inbound invocation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatedRequest {
    pub id: String,
    pub method: String,
    pub url: String,
    #[serde(default, with = "encoding::bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub resp_headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// State accumulated across sequence steps.
    #[serde(default, with = "encoding::bytes_map")]
    pub state: HashMap<String, Vec<u8>>,
    /// Serialized sequence plan, absent for single-shot calls.
    #[serde(
        default,
        rename = "sequenceJSON",
        with = "encoding::optional_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence_json: Option<Vec<u8>>,
}

impl CoordinatedRequest {
    /// Build the synthetic `POST /` request used for direct invocations.
    pub fn from_input(id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            method: "POST".to_string(),
            url: "/".to_string(),
            body,
            ..Default::default()
        }
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(RequestError::Decode)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(RequestError::Encode)
    }

    /// Replace the embedded plan, consuming the request.
    pub fn with_sequence(self, sequence_json: Vec<u8>) -> Self {
        Self {
            sequence_json: Some(sequence_json),
            ..self
        }
    }
}

/// Output of one function call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatedResponse {
    #[serde(default, with = "encoding::bytes")]
    pub output: Vec<u8>,
    #[serde(default)]
    pub resp_headers: HashMap<String, String>,
    /// State mutations requested by the function.
    #[serde(default, with = "encoding::bytes_map")]
    pub state: HashMap<String, Vec<u8>>,
}

impl CoordinatedResponse {
    pub fn new(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(RequestError::Decode)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(RequestError::Encode)
    }
}
