//! Wire protocol types for coordinator-worker communication.
//!
//! Exactly one request and one response cross the channel per worker:
//! - **Request**: `{"type": "hash", rounds, password}` or `{"type": "compare", password, hash}`
//! - **Response**: `{"result": <string|bool>}` or `{"err": <message>}`

use std::fmt;

use serde::{Deserialize, Serialize};

/// Request sent from the coordinator to a freshly launched worker.
///
/// `password` is always the coordinator-normalized secret, never the raw input.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Hash { rounds: u32, password: String },

    Compare { password: String, hash: String },
}

impl WorkerRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Hash { .. } => RequestKind::Hash,
            Self::Compare { .. } => RequestKind::Compare,
        }
    }
}

// Passwords and stored digests must never reach the logs.
impl fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash { rounds, .. } => f
                .debug_struct("Hash")
                .field("rounds", rounds)
                .field("password", &"<redacted>")
                .finish(),
            Self::Compare { .. } => f
                .debug_struct("Compare")
                .field("password", &"<redacted>")
                .field("hash", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Hash,
    Compare,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Compare => "compare",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value carried in a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseValue {
    Digest(String),
    Matched(bool),
}

/// Raw response as it appears on the wire.
///
/// Both fields are optional so that protocol violations (both or neither
/// present) can be detected instead of rejected by the decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponseValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Validated worker response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResponse {
    Digest(String),
    Matched(bool),
    /// The worker caught a failure and reported it.
    Failed(String),
}

impl WorkerResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed(error.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedResponse {
    #[error("response carried neither result nor err")]
    Empty,
    #[error("response carried both result and err")]
    Ambiguous,
    #[error("undecodable response: {0}")]
    Undecodable(String),
    #[error("{kind} request answered with {got}")]
    WrongResultType { kind: RequestKind, got: &'static str },
}

impl From<WorkerResponse> for ResponseEnvelope {
    fn from(response: WorkerResponse) -> Self {
        match response {
            WorkerResponse::Digest(d) => Self {
                result: Some(ResponseValue::Digest(d)),
                err: None,
            },
            WorkerResponse::Matched(m) => Self {
                result: Some(ResponseValue::Matched(m)),
                err: None,
            },
            WorkerResponse::Failed(e) => Self {
                result: None,
                err: Some(e),
            },
        }
    }
}

impl TryFrom<ResponseEnvelope> for WorkerResponse {
    type Error = MalformedResponse;

    fn try_from(envelope: ResponseEnvelope) -> Result<Self, Self::Error> {
        match (envelope.result, envelope.err) {
            (Some(ResponseValue::Digest(d)), None) => Ok(Self::Digest(d)),
            (Some(ResponseValue::Matched(m)), None) => Ok(Self::Matched(m)),
            (None, Some(e)) => Ok(Self::Failed(e)),
            (Some(_), Some(_)) => Err(MalformedResponse::Ambiguous),
            (None, None) => Err(MalformedResponse::Empty),
        }
    }
}
