use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    arguments::Arguments,
    error::{Error, ErrorKind, Result},
};

/// A single request to run an operation, as produced by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub id: String,
    pub name: String,
    pub arguments: Arguments,
}

impl Invocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        payload: Value,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        status_code: u16,
    },
}

/// The result of an [`Invocation`], correlated by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl InvocationResult {
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Success { payload },
        }
    }

    pub fn failure(id: impl Into<String>, error: &Error) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Failure {
                kind: error.kind(),
                message: error.to_string(),
                status_code: error.status_code(),
            },
        }
    }

    pub fn from_result(id: impl Into<String>, result: Result<Value>) -> Self {
        match result {
            Ok(payload) => Self::success(id, payload),
            Err(e) => Self::failure(id, &e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Text handed back to the language model as the tool result.
    pub fn to_content(&self) -> String {
        match &self.outcome {
            Outcome::Success { payload } => payload.to_string(),
            Outcome::Failure {
                kind,
                message,
                status_code,
            } => json!({
                "error": message,
                "kind": kind,
                "status_code": status_code,
            })
            .to_string(),
        }
    }
}
