// src/core/error.rs
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::expression::ExprError;

/// Failure raised while executing a node.
///
/// Everything except `Fatal` is path-local: the node logs it, records it
/// under `variables["ex"]` and stops its own path. `Fatal` aborts the run.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Data(String),
    #[error(transparent)]
    Expression(#[from] ExprError),
    #[error("{0}")]
    Fatal(String),
}

impl FlowError {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Config(_) => "config",
            FlowError::Transport(_) => "transport",
            FlowError::Data(_) => "data",
            FlowError::Expression(_) => "expression",
            FlowError::Fatal(_) => "fatal",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::Fatal(_))
    }

    /// The `{kind, message}` record stored as `variables["ex"]`.
    pub fn to_record(&self) -> Value {
        json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            FlowError::Config(e.to_string())
        } else {
            FlowError::Transport(e.to_string())
        }
    }
}
