//! Error types for command streaming and robot control

use crate::safety::Rejection;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Safety rejection: {0}")]
    SafetyRejection(#[from] Rejection),

    #[error("Send failure: {0}")]
    SendFailure(String),

    #[error("Query failure: {0}")]
    QueryFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while bringing up the control and state-query sessions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// The sessions are open but the physical-robot preflight could not read
    /// the robot's operating or safety mode.
    #[error("safety check failed: {0}")]
    SafetyCheckFailed(String),
}

/// A command record that could not be parsed. Sources report these as
/// skipped records; they never stop a run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", describe(.line, .reason))]
pub struct RecordError {
    /// 1-based line number, when the record came from a numbered source
    pub line: Option<usize>,
    pub reason: String,
}

fn describe(line: &Option<usize>, reason: &str) -> String {
    match line {
        Some(line) => format!("line {}: {}", line, reason),
        None => reason.to_string(),
    }
}

impl RecordError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            line: None,
            reason: reason.into(),
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}
