//! JSON Output for run events
//!
//! Structured, one-object-per-line events describing what the processor did
//! with each record, for consumption by external tools.

use crate::pose::Pose;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp as f64 seconds since UNIX epoch with consistent precision
pub fn current_timestamp() -> f64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    (timestamp * 1_000_000.0).round() / 1_000_000.0
}

/// A command that was sent to the robot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExecutedEvent {
    pub timestamp: f64,
    /// Event type for JSON parsing
    #[serde(rename = "type")]
    pub event_type: String,
    /// Line number in the command file (sequential replay only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// `delta` or `pose`
    pub kind: String,
    pub target_pose: Pose,
    pub delta: Option<[f64; 6]>,
    /// True when the tail follower reapplied the previous command
    pub held: bool,
}

/// A record that could not be parsed and was passed over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSkippedEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub reason: String,
}

/// A command refused by the safety limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyViolationEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFinishedEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    /// `exhausted`, `canceled` or `fatal`
    pub outcome: String,
    pub executed: u64,
    pub skipped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandExecutedEvent {
    pub fn new(line: Option<usize>, kind: &str, target_pose: Pose, delta: Option<[f64; 6]>, held: bool) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "command_executed".to_string(),
            line,
            kind: kind.to_string(),
            target_pose,
            delta,
            held,
        }
    }
}

impl RecordSkippedEvent {
    pub fn new(line: Option<usize>, reason: &str) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "record_skipped".to_string(),
            line,
            reason: reason.to_string(),
        }
    }
}

impl SafetyViolationEvent {
    pub fn new(line: Option<usize>, error: &str) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "safety_violation".to_string(),
            line,
            error: error.to_string(),
        }
    }
}

impl RunFinishedEvent {
    pub fn new(outcome: &str, executed: u64, skipped: u64, error: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "run_finished".to_string(),
            outcome: outcome.to_string(),
            executed,
            skipped,
            error,
        }
    }
}

/// Output a JSON event to stdout
pub fn output_event<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{}", json);
    }
}
