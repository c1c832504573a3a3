//! Telemetry abstraction for run events
//!
//! The processor reports what it did with every record through this trait,
//! so the library never decides where structured output goes.

use crate::json_output::{
    output_event, CommandExecutedEvent, RecordSkippedEvent, RunFinishedEvent, SafetyViolationEvent,
};
use async_trait::async_trait;

/// Trait for publishing run events
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish_executed(&self, event: &CommandExecutedEvent) -> anyhow::Result<()>;

    async fn publish_skipped(&self, event: &RecordSkippedEvent) -> anyhow::Result<()>;

    async fn publish_rejected(&self, event: &SafetyViolationEvent) -> anyhow::Result<()>;

    async fn publish_finished(&self, event: &RunFinishedEvent) -> anyhow::Result<()>;
}

/// No-operation telemetry publisher
///
/// Default implementation that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoOpTelemetry;

#[async_trait]
impl TelemetryPublisher for NoOpTelemetry {
    async fn publish_executed(&self, _event: &CommandExecutedEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_skipped(&self, _event: &RecordSkippedEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_rejected(&self, _event: &SafetyViolationEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_finished(&self, _event: &RunFinishedEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Prints every event to stdout as one JSON object per line
#[derive(Debug, Clone, Default)]
pub struct JsonTelemetry;

#[async_trait]
impl TelemetryPublisher for JsonTelemetry {
    async fn publish_executed(&self, event: &CommandExecutedEvent) -> anyhow::Result<()> {
        output_event(event);
        Ok(())
    }

    async fn publish_skipped(&self, event: &RecordSkippedEvent) -> anyhow::Result<()> {
        output_event(event);
        Ok(())
    }

    async fn publish_rejected(&self, event: &SafetyViolationEvent) -> anyhow::Result<()> {
        output_event(event);
        Ok(())
    }

    async fn publish_finished(&self, event: &RunFinishedEvent) -> anyhow::Result<()> {
        output_event(event);
        Ok(())
    }
}
