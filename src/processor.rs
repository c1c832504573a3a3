//! Command processor: the fixed-cadence control loop
//!
//! ```text
//! Idle -> Running -> Exhausted | Canceled | Fatal
//! ```
//!
//! Each tick reads a command, resolves it to a target against the current
//! TCP pose, passes it through the safety gate, sends it, logs it and sleeps
//! for the configured responsiveness. Malformed records are skipped; every
//! other failure stops the run. Whatever the terminal state, the arm is sent
//! one stop command before the run returns.

use crate::command_log::CommandLog;
use crate::config::{Config, DeltaMode};
use crate::connection::ConnectionManager;
use crate::error::{ConnectionError, RecordError};
use crate::json_output::{CommandExecutedEvent, RecordSkippedEvent, RunFinishedEvent, SafetyViolationEvent};
use crate::pose::{MotionCommand, Pose};
use crate::safety::{validate_pose_target, validate_velocity_target, MotionLimits, Rejection};
use crate::session::SessionConnector;
use crate::source::{SequentialSource, SourceItem, TailSource, TailTick};
use crate::telemetry::{NoOpTelemetry, TelemetryPublisher};
use crate::{ControlError, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Running,
    Exhausted,
    Canceled,
    Fatal,
}

/// How a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Sequential source reached end of file
    Exhausted,
    /// Shutdown was requested
    Canceled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Exhausted => write!(f, "exhausted"),
            RunOutcome::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub executed: u64,
    pub skipped: u64,
    /// Last target sent to the arm during the run
    pub last_target: Option<Pose>,
}

/// Motion parameters for the loop, resolved from the configuration
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub responsiveness: Duration,
    /// How long a velocity command is held before the controller stops it
    pub command_duration: Duration,
    pub speed: f64,
    pub acceleration: f64,
    pub delta_mode: DeltaMode,
    pub limits: MotionLimits,
    pub enforce_limits: bool,
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            responsiveness: config.movement.responsiveness(),
            command_duration: config.movement.command_duration(),
            speed: config.movement.default_speed(),
            acceleration: config.movement.default_acceleration(),
            delta_mode: config.movement.delta_mode(),
            limits: config.safety.limits(),
            enforce_limits: config.safety_gate_enforced(),
        }
    }
}

/// A command resolved against the current pose, ready to send
struct ResolvedMotion {
    target: Pose,
    delta: Option<[f64; 6]>,
}

pub struct CommandProcessor<'a, C: SessionConnector> {
    connection: &'a mut ConnectionManager<C>,
    settings: ProcessorSettings,
    telemetry: Arc<dyn TelemetryPublisher>,
    shutdown: Option<Arc<AtomicBool>>,
    state: ProcessorState,
    executed: u64,
    skipped: u64,
    /// Running absolute pose estimate: the last target sent
    last_target: Option<Pose>,
}

impl<'a, C: SessionConnector> CommandProcessor<'a, C> {
    pub fn new(connection: &'a mut ConnectionManager<C>, settings: ProcessorSettings) -> Self {
        Self {
            connection,
            settings,
            telemetry: Arc::new(NoOpTelemetry),
            shutdown: None,
            state: ProcessorState::Idle,
            executed: 0,
            skipped: 0,
            last_target: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryPublisher>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Stop at the top of the next tick once `flag` is set
    pub fn with_shutdown_signal(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn last_target(&self) -> Option<Pose> {
        self.last_target
    }

    /// Execute every record of `source` once, in order
    pub async fn run_sequential(
        &mut self,
        source: &mut SequentialSource,
        log: Option<&mut CommandLog>,
    ) -> Result<RunSummary> {
        self.begin()?;
        info!("Replaying commands from {}", source.name());
        let result = self.sequential_loop(source, log).await;
        self.finish(result).await
    }

    /// Follow `source` until shutdown is requested or a command fails
    pub async fn run_streaming(&mut self, source: &mut TailSource, log: Option<&mut CommandLog>) -> Result<RunSummary> {
        self.begin()?;
        info!("Following new commands appended to {}", source.path().display());
        let result = self.streaming_loop(source, log).await;
        self.finish(result).await
    }

    fn begin(&mut self) -> Result<()> {
        self.executed = 0;
        self.skipped = 0;
        self.last_target = None;
        if !self.connection.is_connected() {
            self.state = ProcessorState::Fatal;
            return Err(ConnectionError::SessionUnavailable("not connected to robot".to_string()).into());
        }
        self.state = ProcessorState::Running;
        info!(
            "Command processor running (responsiveness {:?}, {:?} mode, safety limits {})",
            self.settings.responsiveness,
            self.settings.delta_mode,
            if self.settings.enforce_limits { "enforced" } else { "not enforced" }
        );
        Ok(())
    }

    async fn sequential_loop(
        &mut self,
        source: &mut SequentialSource,
        mut log: Option<&mut CommandLog>,
    ) -> Result<RunOutcome> {
        loop {
            if self.cancel_requested() {
                return Ok(RunOutcome::Canceled);
            }

            match source.next_record().await? {
                SourceItem::Exhausted => return Ok(RunOutcome::Exhausted),
                SourceItem::Skipped(e) => {
                    self.skip(&e).await;
                    continue;
                }
                SourceItem::Command { line, command } => {
                    self.execute(Some(line), &command, false, log.as_deref_mut()).await?;
                }
            }

            tokio::time::sleep(self.settings.responsiveness).await;
        }
    }

    async fn streaming_loop(&mut self, source: &mut TailSource, mut log: Option<&mut CommandLog>) -> Result<RunOutcome> {
        loop {
            if self.cancel_requested() {
                return Ok(RunOutcome::Canceled);
            }

            match source.next_tick().await? {
                TailTick::Fresh(command) => {
                    self.execute(None, &command, false, log.as_deref_mut()).await?;
                }
                TailTick::Hold(command) => {
                    self.execute(None, &command, true, log.as_deref_mut()).await?;
                }
                TailTick::Malformed { error, held } => {
                    self.skip(&error).await;
                    if let Some(command) = held {
                        self.execute(None, &command, true, log.as_deref_mut()).await?;
                    }
                }
                TailTick::Idle => debug!("No command received yet"),
            }

            tokio::time::sleep(self.settings.responsiveness).await;
        }
    }

    async fn finish(&mut self, result: Result<RunOutcome>) -> Result<RunSummary> {
        self.state = match &result {
            Ok(RunOutcome::Exhausted) => ProcessorState::Exhausted,
            Ok(RunOutcome::Canceled) => ProcessorState::Canceled,
            Err(_) => ProcessorState::Fatal,
        };

        if !self.connection.emergency_stop().await {
            warn!("Could not stop the arm at the end of the run");
        }

        let event = match &result {
            Ok(outcome) => RunFinishedEvent::new(&outcome.to_string(), self.executed, self.skipped, None),
            Err(e) => RunFinishedEvent::new("fatal", self.executed, self.skipped, Some(e.to_string())),
        };
        if let Err(e) = self.telemetry.publish_finished(&event).await {
            warn!("Failed to publish run summary: {:#}", e);
        }

        match result {
            Ok(outcome) => {
                info!(
                    "Run {}: {} commands executed, {} records skipped",
                    outcome, self.executed, self.skipped
                );
                Ok(RunSummary {
                    outcome,
                    executed: self.executed,
                    skipped: self.skipped,
                    last_target: self.last_target,
                })
            }
            Err(e) => {
                error!("Run stopped: {}", e);
                Err(e)
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    async fn skip(&mut self, error: &RecordError) {
        self.skipped += 1;
        warn!("Skipping record: {}", error);
        let event = RecordSkippedEvent::new(error.line, &error.reason);
        if let Err(e) = self.telemetry.publish_skipped(&event).await {
            warn!("Failed to publish skipped record: {:#}", e);
        }
    }

    async fn execute(
        &mut self,
        line: Option<usize>,
        command: &MotionCommand,
        held: bool,
        log: Option<&mut CommandLog>,
    ) -> Result<()> {
        let motion = match command {
            MotionCommand::Delta(delta) => {
                let current = self.connection.get_tcp_pose().await.ok_or_else(|| {
                    ControlError::QueryFailure("could not read the current TCP pose".to_string())
                })?;
                let target = current.offset(delta);
                let velocity = delta.as_velocity(self.settings.responsiveness.as_secs_f64());
                let acceleration = self.settings.acceleration;

                match self.settings.delta_mode {
                    DeltaMode::Pose => {
                        let speed = if delta.is_rotation_only() {
                            self.settings.speed
                        } else {
                            velocity.linear_speed()
                        };
                        self.gate(line, validate_pose_target(&target, speed, acceleration, &self.settings.limits))
                            .await?;
                        if !self.connection.send_pose_target(&target, speed, acceleration).await {
                            return Err(ControlError::SendFailure(format!("move to {} was not accepted", target)));
                        }
                    }
                    DeltaMode::Velocity => {
                        self.gate(line, validate_velocity_target(&velocity, acceleration, &self.settings.limits))
                            .await?;
                        self.gate(
                            line,
                            validate_pose_target(&target, velocity.linear_speed(), acceleration, &self.settings.limits),
                        )
                        .await?;
                        let duration = self.settings.command_duration;
                        if !self.connection.send_velocity_target(&velocity, acceleration, duration).await {
                            return Err(ControlError::SendFailure(format!(
                                "velocity {:?} was not accepted",
                                velocity.values()
                            )));
                        }
                    }
                }

                ResolvedMotion {
                    target,
                    delta: Some(delta.values()),
                }
            }
            MotionCommand::Absolute(absolute) => {
                let (speed, acceleration) = (self.settings.speed, self.settings.acceleration);
                self.gate(
                    line,
                    validate_pose_target(&absolute.pose, speed, acceleration, &self.settings.limits),
                )
                .await?;
                if !self.connection.send_pose_target(&absolute.pose, speed, acceleration).await {
                    return Err(ControlError::SendFailure(format!("move to {} was not accepted", absolute.pose)));
                }
                ResolvedMotion {
                    target: absolute.pose,
                    delta: None,
                }
            }
        };

        self.last_target = Some(motion.target);
        if let Some(log) = log {
            log.append(&motion.target, motion.delta).await?;
        }

        self.executed += 1;
        debug!("Executed {} command, target {}", command.kind(), motion.target);
        let event = CommandExecutedEvent::new(line, command.kind(), motion.target, motion.delta, held);
        if let Err(e) = self.telemetry.publish_executed(&event).await {
            warn!("Failed to publish executed command: {:#}", e);
        }
        Ok(())
    }

    /// Apply the safety gate. Non-finite values are refused even when the
    /// limits are not enforced.
    async fn gate(&self, line: Option<usize>, check: std::result::Result<(), Rejection>) -> Result<()> {
        let rejection = match check {
            Ok(()) => return Ok(()),
            Err(rejection @ Rejection::NonFinite { .. }) => rejection,
            Err(_) if !self.settings.enforce_limits => return Ok(()),
            Err(rejection) => rejection,
        };

        error!("Safety violation: {}", rejection);
        let event = SafetyViolationEvent::new(line, &rejection.to_string());
        if let Err(e) = self.telemetry.publish_rejected(&event).await {
            warn!("Failed to publish safety violation: {:#}", e);
        }
        Err(rejection.into())
    }
}
