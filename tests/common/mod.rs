//! In-memory robot used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use urstream::json_output::{CommandExecutedEvent, RecordSkippedEvent, RunFinishedEvent, SafetyViolationEvent};
use urstream::safety::{AxisRange, MotionLimits, WorkspaceBounds};
use urstream::{
    ConnectionManager, ConnectionSettings, ControlSession, DeltaMode, Pose, ProcessorSettings, ReceiveSession,
    RobotType, SessionConnector, TelemetryPublisher, Velocity,
};

#[derive(Debug)]
pub struct FakeRobotState {
    pub pose: Pose,
    pub robot_mode: i32,
    pub safety_mode: i32,
    pub moves: Vec<(Pose, f64, f64)>,
    pub velocities: Vec<(Velocity, f64, Duration)>,
    pub stops: Vec<f64>,
    pub fail_control_open: bool,
    pub fail_receive_open: bool,
    pub fail_pose_query: bool,
    pub fail_mode_query: bool,
    pub refuse_motion: bool,
    /// Set the flag once this many motion commands were accepted
    pub cancel_after_sends: Option<(usize, Arc<AtomicBool>)>,
    pub control_disconnects: usize,
    pub receive_disconnects: usize,
}

impl Default for FakeRobotState {
    fn default() -> Self {
        Self {
            pose: Pose::default(),
            robot_mode: 7,
            safety_mode: 1,
            moves: Vec::new(),
            velocities: Vec::new(),
            stops: Vec::new(),
            fail_control_open: false,
            fail_receive_open: false,
            fail_pose_query: false,
            fail_mode_query: false,
            refuse_motion: false,
            cancel_after_sends: None,
            control_disconnects: 0,
            receive_disconnects: 0,
        }
    }
}

impl FakeRobotState {
    fn motion_accepted(&mut self) {
        let sends = self.moves.len() + self.velocities.len();
        if let Some((limit, flag)) = &self.cancel_after_sends {
            if sends >= *limit {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// Connector whose sessions share one `FakeRobotState`
#[derive(Clone, Default)]
pub struct FakeRobot {
    state: Arc<Mutex<FakeRobotState>>,
}

impl FakeRobot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeRobotState> {
        self.state.lock().unwrap()
    }
}

pub struct FakeControl {
    state: Arc<Mutex<FakeRobotState>>,
    connected: bool,
}

pub struct FakeReceive {
    state: Arc<Mutex<FakeRobotState>>,
    connected: bool,
}

#[async_trait]
impl ControlSession for FakeControl {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn move_to_pose(&mut self, pose: &Pose, speed: f64, acceleration: f64) -> anyhow::Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_motion {
            return Ok(false);
        }
        state.moves.push((*pose, speed, acceleration));
        state.pose = *pose;
        state.motion_accepted();
        Ok(true)
    }

    async fn apply_velocity(
        &mut self,
        velocity: &Velocity,
        acceleration: f64,
        duration: Duration,
    ) -> anyhow::Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_motion {
            return Ok(false);
        }
        state.velocities.push((*velocity, acceleration, duration));
        state.motion_accepted();
        Ok(true)
    }

    async fn stop(&mut self, deceleration: f64) -> anyhow::Result<bool> {
        self.state.lock().unwrap().stops.push(deceleration);
        Ok(true)
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.state.lock().unwrap().control_disconnects += 1;
    }
}

#[async_trait]
impl ReceiveSession for FakeReceive {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn current_pose(&mut self) -> anyhow::Result<Pose> {
        let state = self.state.lock().unwrap();
        if state.fail_pose_query {
            anyhow::bail!("state stream lost");
        }
        Ok(state.pose)
    }

    async fn operating_mode(&mut self) -> anyhow::Result<i32> {
        let state = self.state.lock().unwrap();
        if state.fail_mode_query {
            anyhow::bail!("robot mode unavailable");
        }
        Ok(state.robot_mode)
    }

    async fn safety_mode(&mut self) -> anyhow::Result<i32> {
        let state = self.state.lock().unwrap();
        if state.fail_mode_query {
            anyhow::bail!("safety mode unavailable");
        }
        Ok(state.safety_mode)
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.state.lock().unwrap().receive_disconnects += 1;
    }
}

#[async_trait]
impl SessionConnector for FakeRobot {
    type Control = FakeControl;
    type Receive = FakeReceive;

    async fn open_control(&self, _ip: &str, _frequency: f64) -> anyhow::Result<FakeControl> {
        if self.state().fail_control_open {
            anyhow::bail!("connection refused");
        }
        Ok(FakeControl {
            state: Arc::clone(&self.state),
            connected: true,
        })
    }

    async fn open_receive(&self, _ip: &str, _frequency: f64) -> anyhow::Result<FakeReceive> {
        if self.state().fail_receive_open {
            anyhow::bail!("connection refused");
        }
        Ok(FakeReceive {
            state: Arc::clone(&self.state),
            connected: true,
        })
    }
}

pub fn connection_settings(robot_type: RobotType) -> ConnectionSettings {
    ConnectionSettings {
        ip: "127.0.0.1".to_string(),
        robot_type,
        frequency: 500.0,
        stop_deceleration: 2.0,
    }
}

pub async fn connected(robot: &FakeRobot) -> ConnectionManager<FakeRobot> {
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Simulation));
    connection.connect().await.unwrap();
    connection
}

pub fn processor_settings() -> ProcessorSettings {
    ProcessorSettings {
        responsiveness: Duration::from_secs(1),
        command_duration: Duration::from_secs(1),
        speed: 0.2,
        acceleration: 0.5,
        delta_mode: DeltaMode::Pose,
        limits: MotionLimits {
            max_linear_velocity: 0.5,
            max_acceleration: 1.0,
            workspace_bounds: WorkspaceBounds {
                x: Some(AxisRange::new(-0.8, 0.8)),
                y: Some(AxisRange::new(-0.8, 0.8)),
                z: Some(AxisRange::new(-0.5, 1.0)),
            },
        },
        enforce_limits: true,
    }
}

/// Keeps the `type` of every published event
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryPublisher for RecordingTelemetry {
    async fn publish_executed(&self, event: &CommandExecutedEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.event_type.clone());
        Ok(())
    }

    async fn publish_skipped(&self, event: &RecordSkippedEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.event_type.clone());
        Ok(())
    }

    async fn publish_rejected(&self, event: &SafetyViolationEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.event_type.clone());
        Ok(())
    }

    async fn publish_finished(&self, event: &RunFinishedEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(format!("{}:{}", event.event_type, event.outcome));
        Ok(())
    }
}
