//! Connection management for the arm's control and state-query sessions
//!
//! Owns both sessions and the connection state machine:
//!
//! ```text
//! Disconnected -> Connected -> ConnectedVerified (physical robots only)
//! ```
//!
//! Every operation that talks to a session converts session errors into a
//! soft failure (`false` / `None`) and logs them; nothing here terminates the
//! process.

use crate::config::{Config, RobotType};
use crate::error::ConnectionError;
use crate::pose::{Pose, Velocity};
use crate::session::{ControlSession, ReceiveSession, SessionConnector};
use crate::status::{RobotStatus, SAFETY_MODE_NORMAL};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// Physical robot whose operating and safety modes were read successfully
    ConnectedVerified,
}

/// Connection parameters taken from the configuration
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub ip: String,
    pub robot_type: RobotType,
    pub frequency: f64,
    pub stop_deceleration: f64,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ip: config.robot.ip().to_string(),
            robot_type: config.robot.robot_type(),
            frequency: config.robot.frequency(),
            stop_deceleration: config.movement.stop_deceleration(),
        }
    }
}

pub struct ConnectionManager<C: SessionConnector> {
    connector: C,
    settings: ConnectionSettings,
    control: Option<C::Control>,
    receive: Option<C::Receive>,
    state: ConnectionState,
}

impl<C: SessionConnector> ConnectionManager<C> {
    pub fn new(connector: C, settings: ConnectionSettings) -> Self {
        Self {
            connector,
            settings,
            control: None,
            receive: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// True while both sessions are open and report connected
    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
            && self.control.as_ref().is_some_and(|c| c.is_connected())
            && self.receive.as_ref().is_some_and(|r| r.is_connected())
    }

    /// Open the control and state-query sessions.
    ///
    /// For physical robots a safety preflight follows. If it fails the
    /// sessions stay open in `Connected` and `SafetyCheckFailed` is returned;
    /// the caller decides whether to proceed.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            self.disconnect().await;
        }

        info!(
            "Connecting to {} robot at {} ({} Hz)",
            self.settings.robot_type, self.settings.ip, self.settings.frequency
        );

        let ip = self.settings.ip.as_str();
        let frequency = self.settings.frequency;
        let (control, receive) = tokio::join!(
            self.connector.open_control(ip, frequency),
            self.connector.open_receive(ip, frequency),
        );

        // Keep whichever half opened so a failure can close it again
        let mut failures = Vec::new();
        match control {
            Ok(session) => self.control = Some(session),
            Err(e) => failures.push(format!("control session: {:#}", e)),
        }
        match receive {
            Ok(session) => self.receive = Some(session),
            Err(e) => failures.push(format!("receive session: {:#}", e)),
        }

        if failures.is_empty() {
            if !self.control.as_ref().is_some_and(|c| c.is_connected()) {
                failures.push("control session reports not connected".to_string());
            }
            if !self.receive.as_ref().is_some_and(|r| r.is_connected()) {
                failures.push("receive session reports not connected".to_string());
            }
        }

        if !failures.is_empty() {
            let reason = failures.join("; ");
            error!("Failed to establish sessions: {}", reason);
            self.disconnect().await;
            return Err(ConnectionError::SessionUnavailable(reason));
        }

        self.state = ConnectionState::Connected;
        info!("Successfully connected to robot");

        if self.settings.robot_type == RobotType::Physical {
            self.verify_physical_robot_safety().await?;
            self.state = ConnectionState::ConnectedVerified;
        }

        Ok(())
    }

    async fn verify_physical_robot_safety(&mut self) -> Result<(), ConnectionError> {
        let receive = self
            .receive
            .as_mut()
            .ok_or_else(|| ConnectionError::SafetyCheckFailed("receive session not open".to_string()))?;

        let robot_mode = receive.operating_mode().await.map_err(|e| {
            error!("Safety verification failed reading robot mode: {:#}", e);
            ConnectionError::SafetyCheckFailed(format!("could not read robot mode: {:#}", e))
        })?;
        let safety_mode = receive.safety_mode().await.map_err(|e| {
            error!("Safety verification failed reading safety mode: {:#}", e);
            ConnectionError::SafetyCheckFailed(format!("could not read safety mode: {:#}", e))
        })?;

        let status = RobotStatus::new(robot_mode, safety_mode, Pose::default());
        info!("Robot mode: {} ({})", status.robot_mode_name, robot_mode);
        info!("Safety mode: {} ({})", status.safety_mode_name, safety_mode);
        if safety_mode != SAFETY_MODE_NORMAL {
            warn!("Robot safety mode is {}, motion commands may be refused", status.safety_mode_name);
        }

        Ok(())
    }

    /// Close whichever sessions are open. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        let had_sessions = self.control.is_some() || self.receive.is_some();

        if let Some(mut control) = self.control.take() {
            control.disconnect().await;
        }
        if let Some(mut receive) = self.receive.take() {
            receive.disconnect().await;
        }

        self.state = ConnectionState::Disconnected;
        if had_sessions {
            info!("Disconnected from robot");
        }
    }

    /// Attempt one stop if a control session is open, then disconnect.
    /// For exit paths that leave before a processor run stopped the arm.
    pub async fn stop_and_disconnect(&mut self) {
        if self.control.is_some() && !self.emergency_stop().await {
            warn!("Could not stop the arm before disconnecting");
        }
        self.disconnect().await;
    }

    /// Current TCP pose, or `None` if it could not be read. `None` means the
    /// position is unknown, never a zero pose.
    pub async fn get_tcp_pose(&mut self) -> Option<Pose> {
        let Some(receive) = self.receive.as_mut() else {
            error!("Not connected to robot");
            return None;
        };

        match receive.current_pose().await {
            Ok(pose) if pose.is_finite() => Some(pose),
            Ok(pose) => {
                error!("Robot reported a non-finite TCP pose: {:?}", pose.values());
                None
            }
            Err(e) => {
                error!("Failed to get TCP pose: {:#}", e);
                None
            }
        }
    }

    /// Read pose and modes in one go, for diagnostics
    pub async fn robot_status(&mut self) -> Option<RobotStatus> {
        let tcp_pose = self.get_tcp_pose().await?;
        let receive = self.receive.as_mut()?;

        let robot_mode = match receive.operating_mode().await {
            Ok(mode) => mode,
            Err(e) => {
                error!("Failed to read robot mode: {:#}", e);
                return None;
            }
        };
        let safety_mode = match receive.safety_mode().await {
            Ok(mode) => mode,
            Err(e) => {
                error!("Failed to read safety mode: {:#}", e);
                return None;
            }
        };

        Some(RobotStatus::new(robot_mode, safety_mode, tcp_pose))
    }

    pub async fn send_pose_target(&mut self, pose: &Pose, speed: f64, acceleration: f64) -> bool {
        let Some(control) = self.control.as_mut() else {
            error!("Not connected to robot");
            return false;
        };

        info!("Moving to pose {} at speed {:.4}", pose, speed);
        match control.move_to_pose(pose, speed, acceleration).await {
            Ok(true) => true,
            Ok(false) => {
                error!("Move to {} was refused by the control session", pose);
                false
            }
            Err(e) => {
                error!("Move failed: {:#}", e);
                false
            }
        }
    }

    pub async fn send_velocity_target(
        &mut self,
        velocity: &Velocity,
        acceleration: f64,
        duration: Duration,
    ) -> bool {
        let Some(control) = self.control.as_mut() else {
            error!("Not connected to robot");
            return false;
        };

        match control.apply_velocity(velocity, acceleration, duration).await {
            Ok(true) => true,
            Ok(false) => {
                error!("Velocity {:?} was refused by the control session", velocity.values());
                false
            }
            Err(e) => {
                error!("Velocity move failed: {:#}", e);
                false
            }
        }
    }

    /// Decelerate to a stop. Best effort: failures are logged and reported
    /// as `false`.
    pub async fn emergency_stop(&mut self) -> bool {
        let Some(control) = self.control.as_mut() else {
            return false;
        };

        match control.stop(self.settings.stop_deceleration).await {
            Ok(true) => {
                warn!("Emergency stop activated");
                true
            }
            Ok(false) => {
                error!("Emergency stop was refused by the control session");
                false
            }
            Err(e) => {
                error!("Emergency stop failed: {:#}", e);
                false
            }
        }
    }
}
