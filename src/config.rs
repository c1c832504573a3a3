//! Configuration loading for the command streamer
//!
//! Every field is optional in the YAML file; the accessors on each section
//! document and apply the defaults. [`Config::validate`] runs once at startup
//! and everything downstream works from the validated values.

use crate::safety::{AxisRange, MotionLimits, WorkspaceBounds};
use crate::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default primary interface port on UR controllers (URScript programs)
pub const UR_PRIMARY_PORT: u16 = 30001;
/// Default RTDE port on UR controllers
pub const UR_RTDE_PORT: u16 = 30004;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub robot: RobotConfig,
    pub connection: ConnectionConfig,
    pub movement: MovementConfig,
    pub safety: SafetyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotType {
    #[default]
    Simulation,
    Physical,
}

impl std::str::FromStr for RobotType {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simulation" => Ok(RobotType::Simulation),
            "physical" => Ok(RobotType::Physical),
            other => Err(ControlError::Config(format!(
                "unknown robot type '{}' (expected simulation or physical)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RobotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RobotType::Simulation => write!(f, "simulation"),
            RobotType::Physical => write!(f, "physical"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RobotConfig {
    pub ip: Option<String>,
    #[serde(rename = "type")]
    pub robot_type: Option<RobotType>,
    pub frequency: Option<f64>,
    pub control_port: Option<u16>,
    pub rtde_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub timeout: Option<f64>,
}

/// How delta commands are turned into motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaMode {
    /// Move linearly to `current + delta`
    #[default]
    Pose,
    /// Hold `delta / responsiveness` as a Cartesian velocity
    Velocity,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MovementConfig {
    pub default_speed: Option<f64>,
    pub default_acceleration: Option<f64>,
    pub responsiveness: Option<f64>,
    pub command_duration: Option<f64>,
    pub delta_mode: Option<DeltaMode>,
    pub stop_deceleration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SafetyConfig {
    pub max_velocity: Option<f64>,
    pub max_acceleration: Option<f64>,
    pub workspace_limits: Option<WorkspaceBounds>,
    pub enforce_in_simulation: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl RobotConfig {
    /// Robot or simulator address, default `127.0.0.1`
    pub fn ip(&self) -> &str {
        self.ip.as_deref().unwrap_or("127.0.0.1")
    }

    /// Default `simulation`
    pub fn robot_type(&self) -> RobotType {
        self.robot_type.unwrap_or_default()
    }

    /// Session communication frequency in Hz, default 500
    pub fn frequency(&self) -> f64 {
        self.frequency.unwrap_or(500.0)
    }

    pub fn control_port(&self) -> u16 {
        self.control_port.unwrap_or(UR_PRIMARY_PORT)
    }

    pub fn rtde_port(&self) -> u16 {
        self.rtde_port.unwrap_or(UR_RTDE_PORT)
    }
}

impl ConnectionConfig {
    /// Session connect timeout, default 5 s
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout.unwrap_or(5.0))
    }
}

impl MovementConfig {
    /// Linear speed for absolute moves in m/s, default 0.2
    pub fn default_speed(&self) -> f64 {
        self.default_speed.unwrap_or(0.2)
    }

    /// Linear acceleration in m/s², default 0.5
    pub fn default_acceleration(&self) -> f64 {
        self.default_acceleration.unwrap_or(0.5)
    }

    /// Cadence between control-loop ticks, default 1 s
    pub fn responsiveness(&self) -> Duration {
        seconds(self.responsiveness.unwrap_or(1.0))
    }

    /// How long a velocity command is held by the session, default equal
    /// to the cadence
    pub fn command_duration(&self) -> Duration {
        self.command_duration
            .map(seconds)
            .unwrap_or_else(|| self.responsiveness())
    }

    pub fn delta_mode(&self) -> DeltaMode {
        self.delta_mode.unwrap_or_default()
    }

    /// Deceleration used by emergency stops in m/s², default 2.0
    pub fn stop_deceleration(&self) -> f64 {
        self.stop_deceleration.unwrap_or(2.0)
    }
}

impl SafetyConfig {
    /// Default 0.5 m/s
    pub fn max_velocity(&self) -> f64 {
        self.max_velocity.unwrap_or(0.5)
    }

    /// Default 1.0 m/s²
    pub fn max_acceleration(&self) -> f64 {
        self.max_acceleration.unwrap_or(1.0)
    }

    /// Whether simulation targets go through the safety gate, default true
    pub fn enforce_in_simulation(&self) -> bool {
        self.enforce_in_simulation.unwrap_or(true)
    }

    pub fn limits(&self) -> MotionLimits {
        MotionLimits {
            max_linear_velocity: self.max_velocity(),
            max_acceleration: self.max_acceleration(),
            workspace_bounds: self.workspace_limits.unwrap_or_default(),
        }
    }
}

impl LoggingConfig {
    /// Log level name, default `info`
    pub fn level(&self) -> tracing::Level {
        self.level
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or(tracing::Level::INFO)
    }
}

impl Config {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ControlError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Whether motion commands must pass the safety gate
    pub fn safety_gate_enforced(&self) -> bool {
        match self.robot.robot_type() {
            RobotType::Physical => true,
            RobotType::Simulation => self.safety.enforce_in_simulation(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.robot.ip().trim().is_empty() {
            return Err(ControlError::Config("robot.ip must not be empty".to_string()));
        }

        positive("robot.frequency", self.robot.frequency())?;
        positive("connection.timeout", self.connection.timeout.unwrap_or(5.0))?;
        positive("movement.default_speed", self.movement.default_speed())?;
        positive("movement.default_acceleration", self.movement.default_acceleration())?;
        positive("movement.responsiveness", self.movement.responsiveness.unwrap_or(1.0))?;
        if let Some(duration) = self.movement.command_duration {
            positive("movement.command_duration", duration)?;
        }
        positive("movement.stop_deceleration", self.movement.stop_deceleration())?;
        positive("safety.max_velocity", self.safety.max_velocity())?;
        positive("safety.max_acceleration", self.safety.max_acceleration())?;

        if self.movement.command_duration() < self.movement.responsiveness() {
            return Err(ControlError::Config(format!(
                "movement.command_duration ({:?}) must not be shorter than movement.responsiveness ({:?})",
                self.movement.command_duration(),
                self.movement.responsiveness()
            )));
        }

        if let Some(bounds) = &self.safety.workspace_limits {
            for (name, range) in [("x", bounds.x), ("y", bounds.y), ("z", bounds.z)] {
                if let Some(range) = range {
                    check_range(name, &range)?;
                }
            }
        }

        if let Some(level) = &self.logging.level {
            level.parse::<tracing::Level>().map_err(|_| {
                ControlError::Config(format!("logging.level '{}' is not a log level", level))
            })?;
        }

        Ok(())
    }
}

/// Non-finite or negative values map to zero and are caught by `validate`
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ControlError::Config(format!("{} must be a positive number, got {}", name, value)))
    }
}

fn check_range(axis: &str, range: &AxisRange) -> Result<()> {
    if !(range.min.is_finite() && range.max.is_finite()) || range.min > range.max {
        return Err(ControlError::Config(format!(
            "safety.workspace_limits.{} must be [min, max] with min <= max, got [{}, {}]",
            axis, range.min, range.max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
robot:
  ip: 192.168.1.20
  type: physical
  frequency: 125.0
connection:
  timeout: 2.5
movement:
  default_speed: 0.1
  default_acceleration: 0.3
  responsiveness: 0.5
  command_duration: 0.6
  delta_mode: velocity
safety:
  max_velocity: 0.25
  max_acceleration: 0.8
  workspace_limits:
    x: [-0.5, 0.5]
    z: [0.05, 0.9]
logging:
  level: DEBUG
"#;

    #[test]
    fn test_defaults_apply_to_empty_config() {
        let config = Config::load_from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.robot.ip(), "127.0.0.1");
        assert_eq!(config.robot.robot_type(), RobotType::Simulation);
        assert_eq!(config.robot.frequency(), 500.0);
        assert_eq!(config.movement.default_speed(), 0.2);
        assert_eq!(config.movement.default_acceleration(), 0.5);
        assert_eq!(config.movement.responsiveness(), Duration::from_secs(1));
        assert_eq!(config.movement.command_duration(), Duration::from_secs(1));
        assert_eq!(config.movement.delta_mode(), DeltaMode::Pose);
        assert_eq!(config.safety.max_velocity(), 0.5);
        assert_eq!(config.safety.max_acceleration(), 1.0);
        assert!(config.safety_gate_enforced());
        assert_eq!(config.logging.level(), tracing::Level::INFO);
    }

    #[test]
    fn test_full_config() {
        let config = Config::load_from_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.robot.ip(), "192.168.1.20");
        assert_eq!(config.robot.robot_type(), RobotType::Physical);
        assert_eq!(config.connection.timeout(), Duration::from_millis(2500));
        assert_eq!(config.movement.delta_mode(), DeltaMode::Velocity);
        assert_eq!(config.movement.command_duration(), Duration::from_millis(600));

        let limits = config.safety.limits();
        assert_eq!(limits.max_linear_velocity, 0.25);
        assert_eq!(limits.workspace_bounds.x, Some(AxisRange::new(-0.5, 0.5)));
        assert_eq!(limits.workspace_bounds.y, None);
        assert_eq!(limits.workspace_bounds.z, Some(AxisRange::new(0.05, 0.9)));
        assert_eq!(config.logging.level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = Config::load_from_str(include_str!("../config/default_config.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.robot.control_port(), UR_PRIMARY_PORT);
        assert_eq!(config.robot.rtde_port(), UR_RTDE_PORT);
        assert_eq!(config.safety.limits().workspace_bounds.z, Some(AxisRange::new(0.0, 1.0)));
    }

    #[test]
    fn test_simulation_gate_can_be_disabled() {
        let config = Config::load_from_str("safety:\n  enforce_in_simulation: false\n").unwrap();
        assert!(!config.safety_gate_enforced());

        let physical = Config::load_from_str(
            "robot:\n  type: physical\nsafety:\n  enforce_in_simulation: false\n",
        )
        .unwrap();
        assert!(physical.safety_gate_enforced());
    }

    #[test]
    fn test_rejects_inverted_workspace_range() {
        let config = Config::load_from_str("safety:\n  workspace_limits:\n    y: [0.5, -0.5]\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workspace_limits.y"), "{}", err);
    }

    #[test]
    fn test_rejects_duration_shorter_than_cadence() {
        let config = Config::load_from_str(
            "movement:\n  responsiveness: 1.0\n  command_duration: 0.5\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ControlError::Config(_))));
    }

    #[test]
    fn test_rejects_non_positive_values() {
        for yaml in [
            "movement:\n  responsiveness: 0\n",
            "safety:\n  max_velocity: -1\n",
            "robot:\n  frequency: 0\n",
        ] {
            let config = Config::load_from_str(yaml).unwrap();
            assert!(config.validate().is_err(), "accepted {:?}", yaml);
        }
    }

    #[test]
    fn test_unknown_robot_type_is_a_parse_error() {
        assert!(Config::load_from_str("robot:\n  type: hovercraft\n").is_err());
        assert!("hovercraft".parse::<RobotType>().is_err());
        assert_eq!("PHYSICAL".parse::<RobotType>().unwrap(), RobotType::Physical);
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let config = Config::load_from_str("logging:\n  level: chatty\n").unwrap();
        assert!(config.validate().is_err());
    }
}
