//! Robot status snapshot and mode names
//!
//! Mode numbers follow the values the controller reports over RTDE.

use crate::pose::Pose;
use serde::Serialize;

pub const ROBOT_MODE_RUNNING: i32 = 7;
pub const SAFETY_MODE_NORMAL: i32 = 1;

/// Robot mode name mappings
pub const ROBOT_MODE_NAMES: &[(i32, &str)] = &[
    (-1, "NO_CONTROLLER"),
    (0, "DISCONNECTED"),
    (1, "CONFIRM_SAFETY"),
    (2, "BOOTING"),
    (3, "POWER_OFF"),
    (4, "POWER_ON"),
    (5, "IDLE"),
    (6, "BACKDRIVE"),
    (7, "RUNNING"),
    (8, "UPDATING_FIRMWARE"),
];

/// Safety mode name mappings
pub const SAFETY_MODE_NAMES: &[(i32, &str)] = &[
    (1, "NORMAL"),
    (2, "REDUCED"),
    (3, "PROTECTIVE_STOP"),
    (4, "RECOVERY"),
    (5, "SAFEGUARD_STOP"),
    (6, "SYSTEM_EMERGENCY_STOP"),
    (7, "ROBOT_EMERGENCY_STOP"),
    (8, "VIOLATION"),
    (9, "FAULT"),
    (10, "VALIDATE_JOINT_ID"),
    (11, "UNDEFINED_SAFETY_MODE"),
    (12, "AUTOMATIC_MODE_SAFEGUARD_STOP"),
    (13, "SYSTEM_THREE_POSITION_ENABLING_STOP"),
];

fn lookup(table: &[(i32, &str)], value: i32) -> String {
    table
        .iter()
        .find(|(num, _)| *num == value)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("UNKNOWN({})", value))
}

/// Get robot mode name from numeric value
pub fn robot_mode_name(mode: i32) -> String {
    lookup(ROBOT_MODE_NAMES, mode)
}

/// Get safety mode name from numeric value
pub fn safety_mode_name(mode: i32) -> String {
    lookup(SAFETY_MODE_NAMES, mode)
}

/// Point-in-time view of the arm, read from the state-query session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotStatus {
    pub robot_mode: i32,
    pub robot_mode_name: String,
    pub safety_mode: i32,
    pub safety_mode_name: String,
    pub tcp_pose: Pose,
}

impl RobotStatus {
    pub fn new(robot_mode: i32, safety_mode: i32, tcp_pose: Pose) -> Self {
        Self {
            robot_mode,
            robot_mode_name: robot_mode_name(robot_mode),
            safety_mode,
            safety_mode_name: safety_mode_name(safety_mode),
            tcp_pose,
        }
    }

    pub fn ready_for_motion(&self) -> bool {
        self.robot_mode == ROBOT_MODE_RUNNING && self.safety_mode == SAFETY_MODE_NORMAL
    }

    /// Operator hints for the current modes
    pub fn hints(&self) -> Vec<String> {
        let mut hints = Vec::new();
        match self.robot_mode {
            1 => hints.push("Robot needs safety confirmation: confirm the safety configuration on the pendant".to_string()),
            3 | 4 => hints.push("Robot is not powered: power on and release the brakes".to_string()),
            5 => hints.push("Robot is idle: release the brakes and start the program".to_string()),
            ROBOT_MODE_RUNNING => {}
            other => hints.push(format!("Robot in mode {} may need configuration", robot_mode_name(other))),
        }
        if self.safety_mode != SAFETY_MODE_NORMAL {
            hints.push(format!(
                "Safety mode is {}: check the safety panel",
                self.safety_mode_name
            ));
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(robot_mode_name(7), "RUNNING");
        assert_eq!(robot_mode_name(-1), "NO_CONTROLLER");
        assert_eq!(robot_mode_name(42), "UNKNOWN(42)");
        assert_eq!(safety_mode_name(1), "NORMAL");
        assert_eq!(safety_mode_name(3), "PROTECTIVE_STOP");
    }

    #[test]
    fn test_ready_status_has_no_hints() {
        let status = RobotStatus::new(7, 1, Pose::default());
        assert!(status.ready_for_motion());
        assert!(status.hints().is_empty());
    }

    #[test]
    fn test_protective_stop_hint() {
        let status = RobotStatus::new(7, 3, Pose::default());
        assert!(!status.ready_for_motion());
        let hints = status.hints();
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("PROTECTIVE_STOP"));
    }
}
