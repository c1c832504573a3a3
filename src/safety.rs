//! Safety gate for motion commands
//!
//! Pure checks of a motion intent against the configured [`MotionLimits`].
//! Nothing in here talks to the robot; the processor consults these
//! functions before anything is forwarded to the control session.
//!
//! Angular velocity is deliberately not bounded here: only the linear part
//! of a velocity target is compared against `max_linear_velocity`.

use crate::pose::{Pose, Velocity};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Inclusive `[min, max]` range for one workspace axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

impl From<[f64; 2]> for AxisRange {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}

impl From<AxisRange> for [f64; 2] {
    fn from(range: AxisRange) -> Self {
        [range.min, range.max]
    }
}

/// Optional per-axis position bounds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    pub x: Option<AxisRange>,
    pub y: Option<AxisRange>,
    pub z: Option<AxisRange>,
}

impl WorkspaceBounds {
    fn axes(&self) -> [(Axis, Option<AxisRange>); 3] {
        [(Axis::X, self.x), (Axis::Y, self.y), (Axis::Z, self.z)]
    }
}

/// Physical limits, loaded once at startup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    pub max_linear_velocity: f64,
    pub max_acceleration: f64,
    pub workspace_bounds: WorkspaceBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
        }
    }
}

/// The first constraint a motion intent violated
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    #[error("{quantity} is not a finite number")]
    NonFinite { quantity: &'static str },

    #[error("speed {speed} exceeds maximum {limit}")]
    Speed { speed: f64, limit: f64 },

    #[error("acceleration {acceleration} exceeds maximum {limit}")]
    Acceleration { acceleration: f64, limit: f64 },

    #[error("{axis} position {value} outside workspace limits [{min}, {max}]")]
    Workspace { axis: Axis, value: f64, min: f64, max: f64 },

    #[error("linear velocity {speed} exceeds maximum {limit}")]
    LinearVelocity { speed: f64, limit: f64 },
}

/// Check a pose target moved to at `speed` / `acceleration`.
///
/// Violations are reported in the order speed, acceleration, X, Y, Z.
pub fn validate_pose_target(
    pose: &Pose,
    speed: f64,
    acceleration: f64,
    limits: &MotionLimits,
) -> Result<(), Rejection> {
    if !pose.is_finite() {
        return Err(Rejection::NonFinite { quantity: "pose" });
    }
    if !speed.is_finite() {
        return Err(Rejection::NonFinite { quantity: "speed" });
    }
    if !acceleration.is_finite() {
        return Err(Rejection::NonFinite { quantity: "acceleration" });
    }

    if speed > limits.max_linear_velocity {
        return Err(Rejection::Speed {
            speed,
            limit: limits.max_linear_velocity,
        });
    }
    check_acceleration(acceleration, limits)?;

    let values = pose.values();
    for (axis, range) in limits.workspace_bounds.axes() {
        if let Some(range) = range {
            let value = values[axis.index()];
            if !range.contains(value) {
                return Err(Rejection::Workspace {
                    axis,
                    value,
                    min: range.min,
                    max: range.max,
                });
            }
        }
    }

    Ok(())
}

/// Check a velocity target. Only the linear components are bounded.
pub fn validate_velocity_target(
    velocity: &Velocity,
    acceleration: f64,
    limits: &MotionLimits,
) -> Result<(), Rejection> {
    if !velocity.is_finite() {
        return Err(Rejection::NonFinite { quantity: "velocity" });
    }
    if !acceleration.is_finite() {
        return Err(Rejection::NonFinite { quantity: "acceleration" });
    }

    let speed = velocity.linear_speed();
    if speed > limits.max_linear_velocity {
        return Err(Rejection::LinearVelocity {
            speed,
            limit: limits.max_linear_velocity,
        });
    }
    check_acceleration(acceleration, limits)
}

fn check_acceleration(acceleration: f64, limits: &MotionLimits) -> Result<(), Rejection> {
    if acceleration > limits.max_acceleration {
        return Err(Rejection::Acceleration {
            acceleration,
            limit: limits.max_acceleration,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> MotionLimits {
        MotionLimits {
            max_linear_velocity: 0.5,
            max_acceleration: 1.0,
            workspace_bounds: WorkspaceBounds {
                x: Some(AxisRange::new(-0.8, 0.8)),
                y: Some(AxisRange::new(-0.6, 0.6)),
                z: Some(AxisRange::new(0.0, 1.0)),
            },
        }
    }

    fn pose_at(x: f64, y: f64, z: f64) -> Pose {
        Pose::new([x, y, z, 0.0, 3.14, 0.0])
    }

    #[test]
    fn test_accepts_within_limits() {
        assert_eq!(validate_pose_target(&pose_at(0.1, 0.2, 0.3), 0.2, 0.5, &limits()), Ok(()));
    }

    #[test]
    fn test_x_bounds_are_inclusive() {
        let limits = limits();
        for x in [-0.8, -0.3, 0.0, 0.8] {
            assert!(validate_pose_target(&pose_at(x, 0.0, 0.5), 0.1, 0.1, &limits).is_ok(), "x={}", x);
        }
        for x in [-0.8000001, 0.80001, 5.0, -2.0] {
            let result = validate_pose_target(&pose_at(x, 0.0, 0.5), 0.1, 0.1, &limits);
            assert!(
                matches!(result, Err(Rejection::Workspace { axis: Axis::X, .. })),
                "x={} gave {:?}",
                x,
                result
            );
        }
    }

    #[test]
    fn test_rejection_order() {
        let limits = limits();
        let outside = pose_at(2.0, 2.0, 2.0);

        let result = validate_pose_target(&outside, 0.9, 3.0, &limits);
        assert!(matches!(result, Err(Rejection::Speed { .. })));

        let result = validate_pose_target(&outside, 0.1, 3.0, &limits);
        assert!(matches!(result, Err(Rejection::Acceleration { .. })));

        let result = validate_pose_target(&outside, 0.1, 0.1, &limits);
        assert!(matches!(result, Err(Rejection::Workspace { axis: Axis::X, .. })));

        let result = validate_pose_target(&pose_at(0.0, 2.0, 2.0), 0.1, 0.1, &limits);
        assert!(matches!(result, Err(Rejection::Workspace { axis: Axis::Y, .. })));

        let result = validate_pose_target(&pose_at(0.0, 0.0, -0.1), 0.1, 0.1, &limits);
        assert!(matches!(result, Err(Rejection::Workspace { axis: Axis::Z, .. })));
    }

    #[test]
    fn test_unbounded_axes_are_not_checked() {
        let limits = MotionLimits {
            workspace_bounds: WorkspaceBounds::default(),
            ..limits()
        };
        assert!(validate_pose_target(&pose_at(100.0, -100.0, 50.0), 0.1, 0.1, &limits).is_ok());
    }

    #[test]
    fn test_speed_equal_to_limit_is_accepted() {
        assert!(validate_pose_target(&pose_at(0.0, 0.0, 0.5), 0.5, 1.0, &limits()).is_ok());
    }

    #[test]
    fn test_velocity_uses_linear_norm_only() {
        let limits = limits();
        // |(0.3, 0.4, 0)| = 0.5, exactly at the limit
        let at_limit = Velocity([0.3, 0.4, 0.0, 10.0, -10.0, 10.0]);
        assert!(validate_velocity_target(&at_limit, 0.5, &limits).is_ok());

        let over = Velocity([0.3, 0.4, 0.01, 0.0, 0.0, 0.0]);
        assert!(matches!(
            validate_velocity_target(&over, 0.5, &limits),
            Err(Rejection::LinearVelocity { .. })
        ));

        let spinning = Velocity([0.0, 0.0, 0.0, 100.0, 100.0, 100.0]);
        assert!(validate_velocity_target(&spinning, 0.5, &limits).is_ok());
    }

    #[test]
    fn test_velocity_acceleration_limit() {
        let result = validate_velocity_target(&Velocity::default(), 1.5, &limits());
        assert!(matches!(result, Err(Rejection::Acceleration { .. })));
    }

    #[test]
    fn test_non_finite_inputs_rejected() {
        let limits = limits();
        let nan_pose = Pose::new([f64::NAN, 0.0, 0.5, 0.0, 0.0, 0.0]);
        assert!(matches!(
            validate_pose_target(&nan_pose, 0.1, 0.1, &limits),
            Err(Rejection::NonFinite { .. })
        ));
        assert!(matches!(
            validate_pose_target(&pose_at(0.0, 0.0, 0.5), f64::NAN, 0.1, &limits),
            Err(Rejection::NonFinite { .. })
        ));
        assert!(matches!(
            validate_velocity_target(&Velocity([f64::INFINITY, 0.0, 0.0, 0.0, 0.0, 0.0]), 0.1, &limits),
            Err(Rejection::NonFinite { .. })
        ));
    }

    #[test]
    fn test_rejection_message_names_constraint() {
        let err = validate_pose_target(&pose_at(0.0, 0.0, 0.5), 10.0, 0.1, &limits()).unwrap_err();
        assert_eq!(err.to_string(), "speed 10 exceeds maximum 0.5");
    }
}
