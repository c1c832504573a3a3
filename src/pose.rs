//! Pose and motion command types
//!
//! Commands arrive as one JSON object per line:
//!
//! ```text
//! {"dx":0.0,"dy":0.0,"dz":0.0,"drx":0.0,"dry":0.0,"drz":0.0}
//! {"pose":[x,y,z,rx,ry,rz]}
//! ```
//!
//! Missing delta fields default to zero and unknown fields are ignored. A
//! record carrying `pose` is an absolute command.

use crate::error::RecordError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// TCP pose `[x, y, z, rx, ry, rz]` in meters and radians (axis-angle)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pose(pub [f64; 6]);

impl Pose {
    pub const fn new(values: [f64; 6]) -> Self {
        Self(values)
    }

    pub fn x(&self) -> f64 {
        self.0[0]
    }

    pub fn y(&self) -> f64 {
        self.0[1]
    }

    pub fn z(&self) -> f64 {
        self.0[2]
    }

    pub fn values(&self) -> [f64; 6] {
        self.0
    }

    /// Componentwise `self + delta`
    pub fn offset(&self, delta: &DeltaCommand) -> Pose {
        let d = delta.values();
        let mut target = self.0;
        for (value, offset) in target.iter_mut().zip(d) {
            *value += offset;
        }
        Pose(target)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z, rx, ry, rz] = self.0;
        write!(f, "[{:.4}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}]", x, y, z, rx, ry, rz)
    }
}

/// Cartesian velocity `[vx, vy, vz, wx, wy, wz]` in m/s and rad/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Velocity(pub [f64; 6]);

impl Velocity {
    pub fn values(&self) -> [f64; 6] {
        self.0
    }

    /// Euclidean norm of the linear components
    pub fn linear_speed(&self) -> f64 {
        let [vx, vy, vz, ..] = self.0;
        (vx * vx + vy * vy + vz * vz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Offset relative to the arm's pose at the moment of execution
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaCommand {
    #[serde(default)]
    pub dx: f64,
    #[serde(default)]
    pub dy: f64,
    #[serde(default)]
    pub dz: f64,
    #[serde(default)]
    pub drx: f64,
    #[serde(default)]
    pub dry: f64,
    #[serde(default)]
    pub drz: f64,
}

impl DeltaCommand {
    pub fn values(&self) -> [f64; 6] {
        [self.dx, self.dy, self.dz, self.drx, self.dry, self.drz]
    }

    /// Velocity that covers this offset within `seconds`
    pub fn as_velocity(&self, seconds: f64) -> Velocity {
        Velocity(self.values().map(|v| v / seconds))
    }

    /// True when the delta has no translational part
    pub fn is_rotation_only(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0 && self.dz == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbsolutePoseCommand {
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    Delta(DeltaCommand),
    Absolute(AbsolutePoseCommand),
}

impl MotionCommand {
    /// Parse one record line
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let record: RawRecord = serde_json::from_str(line.trim())
            .map_err(|e| RecordError::new(format!("invalid command: {}", e)))?;
        Ok(record.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MotionCommand::Delta(_) => "delta",
            MotionCommand::Absolute(_) => "pose",
        }
    }
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    pose: Option<Pose>,
    #[serde(flatten)]
    delta: DeltaCommand,
}

impl From<RawRecord> for MotionCommand {
    fn from(record: RawRecord) -> Self {
        match record.pose {
            Some(pose) => MotionCommand::Absolute(AbsolutePoseCommand { pose }),
            None => MotionCommand::Delta(record.delta),
        }
    }
}
