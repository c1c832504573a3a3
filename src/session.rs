//! Collaborator interface to the arm's real-time sessions
//!
//! The connection manager only ever talks to the arm through these traits.
//! Errors returned by an implementation are treated as failures of the
//! operation that raised them; they never terminate the process on their own.

use crate::pose::{Pose, Velocity};
use async_trait::async_trait;
use std::time::Duration;

/// Session that accepts motion commands. One motion command is active at a
/// time; a new command replaces the previous one.
#[async_trait]
pub trait ControlSession: Send {
    fn is_connected(&self) -> bool;

    /// Linear move to `pose`. Returns once the command has been accepted.
    async fn move_to_pose(&mut self, pose: &Pose, speed: f64, acceleration: f64) -> anyhow::Result<bool>;

    /// Hold `velocity` for at most `duration`, after which the controller
    /// decelerates to a stop unless a new command arrived.
    async fn apply_velocity(
        &mut self,
        velocity: &Velocity,
        acceleration: f64,
        duration: Duration,
    ) -> anyhow::Result<bool>;

    async fn stop(&mut self, deceleration: f64) -> anyhow::Result<bool>;

    async fn disconnect(&mut self);
}

/// Session that reports the arm's state
#[async_trait]
pub trait ReceiveSession: Send {
    fn is_connected(&self) -> bool;

    async fn current_pose(&mut self) -> anyhow::Result<Pose>;

    async fn operating_mode(&mut self) -> anyhow::Result<i32>;

    async fn safety_mode(&mut self) -> anyhow::Result<i32>;

    async fn disconnect(&mut self);
}

/// Opens the pair of sessions for one robot
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Control: ControlSession;
    type Receive: ReceiveSession;

    async fn open_control(&self, ip: &str, frequency: f64) -> anyhow::Result<Self::Control>;

    async fn open_receive(&self, ip: &str, frequency: f64) -> anyhow::Result<Self::Receive>;
}
