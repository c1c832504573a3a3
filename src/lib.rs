//! urstream - stream JSON-lines motion commands to a Universal Robots arm
//!
//! Reads delta or absolute pose commands from a file, either replaying it
//! once or following it as it grows, and turns each command into a motion
//! on the arm at a fixed cadence, behind a safety gate.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use urstream::{CommandProcessor, Config, ConnectionManager, ConnectionSettings,
//!                ProcessorSettings, SequentialSource, UrConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_from_path("config/default_config.yaml")?;
//!     config.validate()?;
//!
//!     let mut connection = ConnectionManager::new(
//!         UrConnector::from_config(&config),
//!         ConnectionSettings::from_config(&config),
//!     );
//!     connection.connect().await?;
//!
//!     let mut source = SequentialSource::open("demos/square.jsonl").await?;
//!     let summary = CommandProcessor::new(&mut connection, ProcessorSettings::from_config(&config))
//!         .run_sequential(&mut source, None)
//!         .await?;
//!     println!("{} commands executed", summary.executed);
//!
//!     connection.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **CommandProcessor**: read, validate, send, log, sleep
//! - **SequentialSource / TailSource**: replay or follow the command file
//! - **Safety gate**: velocity, acceleration and workspace limits
//! - **ConnectionManager**: session lifecycle over the `session` traits
//! - **UrConnector**: URScript control plus RTDE state sessions
//! - **TelemetryPublisher**: structured run events

pub mod command_log;
pub mod config;
pub mod connection;
pub mod error;
pub mod json_output;
pub mod pose;
pub mod processor;
pub mod rtde;
pub mod safety;
pub mod session;
pub mod source;
pub mod status;
pub mod telemetry;
pub mod urscript;

pub use command_log::{CommandLog, LogEntry};
pub use config::{Config, DeltaMode, RobotType};
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState};
pub use error::{ConnectionError, ControlError, RecordError, Result};
pub use pose::{AbsolutePoseCommand, DeltaCommand, MotionCommand, Pose, Velocity};
pub use processor::{CommandProcessor, ProcessorSettings, ProcessorState, RunOutcome, RunSummary};
pub use safety::{validate_pose_target, validate_velocity_target, MotionLimits, Rejection};
pub use session::{ControlSession, ReceiveSession, SessionConnector};
pub use source::{SequentialSource, SourceItem, TailSource, TailTick};
pub use status::RobotStatus;
pub use telemetry::{JsonTelemetry, NoOpTelemetry, TelemetryPublisher};
pub use urscript::UrConnector;
