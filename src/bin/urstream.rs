//! urstream - command-file streamer for Universal Robots arms
//!
//! - `replay`: execute every record of a command file once, in order
//! - `follow`: execute commands appended to a file while it grows
//! - `status`: print robot mode, safety mode and TCP pose

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use urstream::{
    CommandLog, CommandProcessor, Config, ConnectionError, ConnectionManager, ConnectionSettings, JsonTelemetry,
    NoOpTelemetry, ProcessorSettings, RobotType, RunSummary, SequentialSource, TailSource, TelemetryPublisher,
    UrConnector,
};

#[derive(Parser)]
#[command(name = "urstream")]
#[command(about = "Stream JSON-lines motion commands to a Universal Robots arm")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Robot IP address (overrides configuration)
    #[arg(long, global = true)]
    robot_ip: Option<String>,

    /// Robot type: simulation or physical (overrides configuration)
    #[arg(long, global = true)]
    robot_type: Option<RobotType>,

    /// Log level: error, warn, info, debug or trace (overrides configuration)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print run events as JSON lines on stdout
    #[arg(long, global = true)]
    json_events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute every command in a file once, in order
    Replay(RunArgs),
    /// Execute commands appended to a file until interrupted
    Follow(RunArgs),
    /// Connect, print the robot's status and disconnect
    Status,
}

#[derive(Args)]
struct RunArgs {
    /// JSON-lines command file, or `-` to replay standard input
    #[arg(long)]
    commands: PathBuf,

    /// Append executed commands to this JSON-lines log
    #[arg(long)]
    log: Option<PathBuf>,

    /// Seconds between commands
    #[arg(long)]
    responsiveness: Option<f64>,

    /// Speed for absolute pose moves (m/s)
    #[arg(long)]
    speed: Option<f64>,

    /// Acceleration for all moves (m/s^2)
    #[arg(long)]
    acceleration: Option<f64>,
}

impl RunArgs {
    fn reads_stdin(&self) -> bool {
        self.commands.as_os_str() == "-"
    }
}

impl Cli {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("URSTREAM_CONFIG").ok())
            .unwrap_or_else(|| "config/default_config.yaml".to_string())
    }

    /// Load the configuration file (if present) and apply command line overrides
    fn load_config(&self) -> Result<Config> {
        let path = self.get_config_path();
        let mut config = if Path::new(&path).exists() {
            Config::load_from_path(&path).with_context(|| format!("Failed to load config from {}", path))?
        } else if self.config.is_some() {
            anyhow::bail!("Config file {} does not exist", path);
        } else {
            Config::default()
        };

        if let Some(ip) = &self.robot_ip {
            config.robot.ip = Some(ip.clone());
        }
        if let Some(robot_type) = self.robot_type {
            config.robot.robot_type = Some(robot_type);
        }
        if let Some(level) = &self.log_level {
            config.logging.level = Some(level.clone());
        }
        if let Command::Replay(run) | Command::Follow(run) = &self.command {
            if let Some(responsiveness) = run.responsiveness {
                config.movement.responsiveness = Some(responsiveness);
            }
            if let Some(speed) = run.speed {
                config.movement.default_speed = Some(speed);
            }
            if let Some(acceleration) = run.acceleration {
                config.movement.default_acceleration = Some(acceleration);
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    tracing_subscriber::fmt()
        .with_max_level(config.logging.level())
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    info!("urstream - Universal Robots command streamer");
    info!("{}", "=".repeat(50));
    info!("Robot: {} ({})", config.robot.ip(), config.robot.robot_type());

    let mut connection = ConnectionManager::new(
        UrConnector::from_config(&config),
        ConnectionSettings::from_config(&config),
    );

    if let Err(e) = connection.connect().await {
        error!("Robot connection failed: {}", e);
        if matches!(e, ConnectionError::SessionUnavailable(_)) {
            error!("Make sure:");
            error!("   - Robot simulator/hardware is running");
            error!("   - Network connectivity is available");
            error!("   - Remote control is enabled on the pendant");
        }
        // A failed preflight leaves both sessions open
        connection.stop_and_disconnect().await;
        return Err(e.into());
    }

    let result = match &cli.command {
        Command::Status => print_status(&mut connection, cli.json_events).await,
        Command::Replay(run) | Command::Follow(run) => {
            let follow = matches!(cli.command, Command::Follow(_));
            run_commands(&mut connection, &config, run, follow, cli.json_events).await
        }
    };

    match &result {
        Ok(()) => {
            connection.disconnect().await;
            info!("Shutdown complete");
        }
        Err(e) => {
            error!("{:#}", e);
            connection.stop_and_disconnect().await;
        }
    }
    result
}

async fn run_commands(
    connection: &mut ConnectionManager<UrConnector>,
    config: &Config,
    run: &RunArgs,
    follow: bool,
    json_events: bool,
) -> Result<()> {
    let telemetry: Arc<dyn TelemetryPublisher> = if json_events {
        Arc::new(JsonTelemetry)
    } else {
        Arc::new(NoOpTelemetry)
    };
    let shutdown_signal = Arc::new(AtomicBool::new(false));
    tokio::spawn(wait_for_shutdown(Arc::clone(&shutdown_signal)));

    let mut log = match &run.log {
        Some(path) => Some(
            CommandLog::open(path)
                .await
                .with_context(|| format!("Failed to open command log {}", path.display()))?,
        ),
        None => None,
    };

    match connection.get_tcp_pose().await {
        Some(pose) => info!("Initial TCP pose: {}", pose),
        None => warn!("Initial TCP pose unavailable"),
    }

    let mut processor = CommandProcessor::new(connection, ProcessorSettings::from_config(config))
        .with_telemetry(telemetry)
        .with_shutdown_signal(shutdown_signal);

    let result: urstream::Result<RunSummary> = if follow {
        if run.reads_stdin() {
            anyhow::bail!("follow needs a command file; standard input can only be replayed");
        }
        ensure_exists(&run.commands).await?;
        let mut source = TailSource::open(&run.commands)
            .await
            .with_context(|| format!("Failed to open {}", run.commands.display()))?;
        info!("Waiting for commands, press Ctrl+C to stop");
        processor.run_streaming(&mut source, log.as_mut()).await
    } else {
        let mut source = if run.reads_stdin() {
            SequentialSource::stdin()
        } else {
            SequentialSource::open(&run.commands)
                .await
                .with_context(|| format!("Failed to open {}", run.commands.display()))?
        };
        processor.run_sequential(&mut source, log.as_mut()).await
    };
    drop(processor);

    match connection.get_tcp_pose().await {
        Some(pose) => info!("Final TCP pose: {}", pose),
        None => warn!("Final TCP pose unavailable"),
    }

    let summary = result?;
    info!(
        "Finished ({}): {} executed, {} skipped",
        summary.outcome, summary.executed, summary.skipped
    );
    if let Some(target) = summary.last_target {
        info!("Last commanded target: {}", target);
    }
    Ok(())
}

async fn print_status(connection: &mut ConnectionManager<UrConnector>, json: bool) -> Result<()> {
    let status = connection
        .robot_status()
        .await
        .context("Failed to read robot status")?;

    if json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    println!("Connection: {:?}", connection.state());
    println!("Robot mode: {} ({})", status.robot_mode_name, status.robot_mode);
    println!("Safety mode: {} ({})", status.safety_mode_name, status.safety_mode);
    println!("TCP pose: {}", status.tcp_pose);
    if status.ready_for_motion() {
        println!("Robot is ready for motion commands");
    }
    for hint in status.hints() {
        println!("  - {}", hint);
    }
    Ok(())
}

/// Create the command file if it is missing, without touching existing content
async fn ensure_exists(path: &Path) -> Result<()> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(())
}

/// Set `shutdown_signal` on Ctrl+C or SIGTERM
async fn wait_for_shutdown(shutdown_signal: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
    shutdown_signal.store(true, Ordering::Relaxed);
}
