//! URScript control session over the controller's primary interface
//!
//! Each motion command is a one-line program. The controller replaces the
//! running program with the new one, which gives the single active motion
//! command the processor relies on.

use crate::config::Config;
use crate::pose::{Pose, Velocity};
use crate::rtde::RtdeReceiveSession;
use crate::session::{ControlSession, SessionConnector};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn format_values(values: &[f64; 6]) -> String {
    values
        .iter()
        .map(|v| format!("{:.6}", v))
        .collect::<Vec<_>>()
        .join(",")
}

/// `movel` to a Cartesian pose
pub fn movel_script(pose: &Pose, speed: f64, acceleration: f64) -> String {
    format!(
        "movel(p[{}], a={:.4}, v={:.4})\n",
        format_values(&pose.values()),
        acceleration,
        speed
    )
}

/// `speedl` for at most `duration`
pub fn speedl_script(velocity: &Velocity, acceleration: f64, duration: Duration) -> String {
    format!(
        "speedl([{}], a={:.4}, t={:.4})\n",
        format_values(&velocity.values()),
        acceleration,
        duration.as_secs_f64()
    )
}

pub fn stopl_script(deceleration: f64) -> String {
    format!("stopl({:.4})\n", deceleration)
}

pub struct UrScriptControlSession {
    writer: Option<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl UrScriptControlSession {
    pub async fn open(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .with_context(|| format!("Timed out connecting to primary interface at {}:{}", host, port))?
            .with_context(|| format!("Failed to connect to primary interface at {}:{}", host, port))?;
        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
        info!("Connected to primary interface at {}:{}", host, port);

        let (mut reader, writer) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));

        // The controller broadcasts state packages on this port; they are not
        // needed here but must be read so the socket stays healthy.
        let drain_connected = Arc::clone(&connected);
        let drain = tokio::spawn(async move {
            let mut buffer = vec![0u8; 4096];
            loop {
                match reader.read(&mut buffer).await {
                    Ok(0) => {
                        warn!("Primary interface closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Primary interface read failed: {}", e);
                        break;
                    }
                }
            }
            drain_connected.store(false, Ordering::Relaxed);
        });

        Ok(Self {
            writer: Some(writer),
            connected,
            drain: Some(drain),
        })
    }

    async fn send_script(&mut self, script: &str) -> Result<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(false);
        };

        debug!("Sending URScript: {}", script.trim_end());
        let result = async {
            writer.write_all(script.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            self.connected.store(false, Ordering::Relaxed);
            return Err(e).context("Failed to send URScript to primary interface");
        }
        Ok(true)
    }
}

#[async_trait]
impl ControlSession for UrScriptControlSession {
    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.connected.load(Ordering::Relaxed)
    }

    async fn move_to_pose(&mut self, pose: &Pose, speed: f64, acceleration: f64) -> Result<bool> {
        self.send_script(&movel_script(pose, speed, acceleration)).await
    }

    async fn apply_velocity(
        &mut self,
        velocity: &Velocity,
        acceleration: f64,
        duration: Duration,
    ) -> Result<bool> {
        self.send_script(&speedl_script(velocity, acceleration, duration)).await
    }

    async fn stop(&mut self, deceleration: f64) -> Result<bool> {
        self.send_script(&stopl_script(deceleration)).await
    }

    async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(drain) = self.drain.take() {
            drain.abort();
            let _ = drain.await;
        }
    }
}

impl Drop for UrScriptControlSession {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

/// Opens URScript control and RTDE receive sessions against a UR controller
#[derive(Debug, Clone)]
pub struct UrConnector {
    pub control_port: u16,
    pub rtde_port: u16,
    pub connect_timeout: Duration,
}

impl UrConnector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            control_port: config.robot.control_port(),
            rtde_port: config.robot.rtde_port(),
            connect_timeout: config.connection.timeout(),
        }
    }
}

#[async_trait]
impl SessionConnector for UrConnector {
    type Control = UrScriptControlSession;
    type Receive = RtdeReceiveSession;

    async fn open_control(&self, ip: &str, _frequency: f64) -> Result<Self::Control> {
        UrScriptControlSession::open(ip, self.control_port, self.connect_timeout).await
    }

    async fn open_receive(&self, ip: &str, frequency: f64) -> Result<Self::Receive> {
        RtdeReceiveSession::open(ip, self.rtde_port, frequency, self.connect_timeout).await
    }
}
