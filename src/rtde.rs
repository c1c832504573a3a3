//! RTDE (Real-Time Data Exchange) state-query session for Universal Robots
//!
//! A small protocol v2 client: negotiate the version, register an output
//! recipe, start synchronization and decode data packages. The receive
//! session runs the reader on a blocking task and keeps only the latest
//! sample in a watch channel, so queries never see a backlog of old packages.

use crate::pose::Pose;
use crate::session::ReceiveSession;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lower bound on how old a sample may be before the stream counts as lost
pub const MIN_SAMPLE_AGE_LIMIT: Duration = Duration::from_millis(500);

/// Number of missed update periods tolerated before a sample is stale
const MISSED_PERIODS: f64 = 3.0;

/// Staleness limit for a stream updating at `frequency` Hz: three update
/// periods, but never less than [`MIN_SAMPLE_AGE_LIMIT`].
pub fn max_sample_age(frequency: f64) -> Duration {
    Duration::try_from_secs_f64(MISSED_PERIODS / frequency)
        .map(|age| age.max(MIN_SAMPLE_AGE_LIMIT))
        .unwrap_or(MIN_SAMPLE_AGE_LIMIT)
}

const PROTOCOL_VERSION: u16 = 2;

/// Variables requested from the controller
const OUTPUT_VARIABLES: [&str; 4] = ["timestamp", "actual_TCP_pose", "robot_mode", "safety_mode"];

/// RTDE message types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtdeMessage {
    RequestProtocolVersion = 86,
    TextMessage = 77,
    DataPackage = 85,
    ControlPackageSetupOutputs = 79,
    ControlPackageSetupInputs = 73,
    ControlPackageStart = 83,
    ControlPackagePause = 80,
}

impl TryFrom<u8> for RtdeMessage {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            86 => Ok(RtdeMessage::RequestProtocolVersion),
            77 => Ok(RtdeMessage::TextMessage),
            85 => Ok(RtdeMessage::DataPackage),
            79 => Ok(RtdeMessage::ControlPackageSetupOutputs),
            73 => Ok(RtdeMessage::ControlPackageSetupInputs),
            83 => Ok(RtdeMessage::ControlPackageStart),
            80 => Ok(RtdeMessage::ControlPackagePause),
            other => Err(anyhow!("Unknown RTDE message type: {}", other)),
        }
    }
}

/// One decoded state sample
#[derive(Debug, Clone)]
pub struct RtdeSample {
    /// Controller time in seconds since power-on
    pub timestamp: f64,
    pub tcp_pose: Pose,
    pub robot_mode: i32,
    pub safety_mode: i32,
    pub received_at: Instant,
}

impl RtdeSample {
    fn from_values(values: &HashMap<String, Vec<f64>>) -> Result<Self> {
        let tcp: [f64; 6] = values
            .get("actual_TCP_pose")
            .cloned()
            .ok_or_else(|| anyhow!("data package has no actual_TCP_pose"))?
            .try_into()
            .map_err(|_| anyhow!("actual_TCP_pose is not a 6-vector"))?;

        let scalar = |name: &str| -> Result<f64> {
            values
                .get(name)
                .and_then(|v| v.first())
                .copied()
                .ok_or_else(|| anyhow!("data package has no {}", name))
        };

        Ok(Self {
            timestamp: scalar("timestamp")?,
            tcp_pose: Pose::new(tcp),
            robot_mode: scalar("robot_mode")? as i32,
            safety_mode: scalar("safety_mode")? as i32,
            received_at: Instant::now(),
        })
    }
}

/// Blocking RTDE client
pub struct RtdeClient {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    variables: Vec<String>,
    variable_types: Vec<String>,
}

impl RtdeClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            stream: None,
            variables: Vec::new(),
            variable_types: Vec::new(),
        }
    }

    /// Connect to the RTDE interface
    pub fn connect(&mut self, timeout: Duration) -> Result<()> {
        use std::net::ToSocketAddrs;

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}:{}", self.host, self.port))?
            .next()
            .ok_or_else(|| anyhow!("No address for {}:{}", self.host, self.port))?;

        let stream = TcpStream::connect_timeout(&addr, timeout)
            .with_context(|| format!("Failed to connect to RTDE at {}", addr))?;
        stream.set_nodelay(true).ok();
        stream
            .set_read_timeout(Some(timeout))
            .context("Failed to set RTDE read timeout")?;

        self.stream = Some(stream);
        Ok(())
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.stream
            .as_ref()
            .ok_or_else(|| anyhow!("Not connected"))?
            .set_read_timeout(Some(timeout))
            .context("Failed to set RTDE read timeout")
    }

    fn send_message(&mut self, msg_type: RtdeMessage, payload: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| anyhow!("Not connected"))?;

        let size = (payload.len() + 3) as u16;
        let mut packet = Vec::with_capacity(size as usize);
        packet.extend_from_slice(&size.to_be_bytes());
        packet.push(msg_type as u8);
        packet.extend_from_slice(payload);

        stream.write_all(&packet).context("Failed to send RTDE message")?;
        Ok(())
    }

    fn receive_message(&mut self) -> Result<(RtdeMessage, Vec<u8>)> {
        let stream = self.stream.as_mut().ok_or_else(|| anyhow!("Not connected"))?;

        let mut header = [0u8; 3];
        stream.read_exact(&mut header).context("Failed to read RTDE header")?;

        let size = u16::from_be_bytes([header[0], header[1]]) as usize;
        if size < 3 {
            bail!("Invalid RTDE message size {}", size);
        }
        let msg_type = RtdeMessage::try_from(header[2])?;

        let mut payload = vec![0u8; size - 3];
        if !payload.is_empty() {
            stream.read_exact(&mut payload).context("Failed to read RTDE payload")?;
        }

        Ok((msg_type, payload))
    }

    /// Receive the next message of `expected` type, skipping controller text
    /// messages in between
    fn receive_expected(&mut self, expected: RtdeMessage) -> Result<Vec<u8>> {
        loop {
            let (msg_type, payload) = self.receive_message()?;
            if msg_type == expected {
                return Ok(payload);
            }
            if msg_type == RtdeMessage::TextMessage {
                debug!("RTDE text message: {}", String::from_utf8_lossy(&payload));
                continue;
            }
            bail!("Expected RTDE {:?}, got {:?}", expected, msg_type);
        }
    }

    pub fn negotiate_protocol_version(&mut self, version: u16) -> Result<()> {
        self.send_message(RtdeMessage::RequestProtocolVersion, &version.to_be_bytes())?;
        let payload = self.receive_expected(RtdeMessage::RequestProtocolVersion)?;

        if payload.first() == Some(&1) {
            Ok(())
        } else {
            bail!("RTDE protocol version {} refused by controller", version)
        }
    }

    /// Register the output recipe at `frequency` Hz
    pub fn setup_output_recipe(&mut self, variables: &[&str], frequency: f64) -> Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&frequency.to_be_bytes());
        payload.extend_from_slice(variables.join(",").as_bytes());

        self.send_message(RtdeMessage::ControlPackageSetupOutputs, &payload)?;
        let response = self.receive_expected(RtdeMessage::ControlPackageSetupOutputs)?;

        let types = response
            .get(1..)
            .ok_or_else(|| anyhow!("Empty output recipe response"))?;
        let types: Vec<String> = String::from_utf8_lossy(types)
            .split(',')
            .map(|s| s.to_string())
            .collect();

        if let Some(position) = types.iter().position(|t| t == "NOT_FOUND") {
            bail!("Controller does not provide RTDE variable '{}'", variables[position]);
        }
        if types.len() != variables.len() {
            bail!("Output recipe returned {} types for {} variables", types.len(), variables.len());
        }

        self.variables = variables.iter().map(|v| v.to_string()).collect();
        self.variable_types = types;
        Ok(())
    }

    pub fn start_data_synchronization(&mut self) -> Result<()> {
        self.send_message(RtdeMessage::ControlPackageStart, &[])?;
        let payload = self.receive_expected(RtdeMessage::ControlPackageStart)?;

        if payload.first() == Some(&1) {
            Ok(())
        } else {
            bail!("Failed to start RTDE data synchronization")
        }
    }

    /// Read and decode the next data package
    pub fn read_data_package(&mut self) -> Result<HashMap<String, Vec<f64>>> {
        let payload = self.receive_expected(RtdeMessage::DataPackage)?;
        let data = payload
            .get(1..)
            .ok_or_else(|| anyhow!("Empty data package"))?;
        decode_data_package(&self.variables, &self.variable_types, data)
    }

    fn try_clone_stream(&self) -> Result<TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| anyhow!("Not connected"))?
            .try_clone()
            .context("Failed to clone RTDE socket")
    }
}

/// Decode package fields according to the recipe's variable types
pub fn decode_data_package(
    variables: &[String],
    variable_types: &[String],
    data: &[u8],
) -> Result<HashMap<String, Vec<f64>>> {
    let mut result = HashMap::new();
    let mut offset = 0;

    for (name, var_type) in variables.iter().zip(variable_types) {
        let values = match var_type.as_str() {
            "VECTOR6D" => field(data, &mut offset, 48, var_type)?
                .chunks_exact(8)
                .map(be_f64)
                .collect(),
            "DOUBLE" => vec![be_f64(field(data, &mut offset, 8, var_type)?)],
            "INT32" => {
                let b = field(data, &mut offset, 4, var_type)?;
                vec![i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64]
            }
            "UINT32" => {
                let b = field(data, &mut offset, 4, var_type)?;
                vec![u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64]
            }
            other => bail!("Unsupported RTDE variable type: {}", other),
        };
        result.insert(name.clone(), values);
    }

    Ok(result)
}

fn field<'a>(data: &'a [u8], offset: &mut usize, len: usize, var_type: &str) -> Result<&'a [u8]> {
    let bytes = data
        .get(*offset..*offset + len)
        .ok_or_else(|| anyhow!("Insufficient data for {}", var_type))?;
    *offset += len;
    Ok(bytes)
}

fn be_f64(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    f64::from_be_bytes(raw)
}

/// State-query session backed by an RTDE output stream
pub struct RtdeReceiveSession {
    latest: watch::Receiver<RtdeSample>,
    alive: Arc<AtomicBool>,
    socket: TcpStream,
    reader: Option<tokio::task::JoinHandle<()>>,
    max_age: Duration,
}

impl RtdeReceiveSession {
    /// Connect, set up the recipe and start streaming samples
    pub async fn open(host: &str, port: u16, frequency: f64, timeout: Duration) -> Result<Self> {
        let host = host.to_string();
        let (mut client, first) = tokio::task::spawn_blocking(move || -> Result<(RtdeClient, RtdeSample)> {
            let mut client = RtdeClient::new(&host, port);
            client.connect(timeout)?;
            // A slow recipe must not trip the read timeout between packages
            client.set_read_timeout(timeout.max(max_sample_age(frequency)))?;
            client.negotiate_protocol_version(PROTOCOL_VERSION)?;
            client.setup_output_recipe(&OUTPUT_VARIABLES, frequency)?;
            client.start_data_synchronization()?;
            let first = RtdeSample::from_values(&client.read_data_package()?)?;
            Ok((client, first))
        })
        .await
        .context("RTDE setup task failed")??;

        info!("RTDE state stream active at {} Hz", frequency);

        let socket = client.try_clone_stream()?;
        let (sender, latest) = watch::channel(first);
        let alive = Arc::new(AtomicBool::new(true));

        let reader_alive = Arc::clone(&alive);
        let reader = tokio::task::spawn_blocking(move || {
            loop {
                if !reader_alive.load(Ordering::Relaxed) {
                    break;
                }
                let sample = client
                    .read_data_package()
                    .and_then(|values| RtdeSample::from_values(&values));
                match sample {
                    Ok(sample) => {
                        if sender.send(sample).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if reader_alive.load(Ordering::Relaxed) {
                            warn!("RTDE state stream ended: {:#}", e);
                        }
                        break;
                    }
                }
            }
            reader_alive.store(false, Ordering::Relaxed);
        });

        Ok(Self {
            latest,
            alive,
            socket,
            reader: Some(reader),
            max_age: max_sample_age(frequency),
        })
    }

    fn fresh_sample(&self) -> Result<RtdeSample> {
        if !self.alive.load(Ordering::Relaxed) {
            bail!("RTDE state stream is not running");
        }
        let sample = self.latest.borrow().clone();
        let age = sample.received_at.elapsed();
        if age > self.max_age {
            bail!("latest RTDE sample is stale ({:?} old)", age);
        }
        Ok(sample)
    }
}

#[async_trait]
impl ReceiveSession for RtdeReceiveSession {
    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn current_pose(&mut self) -> Result<Pose> {
        Ok(self.fresh_sample()?.tcp_pose)
    }

    async fn operating_mode(&mut self) -> Result<i32> {
        Ok(self.fresh_sample()?.robot_mode)
    }

    async fn safety_mode(&mut self) -> Result<i32> {
        Ok(self.fresh_sample()?.safety_mode)
    }

    async fn disconnect(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        // Unblocks the reader's pending read
        let _ = self.socket.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}

impl Drop for RtdeReceiveSession {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}
