//! Append-only JSON-lines log of executed commands
//!
//! One entry per command that was actually sent:
//!
//! ```text
//! {"t":1700000000.123456,"target_pose":[x,y,z,rx,ry,rz],"delta":[dx,dy,dz,drx,dry,drz]}
//! ```
//!
//! `delta` is `null` for absolute pose commands. Timestamps never go
//! backwards within one log, even if the wall clock does.

use crate::pose::Pose;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub t: f64,
    pub target_pose: Pose,
    pub delta: Option<[f64; 6]>,
}

pub struct CommandLog {
    path: PathBuf,
    file: File,
    last_timestamp: Option<f64>,
}

fn wall_clock_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl CommandLog {
    /// Open `path` for appending, creating it if needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!("Logging executed commands to {}", path.display());
        Ok(Self {
            path,
            file,
            last_timestamp: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one entry and flush it. Returns the entry as written.
    pub async fn append(&mut self, target_pose: &Pose, delta: Option<[f64; 6]>) -> Result<LogEntry> {
        let entry = LogEntry {
            t: self.next_timestamp(wall_clock_seconds()),
            target_pose: *target_pose,
            delta,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(entry)
    }

    fn next_timestamp(&mut self, now: f64) -> f64 {
        let t = match self.last_timestamp {
            Some(last) if now < last => {
                warn!("System clock went backwards by {:.6}s, clamping log timestamp", last - now);
                last
            }
            _ => now,
        };
        self.last_timestamp = Some(t);
        t
    }
}
