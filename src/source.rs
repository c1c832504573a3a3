//! Command sources: sequential replay and tail-following of a JSON-lines file
//!
//! Sequential replay reads every record once, in order. Tail-following only
//! sees records appended after it opened the file and honors the most recent
//! one on each tick (latest-command-wins), holding the previous command when
//! nothing new arrived.

use crate::error::RecordError;
use crate::pose::MotionCommand;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, warn};

/// Result of reading the next record in sequential replay
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    Command { line: usize, command: MotionCommand },
    Skipped(RecordError),
    Exhausted,
}

fn parse_line(bytes: &[u8]) -> Option<Result<MotionCommand, RecordError>> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return Some(Err(RecordError::new(format!("not valid UTF-8: {}", e)))),
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(MotionCommand::parse(text))
}

pub struct SequentialSource {
    name: String,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    line: usize,
    buffer: Vec<u8>,
}

impl SequentialSource {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        Ok(Self::from_reader(path.display().to_string(), BufReader::new(file)))
    }

    /// Replay records piped on standard input
    pub fn stdin() -> Self {
        Self::from_reader("standard input", BufReader::new(tokio::io::stdin()))
    }

    pub fn from_reader(name: impl Into<String>, reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
            line: 0,
            buffer: Vec::new(),
        }
    }

    /// File path or stream the records come from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next command or skipped record. Blank lines are passed over.
    pub async fn next_record(&mut self) -> std::io::Result<SourceItem> {
        loop {
            self.buffer.clear();
            let read = self.reader.read_until(b'\n', &mut self.buffer).await?;
            if read == 0 {
                return Ok(SourceItem::Exhausted);
            }
            self.line += 1;

            match parse_line(&self.buffer) {
                None => continue,
                Some(Ok(command)) => {
                    return Ok(SourceItem::Command {
                        line: self.line,
                        command,
                    })
                }
                Some(Err(e)) => return Ok(SourceItem::Skipped(e.at_line(self.line))),
            }
        }
    }
}

/// Read position of a tail-following source
#[derive(Debug, Default)]
pub struct StreamCursor {
    pub offset: u64,
    /// Trailing bytes not yet terminated by a newline
    pub pending: Vec<u8>,
    pub last_command: Option<MotionCommand>,
}

/// What a tail-following tick should do
#[derive(Debug, Clone, PartialEq)]
pub enum TailTick {
    /// A new command arrived
    Fresh(MotionCommand),
    /// Nothing new; reapply the previous command
    Hold(MotionCommand),
    /// The newest record was malformed; the previous command (if any) is held
    Malformed {
        error: RecordError,
        held: Option<MotionCommand>,
    },
    /// No command has arrived yet
    Idle,
}

pub struct TailSource {
    path: PathBuf,
    file: File,
    cursor: StreamCursor,
}

impl TailSource {
    /// Open `path` positioned at its current end. Content already in the file
    /// is never executed.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;
        let offset = file.seek(SeekFrom::End(0)).await?;
        debug!("Following {} from byte {}", path.display(), offset);
        Ok(Self {
            path,
            file,
            cursor: StreamCursor {
                offset,
                ..Default::default()
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> &StreamCursor {
        &self.cursor
    }

    pub async fn next_tick(&mut self) -> std::io::Result<TailTick> {
        let len = self.file.metadata().await?.len();
        if len < self.cursor.offset {
            warn!(
                "{} shrank from {} to {} bytes, following from the new end",
                self.path.display(),
                self.cursor.offset,
                len
            );
            self.cursor.offset = len;
            self.cursor.pending.clear();
        }

        if len > self.cursor.offset {
            self.file.seek(SeekFrom::Start(self.cursor.offset)).await?;
            let mut chunk = Vec::new();
            let read = self.file.read_to_end(&mut chunk).await?;
            self.cursor.offset += read as u64;
            self.cursor.pending.extend_from_slice(&chunk);
        }

        let Some(end) = self.cursor.pending.iter().rposition(|&b| b == b'\n') else {
            return Ok(self.hold());
        };
        let complete: Vec<u8> = self.cursor.pending.drain(..=end).collect();

        let latest = complete
            .split(|&b| b == b'\n')
            .rev()
            .find_map(parse_line);

        match latest {
            None => Ok(self.hold()),
            Some(Ok(command)) => {
                self.cursor.last_command = Some(command);
                Ok(TailTick::Fresh(command))
            }
            Some(Err(error)) => Ok(TailTick::Malformed {
                error,
                held: self.cursor.last_command,
            }),
        }
    }

    fn hold(&self) -> TailTick {
        match self.cursor.last_command {
            Some(command) => TailTick::Hold(command),
            None => TailTick::Idle,
        }
    }
}
