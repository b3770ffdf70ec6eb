//! Append-only NDJSON transcript of every exchange and lifecycle event.
//!
//! Each line is one self-contained JSON record:
//! ```jsonl
//! {"mode":"http","timestamp":"2026-10-16T09:12:03.120Z","command":"ls","status":200,"response":{"output":"a.txt"}}
//! {"mode":"ws","timestamp":"2026-10-16T09:12:09.004Z","event":"connected","url":"wss://host/terminal/ws","welcome":"ready"}
//! ```
//! File order is chronological order. Once the file grows past the
//! configured limit it is rewritten to keep only the newest lines.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;

/// Number of lines `history show` prints when no count is given.
pub const DEFAULT_SHOW_COUNT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Http,
    Ws,
    Meta,
}

/// A single history record. Mode-specific fields live in `fields` and are
/// flattened into the top-level JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl HistoryEntry {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            timestamp: None,
            fields: Map::new(),
        }
    }

    /// Lifecycle event such as `connected`, `exit` or `config_set`.
    pub fn event(mode: Mode, event: &str) -> Self {
        Self::new(mode).with("event", event)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.fields.get("event").and_then(Value::as_str)
    }
}

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp `entry` with the current UTC time, append it as one line and
    /// rotate down to `limit` lines if the file has grown past it.
    pub fn append(&self, mut entry: HistoryEntry, limit: usize) -> Result<()> {
        entry.timestamp = Some(now());
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)?;
        // A torn last line from an interrupted writer must not swallow ours.
        if !ends_with_newline(&mut file)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        drop(file);

        if let Err(e) = self.rotate(limit) {
            warn!(path = %self.path.display(), error = %e, "history rotation skipped");
        }
        Ok(())
    }

    /// Keep only the last `limit` lines. The tail is written to a sibling
    /// temp file and renamed over the log, so a failed rotation leaves the
    /// existing content intact.
    pub fn rotate(&self, limit: usize) -> Result<()> {
        let lines = self.read_lines()?;
        if lines.len() <= limit {
            return Ok(());
        }
        let keep = &lines[lines.len() - limit..];
        let mut data = keep.join("\n");
        if !keep.is_empty() {
            data.push('\n');
        }
        let tmp = self.path.with_extension("log.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        debug!(dropped = lines.len() - limit, kept = limit, "history rotated");
        Ok(())
    }

    /// The last `n` lines, verbatim and in file order.
    pub fn show(&self, n: usize) -> Result<Vec<String>> {
        let lines = self.read_lines()?;
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }

    /// Truncate the log to empty.
    pub fn clear(&self) -> Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    /// Parse every record in the log.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        self.read_lines()?
            .iter()
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

// Millisecond precision keeps the timestamps readable in `history show`.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

// Empty files count as terminated.
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
