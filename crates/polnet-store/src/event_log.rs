//! Append-only event log
//!
//! The persistence collaborator. Batches commit by appending all of their
//! events in one call; an append either lands completely or not at all.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use polnet_core::{LoggedEvent, PolnetError, Result};

/// Destination of committed store events
pub trait EventSink: Send + Sync {
    /// Append a batch of events atomically
    fn append(&self, events: &[LoggedEvent]) -> Result<()>;

    /// Every event in sequence order
    fn read_all(&self) -> Result<Vec<LoggedEvent>>;

    /// Sequence number of the last appended event, 0 when empty
    fn last_sequence(&self) -> Result<u64> {
        Ok(self.read_all()?.last().map(|e| e.sequence).unwrap_or(0))
    }
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> PolnetError {
    PolnetError::StoreUnavailable(format!("{context}: {err}"))
}

// ============================================================================
// JSON Lines file
// ============================================================================

/// Event log stored as one JSON object per line
pub struct JsonlEventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    /// Open (or create) the log at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| unavailable(&format!("creating {}", parent.display()), e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| unavailable(&format!("opening {}", path.display()), e))?;

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every event; used after the log was folded into a snapshot
    pub fn truncate(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        File::create(&self.path)
            .map_err(|e| unavailable(&format!("truncating {}", self.path.display()), e))?;
        Ok(())
    }
}

impl EventSink for JsonlEventLog {
    fn append(&self, events: &[LoggedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buffer, event)
                .map_err(|e| unavailable("serializing event", e))?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| unavailable(&format!("opening {}", self.path.display()), e))?;
        let committed_len = file
            .metadata()
            .map_err(|e| unavailable("reading log metadata", e))?
            .len();

        if let Err(e) = file.write_all(&buffer).and_then(|_| file.sync_data()) {
            // Roll a partial write back so the log never holds half a batch
            if let Err(trunc) = file.set_len(committed_len) {
                tracing::error!(error = %trunc, "failed to roll back partial append");
            }
            return Err(unavailable(&format!("appending to {}", self.path.display()), e));
        }

        tracing::debug!(
            count = events.len(),
            last_sequence = events.last().map(|e| e.sequence),
            "events appended"
        );
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LoggedEvent>> {
        let file = File::open(&self.path)
            .map_err(|e| unavailable(&format!("opening {}", self.path.display()), e))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| unavailable("reading event log", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LoggedEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // A torn final line from a crash mid-write; everything before it is intact
                    tracing::warn!(line = line_no + 1, error = %e, "stopping at unreadable event log line");
                    break;
                }
            }
        }
        Ok(events)
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Event sink kept in memory, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<LoggedEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemoryEventLog {
    fn append(&self, events: &[LoggedEvent]) -> Result<()> {
        self.events.lock().extend_from_slice(events);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LoggedEvent>> {
        Ok(self.events.lock().clone())
    }

    fn last_sequence(&self) -> Result<u64> {
        Ok(self.events.lock().last().map(|e| e.sequence).unwrap_or(0))
    }
}

// ============================================================================
// Snapshot files
// ============================================================================

/// Write a JSON document atomically (temp file, then rename)
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| unavailable(&format!("creating {}", parent.display()), e))?;
    }
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value).map_err(|e| unavailable("serializing", e))?;
    std::fs::write(&tmp, json)
        .map_err(|e| unavailable(&format!("writing {}", tmp.display()), e))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| unavailable(&format!("renaming to {}", path.display()), e))?;
    Ok(())
}

/// Read a JSON document; a missing file is `Ok(None)`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(&format!("reading {}", path.display()), e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| unavailable(&format!("parsing {}", path.display()), e))
}
