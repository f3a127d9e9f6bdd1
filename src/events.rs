use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Structured progress channel shared by the driver and the migrators.
///
/// `event` is a dotted name such as `user.created` or `task.replaced`;
/// `fields` is a JSON object with the details. Names ending in `.failed`
/// mark an item that did not migrate.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &str, fields: Value);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: String,
    pub event: String,
    pub fields: Value,
}

impl RunEvent {
    pub fn new(event: &str, fields: Value) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event: event.to_string(),
            fields,
        }
    }

    #[cfg(test)]
    pub fn is_failure(&self) -> bool {
        is_failure(&self.event)
    }
}

fn is_failure(event: &str) -> bool {
    event.ends_with(".failed")
}

/// Forwards every event to `tracing`, which writes the console and run log.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &str, fields: Value) {
        if is_failure(event) {
            tracing::warn!(target: "migration", %fields, "{event}");
        } else {
            tracing::info!(target: "migration", %fields, "{event}");
        }
    }
}

/// Appends one JSON object per event to a file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    fn append(&self, event: &RunEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl EventSink for JsonlSink {
    fn record(&self, event: &str, fields: Value) {
        if let Err(err) = self.append(&RunEvent::new(event, fields)) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to append event");
        }
    }
}

/// Reads back an event log written by [`JsonlSink`], skipping unreadable lines.
#[cfg(test)]
pub fn read_events(path: &Path) -> Vec<RunEvent> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn record(&self, event: &str, fields: Value) {
        for sink in &self.sinks {
            sink.record(event, fields.clone());
        }
    }
}

/// Keeps events in memory so tests can assert on what was reported.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.event == event).count()
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn record(&self, event: &str, fields: Value) {
        self.events.lock().unwrap().push(RunEvent::new(event, fields));
    }
}
