//! History Recorder - persists phase events to JSONL files
//!
//! The HistoryRecorder subscribes to a monitor's bus and writes every recorded
//! event to a per-instance JSONL file, so a run can be inspected or replayed
//! later with `pw`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::bus::{Subscription, listener};
use super::types::{HistoryEntry, Phase, PhaseEvent};
use crate::monitor::Monitor;

/// File name of a recorded history inside an instance directory
pub const HISTORY_FILE: &str = "phases.jsonl";

/// Recorder that writes phase events to JSONL files
///
/// Events are written to `{runs_dir}/{instance-id}/phases.jsonl`
pub struct HistoryRecorder {
    /// Base directory for recordings
    runs_dir: PathBuf,
    /// Open file writers per instance
    writers: Mutex<HashMap<String, BufWriter<File>>>,
}

impl HistoryRecorder {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "HistoryRecorder::new: called");
        Self {
            runs_dir,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Create a recorder under the default runs directory
    pub fn with_default_path() -> Result<Self> {
        let runs_dir = default_runs_dir()?;
        fs::create_dir_all(&runs_dir).context(format!("Failed to create {}", runs_dir.display()))?;
        Ok(Self::new(runs_dir))
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Path of the history file for an instance
    pub fn history_path(&self, instance: &str) -> PathBuf {
        self.runs_dir.join(instance).join(HISTORY_FILE)
    }

    /// Append one entry to its instance's file
    pub fn write_entry(&self, entry: &HistoryEntry) -> Result<()> {
        debug!(instance = %entry.instance, seq = entry.event.sequence_index, "HistoryRecorder::write_entry: called");
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| eyre::eyre!("HistoryRecorder writers lock poisoned"))?;

        let writer = match writers.entry(entry.instance.clone()) {
            std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
            std::collections::hash_map::Entry::Vacant(slot) => {
                let dir = self.runs_dir.join(&entry.instance);
                fs::create_dir_all(&dir).context(format!("Failed to create {}", dir.display()))?;

                let path = dir.join(HISTORY_FILE);
                debug!(?path, "HistoryRecorder: creating new history file");
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .context(format!("Failed to open {}", path.display()))?;
                slot.insert(BufWriter::new(file))
            }
        };

        let json = serde_json::to_string(entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Flush and drop the writer for an instance
    pub fn close_instance(&self, instance: &str) {
        debug!(%instance, "HistoryRecorder::close_instance: called");
        let Ok(mut writers) = self.writers.lock() else {
            warn!(%instance, "HistoryRecorder::close_instance: lock poisoned");
            return;
        };
        if let Some(mut writer) = writers.remove(instance) {
            let _ = writer.flush();
        }
    }

    /// Record every future event of `monitor`
    ///
    /// The returned subscription detaches the recorder; the file stays open
    /// until [`close_instance`](Self::close_instance).
    pub fn attach(self: &Arc<Self>, monitor: &Monitor) -> Subscription {
        let instance = monitor.id().to_string();
        let label = monitor.label().map(str::to_string);
        info!(%instance, ?label, runs_dir = ?self.runs_dir, "HistoryRecorder: attached");

        let recorder = Arc::clone(self);
        monitor.subscribe(listener(move |notification| {
            let Some(event) = notification.latest() else {
                return Ok(());
            };
            let entry = HistoryEntry::new(instance.clone(), label.clone(), event.clone());
            recorder.write_entry(&entry)
        }))
    }
}

impl Drop for HistoryRecorder {
    fn drop(&mut self) {
        if let Ok(mut writers) = self.writers.lock() {
            for (instance, mut writer) in writers.drain() {
                debug!(%instance, "HistoryRecorder: flushing writer on drop");
                let _ = writer.flush();
            }
        }
    }
}

impl std::fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRecorder").field("runs_dir", &self.runs_dir).finish()
    }
}

/// Default directory for recordings (`<data_local_dir>/phasewatch/runs`)
pub fn default_runs_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| eyre::eyre!("Could not determine local data directory"))?;
    Ok(base.join("phasewatch").join("runs"))
}

/// Any line format accepted by [`read_history`]
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryLine {
    Entry(HistoryEntry),
    Event(PhaseEvent),
    Phase(Phase),
}

/// Read a recorded history back, renumbered densely from 1
///
/// Lines may be full entries written by [`HistoryRecorder`], bare events, or
/// bare phase names (`update`, `"nested-update"`). Blank lines are skipped;
/// malformed lines are logged and skipped.
pub fn read_history(path: impl AsRef<Path>) -> Result<Vec<PhaseEvent>> {
    let path = path.as_ref();
    debug!(?path, "read_history: called");

    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    let mut events = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = serde_json::from_str::<HistoryLine>(line)
            .map(|l| match l {
                HistoryLine::Entry(entry) => entry.event,
                HistoryLine::Event(event) => event,
                HistoryLine::Phase(phase) => PhaseEvent::new(phase, 0, None),
            })
            .or_else(|e| line.parse::<Phase>().map(|p| PhaseEvent::new(p, 0, None)).map_err(|_| e));

        match parsed {
            Ok(mut event) => {
                event.sequence_index = events.len() + 1;
                events.push(event);
            }
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "read_history: failed to parse line");
            }
        }
    }

    debug!(count = events.len(), "read_history: loaded events");
    Ok(events)
}

/// Read the history recorded for one instance under `runs_dir`
pub fn read_instance_history(runs_dir: impl AsRef<Path>, instance: &str) -> Result<Vec<PhaseEvent>> {
    let path = runs_dir.as_ref().join(instance).join(HISTORY_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_history(path)
}
