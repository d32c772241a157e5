//! Append-only event trace: one JSON file per event under
//! `<task-dir>/traces/NNNN.json`, never mutated after being written.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::atomic_write;

/// The kind of thing an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StateChange,
    Output,
    Feedback,
    System,
    Error,
}

/// A single trace entry. `seq` is the zero-padded file name's numeric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub task_id: String,
    pub seq: u32,
    pub created_at: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default)]
    pub data: Value,
}

fn trace_file_name(seq: u32) -> String {
    format!("{seq:04}.json")
}

/// Append `event` to `traces_dir` as `<next-seq>.json`. The caller is
/// responsible for computing `event.seq` under the Store's write lock so
/// concurrent appends can never collide.
pub fn append(traces_dir: &Path, event: &Event) -> anyhow::Result<()> {
    fs::create_dir_all(traces_dir)?;
    let path = traces_dir.join(trace_file_name(event.seq));
    let bytes = serde_json::to_vec_pretty(event)?;
    atomic_write(&path, &bytes)
}

/// The next sequence number to use, computed from the highest-numbered
/// trace file currently on disk (0 if the directory is empty or absent).
pub fn next_seq(traces_dir: &Path) -> anyhow::Result<u32> {
    if !traces_dir.exists() {
        return Ok(0);
    }
    let mut max_seq = None;
    for entry in fs::read_dir(traces_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".json")
            && let Ok(seq) = stem.parse::<u32>()
        {
            max_seq = Some(max_seq.map_or(seq, |m: u32| m.max(seq)));
        }
    }
    Ok(max_seq.map_or(0, |m| m + 1))
}

/// Load the full ordered event trace for a task.
pub fn load_all(traces_dir: &Path) -> anyhow::Result<Vec<Event>> {
    if !traces_dir.exists() {
        return Ok(Vec::new());
    }
    let mut events = Vec::new();
    for entry in fs::read_dir(traces_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = fs::read_to_string(&path)?;
        events.push(serde_json::from_str::<Event>(&text)?);
    }
    events.sort_by_key(|e| e.seq);
    Ok(events)
}
