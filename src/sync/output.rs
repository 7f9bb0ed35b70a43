use serde::Serialize;
use std::path::PathBuf;

/// JSON output mode for machine-readable sync events
/// Uses NDJSON format (newline-delimited JSON)
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Start {
        total_entities: usize,
        dry_run: bool,
    },
    Push {
        path: String,
        replaced: bool,
        bytes_transferred: u64,
    },
    Pull {
        path: String,
        replaced: bool,
        bytes_transferred: u64,
    },
    Delete {
        path: String,
        local: bool,
    },
    Export {
        path: String,
        target: PathBuf,
        removed: bool,
    },
    Error {
        path: String,
        error: String,
    },
    Cancelled {
        processed: usize,
        total: usize,
    },
    Summary {
        pushed: usize,
        pulled: usize,
        deleted: usize,
        exported: usize,
        errors: usize,
        bytes_transferred: u64,
        duration_secs: f64,
    },
}

impl SyncEvent {
    /// Emit this event as JSON to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }
}
