// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Loading `ProcessState` snapshots from JSON.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::process_state::ProcessState;

/// An error encountered while loading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Error reading snapshot: {0}")]
    Io(#[from] io::Error),
    #[error("Error parsing snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SnapshotError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotError::Io(_) => "Io",
            SnapshotError::Parse(_) => "Parse",
        }
    }
}

/// Read a snapshot from the JSON file at `path`.
pub fn read_path<P: AsRef<Path>>(path: P) -> Result<ProcessState, SnapshotError> {
    let path = path.as_ref();
    debug!("reading snapshot from {}", path.display());
    let file = File::open(path)?;
    read(BufReader::new(file))
}

/// Read a JSON snapshot from `reader`.
pub fn read<R: Read>(reader: R) -> Result<ProcessState, SnapshotError> {
    let state: ProcessState = serde_json::from_reader(reader)?;
    if state.threads.len() != state.thread_memory_regions.len() {
        warn!(
            "snapshot has {} threads but {} stack memory regions",
            state.threads.len(),
            state.thread_memory_regions.len()
        );
    }
    debug!(
        "snapshot: {} threads, {} modules, cpu {}",
        state.threads.len(),
        state.modules.len(),
        state.system_info.cpu
    );
    Ok(state)
}
