// Std library
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

// External crates
use serde::Serialize;

// Local modules
use crate::domain::{Game, Team};

/// Saves any serializable data to a json file.
///
/// # Arguments
/// * `data` - A reference to the data to serialize and save.
/// * `path` - The file path to write to.
///
/// # Returns
/// A `Result` indicating success (`Ok(())`) or failure (`Err`) with an I/O
/// error.
pub fn save_to_file<T: Serialize>(data: &T, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, data)?;
    Ok(())
}

/// A self-contained record of one incumbent found during a solve.
///
/// Every snapshot carries the full roster, the full slot list and the full
/// assignment, so a reader can interpret it without any earlier or later
/// snapshot.
#[derive(Serialize)]
pub struct SolutionSnapshot {
    /// One-based index of this incumbent within the solve.
    pub solution_number: usize,
    pub objective_value: f64,
    /// Best objective bound proven when the incumbent was found.
    pub objective_bound: f64,
    pub wall_time_secs: f64,
    pub user_time_secs: f64,
    pub nodes: u64,
    pub backtracks: u64,
    pub propagations: u64,
    pub teams: Vec<Team>,
    pub games: Vec<Game>,
    /// Teams assigned to each game, parallel to `games`.
    pub assignments: Vec<Vec<Team>>,
}

/// Destination for incumbent snapshots.
///
/// Sinks are invoked from the solution callback, which may run on
/// solver-owned workers, so implementations must be shareable.
pub trait SnapshotSink: Sync {
    fn write(&self, snapshot: &SolutionSnapshot) -> io::Result<()>;
}

/// Writes each snapshot as `solution_{n}.json` inside a directory. The
/// default instance targets the current working directory.
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> JsonDirSink {
        JsonDirSink { dir: dir.into() }
    }
}

impl Default for JsonDirSink {
    fn default() -> JsonDirSink {
        JsonDirSink::new(".")
    }
}

impl SnapshotSink for JsonDirSink {
    fn write(&self, snapshot: &SolutionSnapshot) -> io::Result<()> {
        let path = self
            .dir
            .join(format!("solution_{}.json", snapshot.solution_number));
        save_to_file(snapshot, &path)
    }
}

/// Discards every snapshot. Useful for headless runs and tests.
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn write(&self, _snapshot: &SolutionSnapshot) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_sink_names_files_by_solution_number() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonDirSink::new(dir.path());
        let snapshot = SolutionSnapshot {
            solution_number: 3,
            objective_value: 6.0,
            objective_bound: 8.0,
            wall_time_secs: 0.25,
            user_time_secs: 0.25,
            nodes: 10,
            backtracks: 2,
            propagations: 40,
            teams: Vec::new(),
            games: Vec::new(),
            assignments: Vec::new(),
        };
        sink.write(&snapshot).unwrap();
        let written = dir.path().join("solution_3.json");
        let body = std::fs::read_to_string(written).unwrap();
        assert!(body.contains("\"objective_value\": 6.0"));
        assert!(body.contains("\"solution_number\": 3"));
    }
}
