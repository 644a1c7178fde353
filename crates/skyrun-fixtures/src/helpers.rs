//! Common test helper functions.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use skyrun::schedule::Schedule;

/// Create a unique temporary directory for a test.
///
/// The name carries the prefix, the process id and a timestamp so that
/// parallel tests never collide.
///
/// # Example
///
/// ```ignore
/// let dir = temp_dir("dry-run");
/// // dir is something like /tmp/skyrun-dry-run-4242-1703520000000
/// ```
#[must_use]
pub fn temp_dir(prefix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("skyrun-{prefix}-{}-{stamp}", std::process::id()));
    fs::create_dir_all(&dir).expect("failed to create temp directory");
    dir
}

/// Write a schedule as pretty JSON.
pub fn write_schedule(path: &Path, schedule: &Schedule) {
    let data = serde_json::to_vec_pretty(schedule).expect("failed to serialize schedule");
    fs::write(path, data).expect("failed to write schedule file");
}
