//! Report writer (C7, spec §4.7): the four fixed-format lines a run leaves
//! behind for its caller.
//!
//! Grounded on `examples/original_source/cmd/safeexec/main.c`'s final
//! `sprintf`/`write` sequence — four `key value\n` lines, in this exact
//! order, truncating any previous report at the same path.

use std::fs::File;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::Result;

/// Outcome of one supervised run, in the units the report file expects:
/// CPU time and wall time in whole milliseconds, memory in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Report {
    pub exit_code: i32,
    pub time_ms: u64,
    pub real_time_ms: u64,
    pub memory_bytes: u64,
}

impl Report {
    /// Renders the four `key value` lines, in spec §4.7's fixed order.
    pub fn to_lines(self) -> String {
        format!(
            "exit_code {}\ntime {}\nreal_time {}\nmemory {}\n",
            self.exit_code, self.time_ms, self.real_time_ms, self.memory_bytes
        )
    }
}

/// Writes `report` to `path`, creating or truncating it with mode 0644.
pub(crate) fn write(path: &Path, report: Report) -> Result<()> {
    let mut file = File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| format!("cannot open report file {}: {e}", path.display()))?;
    file.write_all(report.to_lines().as_bytes())
        .map_err(|e| format!("cannot write report file {}: {e}", path.display()))?;
    Ok(())
}
