//! Cgroup v2 controller (C1, spec §4.1): pre-configures limits on memory,
//! swap, PIDs, and CPU for a cgroup directory, then reads back usage
//! counters.
//!
//! Grounded on `examples/udovin-sbox/src/cgroup.rs`'s `Cgroup` path/fd
//! abstraction, generalised with the read operations and the `prepare()`
//! write sequence from `examples/original_source/cmd/safeexec/main.c`'s
//! `prepareCgroupNamespace`/`readCgroupMemory`/`readCgroupCpuUsage`/
//! `readCgroupOomCount`.

use std::fs::{self, DirBuilder, File};
use std::io::{ErrorKind, Write as _};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ignore_kind, Result};
use crate::request::{Flags, RunRequest};

/// Which memory counter to read: `memory.current` tracks live usage,
/// `memory.peak` records the high-water mark (spec §4.1, §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryReading {
    Current,
    Peak,
}

/// An opened cgroup directory: an absolute path plus a path-only file
/// descriptor, valid for the lifetime of the run (spec §3 `CgroupHandle`).
pub struct CgroupHandle {
    path: PathBuf,
    dir: File,
}

impl CgroupHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &File {
        &self.dir
    }
}

/// Creates/resets the cgroup directory named by `req.cgroup_path` and
/// writes its limit files, in the exact order spec §4.1 specifies.
pub fn prepare(req: &RunRequest) -> Result<CgroupHandle> {
    let path = &req.cgroup_path;
    debug!(?path, "preparing cgroup");

    ignore_kind(fs::remove_dir(path), ErrorKind::NotFound)
        .map_err(|e| format!("cannot remove cgroup {}: {e}", path.display()))?;
    ignore_kind(
        DirBuilder::new().mode(0o755).create(path),
        ErrorKind::AlreadyExists,
    )
    .map_err(|e| format!("cannot create cgroup {}: {e}", path.display()))?;

    write_limit(path, "memory.max", &req.memory_limit.to_string())?;
    write_limit(path, "memory.swap.max", "0")?;
    write_limit(path, "pids.max", &req.pids_limit.to_string())?;
    if req.flags.enforce_cpu_limit() {
        let pct = req
            .cpu_limit_pct
            .ok_or("--cpu-limit is required when the cpu-limit flag bit is set")?;
        write_limit(path, "cpu.max", &format!("{} 100000", pct as u64 * 1000))?;
    }

    let dir = File::options()
        .read(true)
        .custom_flags(nix::libc::O_PATH | nix::libc::O_DIRECTORY)
        .open(path)
        .map_err(|e| format!("cannot open cgroup {}: {e}", path.display()))?;

    Ok(CgroupHandle {
        path: path.clone(),
        dir,
    })
}

fn write_limit(cgroup_path: &Path, file: &str, value: &str) -> Result<()> {
    File::options()
        .write(true)
        .open(cgroup_path.join(file))
        .and_then(|mut f| f.write_all(value.as_bytes()))
        .map_err(|e| format!("cannot write {file}: {e}"))?;
    Ok(())
}

/// Reads `memory.current` or `memory.peak` per `flags` (spec §4.1).
pub fn read_memory(handle: &CgroupHandle, flags: Flags) -> Result<u64> {
    let file = match memory_reading(flags) {
        MemoryReading::Current => "memory.current",
        MemoryReading::Peak => "memory.peak",
    };
    read_decimal_file(&handle.path.join(file))
}

fn memory_reading(flags: Flags) -> MemoryReading {
    if flags.use_peak_memory() {
        MemoryReading::Peak
    } else {
        MemoryReading::Current
    }
}

/// Reads the `usage_usec` field of `cpu.stat` (microseconds, spec §4.1).
pub fn read_cpu_usage_us(handle: &CgroupHandle) -> Result<u64> {
    read_stat_field(&handle.path.join("cpu.stat"), "usage_usec")
}

/// Reads the `oom` field of `memory.events` (spec §4.1).
pub fn read_oom_count(handle: &CgroupHandle) -> Result<u64> {
    read_stat_field(&handle.path.join("memory.events"), "oom")
}

fn read_decimal_file(path: &Path) -> Result<u64> {
    let data = fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let value: u64 = data
        .trim_end()
        .parse()
        .map_err(|_| format!("invalid value in {}: {data:?}", path.display()))?;
    if value == i64::MAX as u64 {
        return Err(format!("{} reports the LONG_MAX sentinel", path.display()).into());
    }
    Ok(value)
}

fn read_stat_field(path: &Path, field: &str) -> Result<u64> {
    let data = fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    for line in data.lines() {
        if let Some(rest) = line.strip_prefix(field).and_then(|r| r.strip_prefix(' ')) {
            let value: u64 = rest
                .trim()
                .parse()
                .map_err(|_| format!("invalid {field} in {}: {line:?}", path.display()))?;
            if value == i64::MAX as u64 {
                return Err(format!("{} reports the LONG_MAX sentinel", path.display()).into());
            }
            return Ok(value);
        }
    }
    Err(format!("{field} not found in {}", path.display()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_usage_usec_among_other_fields() {
        let dir = std::env::temp_dir().join(format!("boxexec-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("cpu.stat"),
            "usage_usec 123456\nuser_usec 100000\nsystem_usec 23456\n",
        )
        .unwrap();
        let value = read_stat_field(&dir.join("cpu.stat"), "usage_usec").unwrap();
        assert_eq!(value, 123456);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn parses_oom_among_other_events() {
        let dir = std::env::temp_dir().join(format!("boxexec-test-oom-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("memory.events"),
            "low 0\nhigh 0\nmax 3\noom 1\noom_kill 1\n",
        )
        .unwrap();
        let value = read_stat_field(&dir.join("memory.events"), "oom").unwrap();
        assert_eq!(value, 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn tolerates_trailing_newline_in_decimal_file() {
        let dir = std::env::temp_dir().join(format!("boxexec-test-dec-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("memory.current"), "1048576\n").unwrap();
        let value = read_decimal_file(&dir.join("memory.current")).unwrap();
        assert_eq!(value, 1048576);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_long_max_sentinel() {
        let dir = std::env::temp_dir().join(format!("boxexec-test-sentinel-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("memory.current"), format!("{}\n", i64::MAX)).unwrap();
        assert!(read_decimal_file(&dir.join("memory.current")).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
