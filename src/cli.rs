//! Command-line surface (spec §6): a single flat `clap` parser over the
//! same flags `examples/original_source/cmd/safeexec/main.c`'s hand-rolled
//! `initContext` argv scanner accepts, plus the trailing payload argv.
//!
//! Flattened-struct/flag-per-field style grounded on
//! `examples/warjiang-boxlite/boxlite-cli/src/cli.rs`'s `Cli`/`*Flags`
//! split.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{BoxexecError, Result};
use crate::request::{Flags, RunRequest};

#[derive(Parser, Debug)]
#[command(name = "boxexec", author, version, about = "Run a command inside a namespaced, cgroup-limited sandbox")]
pub struct Cli {
    /// Directory the payload sees as `/`, built by overlaying the given layers.
    #[arg(long)]
    pub rootfs: PathBuf,

    /// Overlay lower layers, most-specific first, colon-joined at mount time.
    #[arg(long = "overlay-lowerdir", required = true)]
    pub overlay_lowerdir: Vec<PathBuf>,

    /// Overlay upper (writable) layer.
    #[arg(long = "overlay-upperdir")]
    pub overlay_upperdir: PathBuf,

    /// Overlay work directory, required by the kernel's overlay driver.
    #[arg(long = "overlay-workdir")]
    pub overlay_workdir: PathBuf,

    /// Working directory for the payload, relative to its own rootfs.
    #[arg(long, default_value = "/")]
    pub workdir: PathBuf,

    /// `KEY=VALUE` environment entries for the payload; repeatable.
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Cgroup v2 directory to create/reset and enforce limits on.
    #[arg(long = "cgroup-path")]
    pub cgroup_path: PathBuf,

    /// CPU time budget in milliseconds.
    #[arg(long = "time-limit")]
    pub time_limit: u64,

    /// Memory budget in bytes.
    #[arg(long = "memory-limit")]
    pub memory_limit: u64,

    /// CPU budget as a percentage of one core; only enforced when the
    /// cpu-limit bit of `--flags` is set.
    #[arg(long = "cpu-limit")]
    pub cpu_limit: Option<u32>,

    /// Maximum live process/thread count inside the sandbox.
    #[arg(long = "pids-limit", default_value_t = 32)]
    pub pids_limit: u64,

    /// Bitmask: bit 0 reads `memory.peak` instead of polling
    /// `memory.current`, bit 1 enforces `--cpu-limit` via `cpu.max`.
    #[arg(long = "flags", default_value_t = 0)]
    pub flags: u32,

    /// Path to write the four-line result report to.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// The payload and its arguments, e.g. `-- /bin/sh -c 'echo hi'`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub argv: Vec<String>,
}

impl Cli {
    /// Validates the required combinations spec §6 describes and builds the
    /// immutable request the supervisor runs from.
    pub fn into_request(self) -> Result<RunRequest> {
        if self.argv.is_empty() {
            return Err(BoxexecError::InvalidArgument("empty execve arguments".into()));
        }
        if self.time_limit == 0 {
            return Err(BoxexecError::InvalidArgument("--time-limit is required".into()));
        }
        if self.memory_limit == 0 {
            return Err(BoxexecError::InvalidArgument("--memory-limit is required".into()));
        }
        let flags = Flags::new(self.flags);
        if flags.enforce_cpu_limit() && self.cpu_limit.is_none() {
            return Err(BoxexecError::InvalidArgument(
                "--cpu-limit is required when the cpu-limit flag bit is set".into(),
            ));
        }

        Ok(RunRequest {
            rootfs: self.rootfs,
            overlay_lowerdir: self.overlay_lowerdir,
            overlay_upperdir: self.overlay_upperdir,
            overlay_workdir: self.overlay_workdir,
            workdir: self.workdir,
            argv: self.argv,
            env: self.env,
            cgroup_path: self.cgroup_path,
            memory_limit: self.memory_limit,
            time_limit_ms: self.time_limit,
            cpu_limit_pct: self.cpu_limit,
            pids_limit: self.pids_limit,
            flags,
            report_path: self.report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "boxexec",
            "--rootfs",
            "/tmp/rootfs",
            "--overlay-lowerdir",
            "/tmp/lower",
            "--overlay-upperdir",
            "/tmp/upper",
            "--overlay-workdir",
            "/tmp/work",
            "--cgroup-path",
            "/sys/fs/cgroup/boxexec-test",
            "--time-limit",
            "1000",
            "--memory-limit",
            "268435456",
            "--",
            "/bin/true",
        ]
    }

    #[test]
    fn parses_minimal_required_flags() {
        let cli = Cli::try_parse_from(base_args()).unwrap();
        let req = cli.into_request().unwrap();
        assert_eq!(req.argv, vec!["/bin/true".to_string()]);
        assert_eq!(req.pids_limit, 32);
        assert_eq!(req.workdir, PathBuf::from("/"));
    }

    #[test]
    fn rejects_cpu_limit_flag_bit_without_cpu_limit_value() {
        let mut args = base_args();
        args.extend(["--flags", "2"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.into_request().is_err());
    }

    #[test]
    fn accepts_cpu_limit_flag_bit_with_cpu_limit_value() {
        let mut args = base_args();
        args.extend(["--flags", "2", "--cpu-limit", "50"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.into_request().is_ok());
    }
}
