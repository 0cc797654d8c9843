//! Sandboxed process runner: builds a namespaced, cgroup v2-limited
//! environment for a single payload, supervises it to completion, and
//! reports its exit code, CPU time, wall time, and peak memory.

mod cgroup;
mod channels;
mod cli;
mod error;
mod mounts;
mod report;
mod request;
mod supervisor;
mod syscall;
mod userns;

pub use cgroup::{CgroupHandle, MemoryReading};
pub use cli::Cli;
pub use error::{BoxexecError, Result};
pub use report::Report;
pub use request::{Flags, RunRequest, FLAG_CPU_LIMIT, FLAG_MEMORY_PEAK};
pub use supervisor::run;
