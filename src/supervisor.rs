//! Clone driver and poll-loop supervisor (C5/C6, spec §4.5-§4.6): forks the
//! sandboxed child via `clone3`, drives the parent/child startup handshake,
//! then polls cgroup counters until the child exits or a limit is hit.
//!
//! Grounded on `examples/original_source/cmd/safeexec/main.c`'s `main()`
//! and `entrypoint()` for the clone/handshake/poll-loop/report sequence,
//! and on `examples/udovin-sbox/src/tasks.rs`'s fork/clone3 + pipe-gated
//! child pattern for the Rust-idiomatic shape (`waitpid`, `ForkResult`-style
//! branching, `nix::sys::signal` for `SIGTERM`/`SIGKILL`).

use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvpe, getgid, getuid, Pid};
use tracing::{debug, info, warn};

use crate::channels::new_startup_pipes;
use crate::error::{ignore_esrch, BoxexecError, Result};
use crate::report::Report;
use crate::request::RunRequest;
use crate::syscall::{clone3, exit_child, CloneArgs, CloneResult};
use crate::{cgroup, mounts, userns};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

static CANCELLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_: nix::libc::c_int) {
    CANCELLED.store(true, Ordering::SeqCst);
}

/// Installs the `SIGTERM` handler that lets an external caller cancel a run
/// in progress (spec §4.6); replaces the original's `volatile int` flag
/// with an `AtomicBool` since Rust signal handlers may run on any thread.
fn install_sigterm_handler() -> Result<()> {
    unsafe {
        signal::sigaction(
            Signal::SIGTERM,
            &signal::SigAction::new(
                SigHandler::Handler(on_sigterm),
                signal::SaFlags::empty(),
                signal::SigSet::empty(),
            ),
        )
    }
    .map_err(|e| format!("cannot install SIGTERM handler: {e}"))?;
    Ok(())
}

/// Runs one full sandboxed execution of `req` and returns the report to
/// hand back to the caller (and, if `req.report_path` is set, to persist).
pub fn run(req: &RunRequest) -> Result<Report> {
    install_sigterm_handler()?;

    let cgroup = cgroup::prepare(req)?;
    let pipes = new_startup_pipes()?;

    match unsafe { clone_child(&cgroup)? } {
        CloneResult::Child => {
            let (initialize_rx, finalize_tx) = pipes.into_child();
            // Any error here is unrecoverable inside the child: there is no
            // parent-side channel left to report it through, so we exit
            // non-zero and let the parent observe the child's death.
            match run_child(req, initialize_rx, finalize_tx) {
                Ok(()) => unreachable!("run_child only returns on error"),
                // 255: the execvpe-failure exit status the C original observes
                // (entrypoint() returns execvpe's -1 directly, truncated to 255
                // as the process exit code), not an arbitrary failure sentinel.
                Err(_) => unsafe { exit_child(255) },
            }
        }
        CloneResult::Parent(pid) => {
            let (initialize_tx, finalize_rx) = pipes.into_parent();
            run_parent(req, &cgroup, pid, initialize_tx, finalize_rx)
        }
    }
}

unsafe fn clone_child(cgroup: &cgroup::CgroupHandle) -> Result<CloneResult> {
    let mut args = CloneArgs::default();
    args.flag_newuser();
    args.flag_newpid();
    args.flag_newns();
    args.flag_newnet();
    args.flag_newipc();
    args.flag_newuts();
    args.flag_newcgroup();
    args.flag_into_cgroup(cgroup.dir());
    clone3(&args).map_err(|e| format!("cannot clone: {e}").into())
}

/// Runs entirely inside the new namespaces. Waits for the parent's uid/gid
/// mapping, builds the mount/uts/workdir/rlimit environment, signals the
/// parent it is ready, then `execvpe`s the payload. Only returns on error.
fn run_child(
    req: &RunRequest,
    initialize_rx: crate::channels::InitializeRx,
    finalize_tx: crate::channels::FinalizeTx,
) -> Result<()> {
    initialize_rx.wait()?;
    mounts::setup(req)?;
    finalize_tx.signal()?;

    let argv = req
        .argv
        .iter()
        .map(|a| std::ffi::CString::new(a.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("argument contains a NUL byte: {e}"))?;
    let env = req
        .env
        .iter()
        .map(|e| std::ffi::CString::new(e.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("environment variable contains a NUL byte: {e}"))?;
    let program = argv
        .first()
        .ok_or_else(|| BoxexecError::InvalidArgument("empty execve arguments".into()))?;

    let errno = execvpe(program, &argv, &env).unwrap_err();
    Err(format!("cannot execvpe {}: {errno}", req.argv[0]).into())
}

/// Runs in the original process. Maps uid/gid into the child's user
/// namespace, releases the child, then polls cgroup counters until the
/// child exits or a limit fires.
fn run_parent(
    req: &RunRequest,
    cgroup: &cgroup::CgroupHandle,
    pid: Pid,
    initialize_tx: crate::channels::InitializeTx,
    finalize_rx: crate::channels::FinalizeRx,
) -> Result<Report> {
    userns::map_root_to(pid, getuid(), getgid())?;
    initialize_tx.signal()?;
    finalize_rx.wait()?;

    let start = Instant::now();
    let real_time_limit = Duration::from_millis(req.real_time_limit_ms());

    let mut peak_memory = 0u64;
    let (status, kill_reason) = loop {
        match waitpid_retry(pid, Some(WaitPidFlag::WUNTRACED | WaitPidFlag::__WALL | WaitPidFlag::WNOHANG))? {
            WaitStatus::StillAlive => {}
            status => break (status, None),
        }

        if CANCELLED.load(Ordering::SeqCst) {
            break (kill_and_wait(pid)?, Some(KillReason::Cancelled));
        }

        let elapsed = start.elapsed();
        if elapsed > real_time_limit {
            break (kill_and_wait(pid)?, Some(KillReason::RealTimeExceeded));
        }

        if !req.flags.use_peak_memory() {
            let current = cgroup::read_memory(cgroup, req.flags)?;
            if current > peak_memory {
                peak_memory = current;
            }
            if peak_memory > req.memory_limit {
                break (kill_and_wait(pid)?, Some(KillReason::MemoryExceeded));
            }
        }

        let cpu_usage_us = cgroup::read_cpu_usage_us(cgroup)?;
        if cpu_usage_us > req.time_limit_ms * 1000 {
            break (kill_and_wait(pid)?, Some(KillReason::CpuTimeExceeded));
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    if let Some(reason) = kill_reason {
        info!(?reason, "run killed by supervisor");
    }

    let real_time = start.elapsed();

    if req.flags.use_peak_memory() {
        peak_memory = cgroup::read_memory(cgroup, req.flags)?;
    } else {
        let current = cgroup::read_memory(cgroup, req.flags)?;
        if current > peak_memory {
            peak_memory = current;
        }
    }
    let mut cpu_time_ms = cgroup::read_cpu_usage_us(cgroup)? / 1000;

    let exit_code = match status {
        WaitStatus::Exited(_, code) => code,
        _ => -1,
    };

    if exit_code != 0 && cgroup::read_oom_count(cgroup)? > 0 {
        peak_memory = req.memory_limit + 1024;
        warn!("child OOM-killed by the kernel; reporting memory sentinel");
    }

    let mut real_time_ms = real_time.as_millis() as u64;
    if cpu_time_ms > req.time_limit_ms || real_time_ms > real_time_limit.as_millis() as u64 {
        cpu_time_ms = req.time_limit_ms + 1;
        real_time_ms = real_time_limit.as_millis() as u64 + 1;
    }

    let report = Report {
        exit_code,
        time_ms: cpu_time_ms,
        real_time_ms,
        memory_bytes: peak_memory,
    };

    if let Some(path) = &req.report_path {
        crate::report::write(path, report)?;
    }

    debug!(fd = cgroup.dir().as_raw_fd(), ?report, "run complete");
    Ok(report)
}

fn kill_and_wait(pid: Pid) -> Result<WaitStatus> {
    ignore_esrch(signal::kill(pid, Signal::SIGKILL)).map_err(|e| format!("cannot kill child: {e}"))?;
    waitpid_retry(pid, Some(WaitPidFlag::WUNTRACED | WaitPidFlag::__WALL))
}

/// Retries `waitpid` across `EINTR` (spec §7 lists it as tolerable): the
/// `SIGTERM` handler is installed without `SA_RESTART`, so a second signal
/// arriving during a blocking wait must not turn a routine interruption
/// into a fatal setup error.
fn waitpid_retry(pid: Pid, flags: Option<WaitPidFlag>) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, flags) {
            Err(Errno::EINTR) => continue,
            other => return other.map_err(|e| format!("cannot wait for child: {e}").into()),
        }
    }
}

#[derive(Debug)]
enum KillReason {
    Cancelled,
    RealTimeExceeded,
    MemoryExceeded,
    CpuTimeExceeded,
}
