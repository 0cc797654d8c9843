//! Low-level syscall wrappers not (yet) exposed by `nix`: `clone3` with a
//! cgroup file descriptor, and a thin one-shot pipe pair.
//!
//! Grounded on `examples/udovin-sbox/src/syscall.rs` / `src/clone3.rs`.

use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd};

use nix::errno::Errno;
use nix::libc;
use nix::unistd::Pid;

/// Mirrors the kernel's `struct clone_args` (see `clone(2)`).
#[repr(C, align(8))]
#[derive(Debug, Default)]
pub(crate) struct CloneArgs {
    pub flags: u64,
    pub pidfd: u64,
    pub child_tid: u64,
    pub parent_tid: u64,
    pub exit_signal: u64,
    pub stack: u64,
    pub stack_size: u64,
    pub tls: u64,
    pub set_tid: u64,
    pub set_tid_size: u64,
    pub cgroup: u64,
}

impl CloneArgs {
    pub fn flag_newuser(&mut self) {
        self.flags |= libc::CLONE_NEWUSER as u64;
    }

    pub fn flag_newns(&mut self) {
        self.flags |= libc::CLONE_NEWNS as u64;
    }

    pub fn flag_newpid(&mut self) {
        self.flags |= libc::CLONE_NEWPID as u64;
    }

    pub fn flag_newnet(&mut self) {
        self.flags |= libc::CLONE_NEWNET as u64;
    }

    pub fn flag_newipc(&mut self) {
        self.flags |= libc::CLONE_NEWIPC as u64;
    }

    pub fn flag_newuts(&mut self) {
        self.flags |= libc::CLONE_NEWUTS as u64;
    }

    pub fn flag_newcgroup(&mut self) {
        self.flags |= libc::CLONE_NEWCGROUP as u64;
    }

    /// Attaches the child to `cgroup` atomically at clone time
    /// (`CLONE_INTO_CGROUP`), closing the race window a post-hoc
    /// `cgroup.procs` write would leave open (spec §9).
    pub fn flag_into_cgroup<T: AsRawFd>(&mut self, cgroup: &T) {
        self.flags |= libc::CLONE_INTO_CGROUP as u64;
        self.cgroup = cgroup.as_raw_fd() as u64;
    }
}

pub(crate) enum CloneResult {
    Child,
    Parent(Pid),
}

/// # Safety
/// Forks the calling task via the raw `clone3` syscall; the child side must
/// not unwind past this call without `_exit`ing explicitly.
pub(crate) unsafe fn clone3(cl_args: &CloneArgs) -> Result<CloneResult, Errno> {
    let res = libc::syscall(
        libc::SYS_clone3,
        cl_args as *const CloneArgs,
        core::mem::size_of::<CloneArgs>(),
    );
    Errno::result(res).map(|v| match v {
        0 => CloneResult::Child,
        v => CloneResult::Parent(Pid::from_raw(v as libc::pid_t)),
    })
}

/// One-shot pipe. `rx()`/`tx()` consume `self`, dropping the other end so
/// the reader observes EOF as soon as every writer is gone.
pub(crate) struct Pipe {
    rx: File,
    tx: File,
}

impl Pipe {
    pub fn rx(self) -> File {
        drop(self.tx);
        self.rx
    }

    pub fn tx(self) -> File {
        drop(self.rx);
        self.tx
    }
}

pub(crate) fn new_pipe() -> nix::Result<Pipe> {
    let (rx, tx) = nix::unistd::pipe()?;
    Ok(Pipe {
        rx: unsafe { File::from_raw_fd(rx) },
        tx: unsafe { File::from_raw_fd(tx) },
    })
}

/// Reads until EOF without consuming any bytes; any byte read is a startup
/// protocol violation (spec §4.4).
pub(crate) fn expect_eof(mut rx: impl Read) -> std::io::Result<()> {
    let mut buf = [0u8; 1];
    match rx.read(&mut buf)? {
        0 => Ok(()),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unexpected byte on startup channel",
        )),
    }
}

pub(crate) unsafe fn exit_child(code: i32) -> ! {
    libc::_exit(code)
}
