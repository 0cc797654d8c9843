use std::io;

/// Errors produced while preparing or supervising a sandboxed run.
///
/// Every variant here is fatal in the sense of spec §7: the caller prints
/// the message and exits non-zero. Payload crashes and limit violations are
/// never represented as `BoxexecError` — they show up as `Report` fields.
#[derive(thiserror::Error, Debug)]
pub enum BoxexecError {
    #[error("{0}")]
    Setup(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Errno(#[from] nix::errno::Errno),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<String> for BoxexecError {
    fn from(value: String) -> Self {
        BoxexecError::Setup(value)
    }
}

impl From<&str> for BoxexecError {
    fn from(value: &str) -> Self {
        BoxexecError::Setup(value.to_owned())
    }
}

pub type Result<T> = std::result::Result<T, BoxexecError>;

/// Runs `op`, turning an `Err` with the given `io::ErrorKind` into `Ok(())`.
///
/// Grounded on the C original's `ensure(errno == EEXIST, ...)` /
/// `ensure(errno == ENOENT, ...)` tolerance checks (spec §7): a handful of
/// syscall/errno pairs are not failures, everything else is fatal.
pub(crate) fn ignore_kind(result: io::Result<()>, kind: io::ErrorKind) -> io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == kind => Ok(()),
        Err(err) => Err(err),
    }
}

/// Runs `op`, turning an `Err(Errno::ESRCH)` into `Ok(())`.
///
/// Used for `kill()` racing against the child's natural exit (spec §7).
pub(crate) fn ignore_esrch(result: nix::Result<()>) -> nix::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(err),
    }
}
