//! Startup coordinator (C4): two one-shot close-to-signal channels that
//! order the parent/child handshake (spec §4.4).
//!
//! Grounded on `examples/udovin-sbox/src/syscall.rs`'s `Pipe::rx`/`tx`
//! consuming-self pattern, specialised into the two named one-shot edges
//! spec.md §4.4 describes instead of the teacher's generic result-passing
//! pipes.
//!
//! Both pipes are created in the parent before `clone3`; the clone
//! inherits both file descriptor pairs, and each side then keeps only the
//! half it owns by calling the consuming `.rx()`/`.tx()` on its own copy of
//! the `Pipe` value (exactly the pattern `examples/udovin-sbox/src/
//! process.rs` uses for its result pipes).

use std::fs::File;

use crate::error::Result;
use crate::syscall::{expect_eof, new_pipe, Pipe};

/// The two one-shot pipes, still whole, created before `clone3` so both
/// sides inherit both file descriptor pairs.
pub(crate) struct StartupPipes {
    pub initialize: Pipe,
    pub finalize: Pipe,
}

pub(crate) fn new_startup_pipes() -> Result<StartupPipes> {
    Ok(StartupPipes {
        initialize: new_pipe()?,
        finalize: new_pipe()?,
    })
}

/// Parent holds the write end; child holds the read end.
pub(crate) struct InitializeTx(File);
pub(crate) struct InitializeRx(File);

/// Child holds the write end; parent holds the read end.
pub(crate) struct FinalizeTx(File);
pub(crate) struct FinalizeRx(File);

impl StartupPipes {
    /// Keeps the parent's halves: write end of `initialize`, read end of
    /// `finalize`. Drops the other halves in this process.
    pub fn into_parent(self) -> (InitializeTx, FinalizeRx) {
        (InitializeTx(self.initialize.tx()), FinalizeRx(self.finalize.rx()))
    }

    /// Keeps the child's halves: read end of `initialize`, write end of
    /// `finalize`. Drops the other halves in this process.
    pub fn into_child(self) -> (InitializeRx, FinalizeTx) {
        (InitializeRx(self.initialize.rx()), FinalizeTx(self.finalize.tx()))
    }
}

impl InitializeTx {
    /// Signals the child: UID/GID mapping is done.
    pub fn signal(self) -> Result<()> {
        drop(self.0);
        Ok(())
    }
}

impl InitializeRx {
    /// Blocks until the parent has finished UID/GID mapping.
    pub fn wait(self) -> Result<()> {
        expect_eof(self.0)?;
        Ok(())
    }
}

impl FinalizeTx {
    /// Signals the parent: mounts/pivot/chdir are done.
    pub fn signal(self) -> Result<()> {
        drop(self.0);
        Ok(())
    }
}

impl FinalizeRx {
    /// Blocks until the child has finished isolation setup.
    pub fn wait(self) -> Result<()> {
        expect_eof(self.0)?;
        Ok(())
    }
}
