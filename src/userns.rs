//! UID/GID mapper (C3, spec §4.3): parent-side writer of the child's
//! `uid_map`/`setgroups`/`gid_map`, mapping uid 0 inside the user namespace
//! to the invoker's real uid/gid outside.
//!
//! Grounded on `examples/udovin-sbox/src/userns.rs`'s `IdMap`/`UserMapper`
//! shape, but using the direct single-entry `/proc/<pid>/{uid,gid}_map`
//! write sequence from `examples/original_source/cmd/safeexec/main.c`'s
//! `prepareUserNamespace` rather than the teacher's `new{u,g}idmap` helper
//! binaries — this spec always maps a single uid/gid 1:1, so there is no
//! sub-id range to delegate.

use std::fs::File;
use std::io::Write as _;

use nix::unistd::{Gid, Pid, Uid};
use tracing::debug;

use crate::error::Result;

/// Writes `uid_map`, `setgroups=deny`, `gid_map` for `pid`, in that exact
/// order (setgroups must precede gid_map in an unprivileged user
/// namespace, spec §4.3).
pub(crate) fn map_root_to(pid: Pid, uid: Uid, gid: Gid) -> Result<()> {
    debug!(%pid, %uid, %gid, "mapping uid/gid");
    write_file(pid, "uid_map", &format!("0 {uid} 1\n"))?;
    write_file(pid, "setgroups", "deny\n")?;
    write_file(pid, "gid_map", &format!("0 {gid} 1\n"))?;
    Ok(())
}

fn write_file(pid: Pid, file: &str, contents: &str) -> Result<()> {
    let path = format!("/proc/{pid}/{file}");
    File::options()
        .write(true)
        .truncate(true)
        .open(&path)
        .and_then(|mut f| f.write_all(contents.as_bytes()))
        .map_err(|e| format!("cannot write {path}: {e}"))?;
    Ok(())
}
