//! Namespace builder (C2, spec §4.2): runs in the child after the
//! `initialize` gate releases it. Builds the overlay rootfs, mounts the
//! pseudo-filesystems and device nodes, then pivots into it.
//!
//! Grounded on `examples/udovin-sbox/src/mounts.rs` (`OverlayMount`,
//! `BaseMounts`, `remount_private_root`, `pivot_root`, `setup_mount`) for
//! the private-root/overlay/pseudo-fs/pivot sequence, and on
//! `examples/original_source/cmd/safeexec/main.c`'s `setupDevMount`/
//! `createDev` for the `/dev/{null,random,urandom}` bind mounts and the
//! stack-rlimit step, neither of which the teacher's `mounts.rs`
//! implements.

use std::fs::File;
use std::io::ErrorKind;
use std::os::fd::FromRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::{open, OFlag};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::stat::Mode;
use nix::unistd::{fchdir, sethostname};
use tracing::debug;

use crate::error::{ignore_kind, Result};
use crate::request::RunRequest;

const DEVICES: [&str; 3] = ["/dev/null", "/dev/random", "/dev/urandom"];

/// Runs the full namespace-construction sequence (spec §4.2), called from
/// the child after its `initialize` gate is observed.
pub(crate) fn setup(req: &RunRequest) -> Result<()> {
    remount_private_root(&req.rootfs)?;
    mount_overlay(req)?;
    mount_pseudo_filesystems(&req.rootfs)?;
    bind_devices(&req.rootfs)?;
    pivot_root(&req.rootfs)?;
    sethostname("sandbox").map_err(|e| format!("cannot set hostname: {e}"))?;
    std::env::set_current_dir(&req.workdir)
        .map_err(|e| format!("cannot chdir to {}: {e}", req.workdir.display()))?;
    set_unlimited_stack()?;
    Ok(())
}

fn remount_private_root(rootfs: &Path) -> Result<()> {
    debug!("remounting / private");
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| format!("cannot remount / slave: {e}"))?;
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| format!("cannot bind-mount rootfs onto itself: {e}"))?;
    Ok(())
}

fn mount_overlay(req: &RunRequest) -> Result<()> {
    let lowerdir = req
        .overlay_lowerdir
        .iter()
        .map(|p| p.to_str().ok_or_else(|| format!("invalid overlay lowerdir: {p:?}")))
        .collect::<Result<Vec<_>>>()?
        .join(":");
    let upperdir = req
        .overlay_upperdir
        .to_str()
        .ok_or_else(|| format!("invalid overlay upperdir: {:?}", req.overlay_upperdir))?;
    let workdir = req
        .overlay_workdir
        .to_str()
        .ok_or_else(|| format!("invalid overlay workdir: {:?}", req.overlay_workdir))?;
    let data = format!("lowerdir={lowerdir},upperdir={upperdir},workdir={workdir}");
    debug!(%data, "mounting overlay rootfs");
    mount(
        Some("overlay"),
        &req.rootfs,
        Some("overlay"),
        MsFlags::empty(),
        Some(data.as_str()),
    )
    .map_err(|e| format!("cannot mount overlay: {e}"))?;
    Ok(())
}

struct PseudoMount {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

const PSEUDO_MOUNTS: &[PseudoMount] = &[
    PseudoMount {
        source: "sysfs",
        target: "sys",
        fstype: "sysfs",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOEXEC.bits() | MsFlags::MS_NOSUID.bits() | MsFlags::MS_NODEV.bits() | MsFlags::MS_RDONLY.bits(),
        ),
        data: None,
    },
    PseudoMount {
        source: "proc",
        target: "proc",
        fstype: "proc",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOEXEC.bits() | MsFlags::MS_NOSUID.bits() | MsFlags::MS_NODEV.bits(),
        ),
        data: None,
    },
    PseudoMount {
        source: "tmpfs",
        target: "dev",
        fstype: "tmpfs",
        flags: MsFlags::from_bits_truncate(MsFlags::MS_NOSUID.bits() | MsFlags::MS_STRICTATIME.bits()),
        data: Some("mode=755,size=65536k"),
    },
    PseudoMount {
        source: "devpts",
        target: "dev/pts",
        fstype: "devpts",
        flags: MsFlags::from_bits_truncate(MsFlags::MS_NOSUID.bits() | MsFlags::MS_NOEXEC.bits()),
        data: Some("newinstance,ptmxmode=0666,mode=0620"),
    },
    PseudoMount {
        source: "tmpfs",
        target: "dev/shm",
        fstype: "tmpfs",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOEXEC.bits() | MsFlags::MS_NOSUID.bits() | MsFlags::MS_NODEV.bits(),
        ),
        data: Some("mode=1777,size=65536k"),
    },
    PseudoMount {
        source: "mqueue",
        target: "dev/mqueue",
        fstype: "mqueue",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOEXEC.bits() | MsFlags::MS_NOSUID.bits() | MsFlags::MS_NODEV.bits(),
        ),
        data: None,
    },
    PseudoMount {
        source: "cgroup",
        target: "sys/fs/cgroup",
        fstype: "cgroup2",
        flags: MsFlags::from_bits_truncate(
            MsFlags::MS_NOEXEC.bits()
                | MsFlags::MS_NOSUID.bits()
                | MsFlags::MS_NODEV.bits()
                | MsFlags::MS_RELATIME.bits()
                | MsFlags::MS_RDONLY.bits(),
        ),
        data: None,
    },
];

fn mount_pseudo_filesystems(rootfs: &Path) -> Result<()> {
    for m in PSEUDO_MOUNTS {
        let target = rootfs.join(m.target);
        ignore_kind(std::fs::create_dir_all(&target), ErrorKind::AlreadyExists)
            .map_err(|e| format!("cannot create {}: {e}", target.display()))?;
        mount(Some(m.source), &target, Some(m.fstype), m.flags, m.data)
            .map_err(|e| format!("cannot mount {}: {e}", target.display()))?;
    }
    Ok(())
}

/// Ensures each device's bind target exists (mode 0000) then bind-mounts
/// the host device node onto it (spec §4.2).
fn bind_devices(rootfs: &Path) -> Result<()> {
    for device in DEVICES {
        let target = rootfs.join(device.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            ignore_kind(std::fs::create_dir_all(parent), ErrorKind::AlreadyExists)
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }
        if !target.exists() {
            File::options()
                .create(true)
                .write(true)
                .mode(0o000)
                .open(&target)
                .map_err(|e| format!("cannot create {}: {e}", target.display()))?;
        }
        mount(
            Some(device),
            &target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| format!("cannot bind-mount {device}: {e}"))?;
    }
    Ok(())
}

/// Pivots into `rootfs` using the old-root-as-self trick: open old `/` and
/// the new rootfs as directory fds, fchdir new, `pivot_root(".", ".")`,
/// fchdir old, remount old root `slave|rec`, `umount2(".", MNT_DETACH)`,
/// then chdir back to `/` (spec §4.2).
fn pivot_root(rootfs: &Path) -> Result<()> {
    debug!(?rootfs, "pivoting root");
    let old_root_fd = open("/", OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())
        .map_err(|e| format!("cannot open old root: {e}"))?;
    let new_root_fd = open(rootfs, OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())
        .map_err(|e| format!("cannot open new root: {e}"))?;
    let old_root = unsafe { File::from_raw_fd(old_root_fd) };
    let new_root = unsafe { File::from_raw_fd(new_root_fd) };

    fchdir(&new_root).map_err(|e| format!("cannot chdir to new root: {e}"))?;
    nix::unistd::pivot_root(".", ".").map_err(|e| format!("cannot pivot_root: {e}"))?;
    fchdir(&old_root).map_err(|e| format!("cannot chdir to old root: {e}"))?;
    mount(
        None::<&str>,
        ".",
        None::<&str>,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| format!("cannot remount old root slave: {e}"))?;
    umount2(".", MntFlags::MNT_DETACH).map_err(|e| format!("cannot unmount old root: {e}"))?;
    std::env::set_current_dir("/").map_err(|e| format!("cannot chdir to /: {e}"))?;
    Ok(())
}

/// Sets `RLIMIT_STACK` to infinity so payloads assuming a generous stack
/// don't get `ENOMEM` during their own setup (grounded on
/// `examples/original_source/cmd/safeexec/main.c`'s `entrypoint()`).
fn set_unlimited_stack() -> Result<()> {
    setrlimit(Resource::RLIMIT_STACK, nix::libc::RLIM_INFINITY, nix::libc::RLIM_INFINITY)
        .map_err(|e| format!("cannot set stack rlimit: {e}"))?;
    Ok(())
}
