use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use boxexec::BoxexecError;
use rand::distributions::{Alphanumeric, DistString as _};

pub struct TempDir(PathBuf);

impl TempDir {
    #[allow(unused)]
    pub fn new() -> Result<Self, BoxexecError> {
        let tmpdir = Path::new(env!("CARGO_TARGET_TMPDIR"));
        let path = loop {
            let path = tmpdir.join(format!("test-{}", rand_string(32)));
            match std::fs::metadata(&path) {
                Ok(_) => continue,
                Err(v) if v.kind() == ErrorKind::NotFound => break path,
                Err(v) => return Err(v.into()),
            }
        };
        std::fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    #[allow(unused)]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.0.join(path)
    }

    #[allow(unused)]
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[allow(unused)]
pub fn rand_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// The cgroup this test process itself lives under, used as the base for
/// scratch cgroups created per test. Honors `TEST_CGROUP_PATH` the way the
/// original crate's test suite did, falling back to the caller's own
/// cgroup as read from `/proc/self/cgroup`.
#[allow(unused)]
pub fn base_cgroup_path() -> PathBuf {
    if let Ok(v) = std::env::var("TEST_CGROUP_PATH") {
        return PathBuf::from(v);
    }
    let data = std::fs::read_to_string("/proc/self/cgroup").expect("cannot read /proc/self/cgroup");
    let own = data
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .expect("cannot find unified cgroup entry");
    PathBuf::from("/sys/fs/cgroup").join(own.trim_start_matches('/'))
}

/// A scratch cgroup directory under [`base_cgroup_path`], removed on drop.
pub struct TempCgroup(PathBuf);

impl TempCgroup {
    #[allow(unused)]
    pub fn new() -> Self {
        let path = base_cgroup_path().join(format!("test-{}", rand_string(32)));
        std::fs::create_dir(&path).expect("cannot create scratch cgroup");
        Self(path)
    }

    #[allow(unused)]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempCgroup {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir(&self.0);
    }
}

/// Path to a prebuilt rootfs tree (e.g. unpacked busybox) for the
/// `#[ignore]`d end-to-end tests; these tests need real namespace/cgroup
/// delegation and are not run by default (spec's scope never covered
/// fetching or unpacking one, unlike the teacher's `get_rootfs`).
#[allow(unused)]
pub fn rootfs_dir() -> PathBuf {
    PathBuf::from(std::env::var("BOXEXEC_TEST_ROOTFS").expect(
        "set BOXEXEC_TEST_ROOTFS to a directory containing a busybox-style rootfs to run the ignored end-to-end tests",
    ))
}
