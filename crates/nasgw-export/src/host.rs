//! Host collaborators: privileges, remote root mounts, the process table and
//! the executable search path.
//!
//! [`HostOps`] is the seam between the lifecycle operations and the machine
//! they run on. [`LinuxHost`] is the production implementation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use crate::error::{ExportError, Result};
use crate::privilege::PrivilegeGuard;

/// Default location of the live process table.
pub const PROC_ROOT: &str = "/proc";

/// Reload signal delivered to the NFS service after a reexport.
pub const RELOAD_SIGNAL: i32 = libc::SIGHUP;

/// A mounted root volume, unmounted when dropped.
#[derive(Debug)]
pub struct RootMount {
    path: PathBuf,
    managed: bool,
}

impl RootMount {
    /// Mounts `root_export` (e.g. `127.0.0.1:/`) on a fresh temporary directory.
    pub fn mount(root_export: &str) -> Result<Self> {
        let path = fresh_mount_point()?;
        let status = Command::new("mount").arg(root_export).arg(&path).status();
        match status {
            Ok(status) if status.success() => {
                debug!("Mounted nfs root '{}' at '{}'", root_export, path.display());
                Ok(Self {
                    path,
                    managed: true,
                })
            }
            Ok(status) => {
                error!("Unable to mount NFS root '{}': {}", root_export, status);
                let _ = fs::remove_dir(&path);
                Err(ExportError::Command {
                    reason: format!("mount {} exited with {}", root_export, status),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            Err(e) => {
                error!("Unable to mount NFS root '{}': {}", root_export, e);
                let _ = fs::remove_dir(&path);
                Err(e.into())
            }
        }
    }

    /// Wraps an already available directory; nothing happens on drop.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            managed: false,
        }
    }

    /// Local directory the root volume is reachable at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a directory named `name` exists directly under the mount.
    pub fn has_directory(&self, name: &str) -> bool {
        self.path.join(name).is_dir()
    }
}

impl Drop for RootMount {
    fn drop(&mut self) {
        if !self.managed {
            return;
        }
        match Command::new("umount").arg(&self.path).status() {
            Ok(status) if status.success() => debug!("Unmounted nfs root"),
            Ok(status) => {
                error!("Unable to umount NFS root '{}': {}", self.path.display(), status);
                return;
            }
            Err(e) => {
                error!("Unable to umount NFS root '{}': {}", self.path.display(), e);
                return;
            }
        }
        if let Err(e) = fs::remove_dir(&self.path) {
            warn!("Unable to clean up temporary NFS root: {}", e);
        }
    }
}

fn fresh_mount_point() -> Result<PathBuf> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let path = std::env::temp_dir().join(format!(
        "nasgw-root-{}-{}",
        std::process::id(),
        nanos
    ));
    fs::create_dir(&path)?;
    Ok(path)
}

/// Operations the export backends need from the machine they run on.
pub trait HostOps {
    /// Acquires root privileges for the lifetime of the returned guard.
    fn elevate(&self) -> Result<PrivilegeGuard>;
    /// Makes the remote root volume available as a local directory.
    fn mount_root(&self, root_export: &str) -> Result<RootMount>;
    /// Pids of running processes named `process`.
    fn find_pids(&self, process: &str) -> Result<Vec<i32>>;
    /// Delivers `signal` to `pid`.
    fn send_signal(&self, pid: i32, signal: i32) -> Result<()>;
    /// Directories searched for executables.
    fn search_path(&self) -> Vec<PathBuf>;
    /// Contents of the mount table (`/proc/mounts` format).
    fn mounts(&self) -> Result<String>;
}

/// The real host, backed by syscalls, `/proc` and the `mount` binaries.
#[derive(Debug, Clone)]
pub struct LinuxHost {
    proc_root: PathBuf,
}

impl LinuxHost {
    /// A host reading the live process table under `/proc`.
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from(PROC_ROOT),
        }
    }
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostOps for LinuxHost {
    fn elevate(&self) -> Result<PrivilegeGuard> {
        PrivilegeGuard::acquire()
    }

    fn mount_root(&self, root_export: &str) -> Result<RootMount> {
        RootMount::mount(root_export)
    }

    fn find_pids(&self, process: &str) -> Result<Vec<i32>> {
        find_pids_in(&self.proc_root, process)
    }

    fn send_signal(&self, pid: i32, signal: i32) -> Result<()> {
        // SAFETY: kill has no memory-safety preconditions.
        if unsafe { libc::kill(pid, signal) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn search_path(&self) -> Vec<PathBuf> {
        std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default()
    }

    fn mounts(&self) -> Result<String> {
        Ok(fs::read_to_string(self.proc_root.join("mounts"))?)
    }
}

/// Finds pids by inspecting the `Name:` line of `<proc_root>/<pid>/status`.
///
/// Processes exiting while the table is scanned are skipped.
pub fn find_pids_in(proc_root: &Path, process: &str) -> Result<Vec<i32>> {
    let mut pids = Vec::new();

    for entry in fs::read_dir(proc_root)? {
        let entry = entry?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };

        let status = match fs::read_to_string(entry.path().join("status")) {
            Ok(status) => status,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let name = status
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1));
        if name == Some(process) {
            pids.push(pid);
        }
    }

    pids.sort_unstable();
    debug!("PIDs for '{}': {:?}", process, pids);
    Ok(pids)
}

/// Checks that `binary` exists in at least one of `paths`.
pub fn binary_check(binary: &str, paths: &[PathBuf]) -> Result<()> {
    if paths.iter().any(|dir| dir.join(binary).exists()) {
        return Ok(());
    }

    let searched: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    error!("No '{}' found in PATH ({})", binary, searched.join(", "));
    Err(ExportError::Environment {
        reason: format!("Unable to find '{}', make sure it is installed", binary),
    })
}

/// Checks that at least one process named `process` is running.
pub fn process_check(host: &dyn HostOps, process: &str) -> Result<()> {
    if host.find_pids(process)?.is_empty() {
        error!("'{}' is not running", process);
        return Err(ExportError::Environment {
            reason: format!(
                "Could not find '{}' running, make sure it is started",
                process
            ),
        });
    }
    Ok(())
}

/// Whether `path` lives on a fuse-backed (SOFS) mount according to `mounts`.
pub fn is_stored_on_sofs(mounts: &str, path: &str) -> bool {
    let path = path.trim_end_matches('/');
    mounts.lines().any(|line| {
        let mut parts = line.split_whitespace();
        let (Some(mnt_type), Some(mnt_point)) = (parts.next(), parts.next()) else {
            return false;
        };
        mnt_type.ends_with("fuse") && path.starts_with(mnt_point.trim_end_matches('/'))
    })
}
