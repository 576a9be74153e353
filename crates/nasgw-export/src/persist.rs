//! Committing an export table: atomic file replacement, directory fsync and
//! the reload signal sent to the running NFS service.

use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;
use crate::host::{HostOps, RELOAD_SIGNAL};
use crate::table::ExportTable;

/// Permission bits of a freshly written exports file.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Flushes a directory's metadata (e.g. a rename inside it) to stable storage.
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Replaces `path` with `text` atomically.
///
/// The content goes to a temporary file in the same directory, which is
/// synced and renamed over `path`; the directory is synced afterwards so the
/// rename survives a crash. Readers see either the old or the new file.
pub fn safe_write(text: &str, path: &Path, mode: u32) -> Result<()> {
    debug!("Writing '{}'", path.display());
    let target_dir = parent_dir(path);

    let mut file = NamedTempFile::new_in(target_dir)?;
    fs::set_permissions(file.path(), Permissions::from_mode(mode))?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    fsync_dir(target_dir)
}

/// Persists `table` to `exports_file` and asks every running `service`
/// instance to reload it.
///
/// Finding no running instance is not an error here; the environment
/// preflight is responsible for that.
pub fn reexport(
    host: &dyn HostOps,
    exports_file: &Path,
    table: &ExportTable,
    service: &str,
    mode: u32,
) -> Result<()> {
    let _privileges = host.elevate()?;

    safe_write(&table.serialize(), exports_file, mode)?;

    for pid in host.find_pids(service)? {
        debug!("Sending reload signal to '{}' (pid {})", service, pid);
        host.send_signal(pid, RELOAD_SIGNAL)?;
    }
    Ok(())
}
