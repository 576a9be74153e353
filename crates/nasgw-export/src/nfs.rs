//! NFS export backend: grants live in a line-oriented exports file read by
//! the `sfused` NFS connector, export directories live on the remote root
//! volume.

use std::collections::BTreeMap;
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::backend::{validate_export_name, ExportBackend};
use crate::error::{ExportError, Result};
use crate::export::{validate_client, ClientOptions};
use crate::host::{binary_check, process_check, HostOps};
use crate::persist::{fsync_dir, reexport, DEFAULT_FILE_MODE};
use crate::table::ExportTable;

/// NFS connector reloading the exports file on SIGHUP.
pub const DEFAULT_NFS_SERVICE: &str = "sfused";
/// RPC helper required by the NFS connector.
pub const DEFAULT_RPC_SERVICE: &str = "rpcbind";
/// Prefix of the name a wiped export directory is renamed to.
pub const TOMBSTONE_PREFIX: &str = "TRASH-";
/// Permission bits of a newly created export directory.
pub const EXPORT_DIR_MODE: u32 = 0o777;

/// Export backend editing an NFS exports file.
#[derive(Debug)]
pub struct NfsBackend<H> {
    root_export: String,
    exports_file: PathBuf,
    host: H,
    service: String,
    rpc_service: String,
    file_mode: u32,
}

impl<H: HostOps> NfsBackend<H> {
    /// Creates a backend for the root volume `root_export` (e.g. `127.0.0.1:/`)
    /// whose grants are stored in `exports_file`.
    pub fn new(root_export: impl Into<String>, exports_file: impl Into<PathBuf>, host: H) -> Self {
        Self {
            root_export: root_export.into(),
            exports_file: exports_file.into(),
            host,
            service: DEFAULT_NFS_SERVICE.to_string(),
            rpc_service: DEFAULT_RPC_SERVICE.to_string(),
            file_mode: DEFAULT_FILE_MODE,
        }
    }

    /// Overrides the NFS connector and RPC helper process names.
    pub fn with_services(mut self, service: &str, rpc_service: &str) -> Self {
        self.service = service.to_string();
        self.rpc_service = rpc_service.to_string();
        self
    }

    /// Overrides the permission bits of the rewritten exports file.
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Path of the exports file.
    pub fn exports_file(&self) -> &Path {
        &self.exports_file
    }

    /// The host collaborator.
    pub fn host(&self) -> &H {
        &self.host
    }

    fn load_table(&self) -> Result<ExportTable> {
        let _privileges = self.host.elevate()?;
        let content = fs::read_to_string(&self.exports_file)?;
        content.parse()
    }

    fn commit(&self, table: &ExportTable) -> Result<()> {
        reexport(
            &self.host,
            &self.exports_file,
            table,
            &self.service,
            self.file_mode,
        )
    }

    /// Whether the export directory exists on the remote root.
    fn export_directory_exists(&self, export_name: &str) -> Result<bool> {
        let _privileges = self.host.elevate()?;
        let mount = self.host.mount_root(&self.root_export)?;
        Ok(mount.has_directory(export_name))
    }
}

/// Export point under which `export_name` appears in the exports file.
pub fn export_point(export_name: &str) -> String {
    format!("/{}", export_name)
}

impl<H: HostOps> ExportBackend for NfsBackend<H> {
    fn verify_environment(&self) -> Result<()> {
        if !self.exports_file.exists() {
            error!("Exports file '{}' is missing", self.exports_file.display());
            return Err(ExportError::Environment {
                reason: format!(
                    "Unable to find exports file '{}'",
                    self.exports_file.display()
                ),
            });
        }

        let paths = self.host.search_path();
        for binary in [&self.rpc_service, &self.service] {
            binary_check(binary, &paths)?;
        }
        for process in [&self.rpc_service, &self.service] {
            process_check(&self.host, process)?;
        }
        Ok(())
    }

    fn add_export(&self, export_name: &str) -> Result<()> {
        validate_export_name(export_name)?;

        let _privileges = self.host.elevate()?;
        let mount = self.host.mount_root(&self.root_export)?;
        let export_path = mount.path().join(export_name);

        if export_path.exists() {
            debug!("The export directory '{}' already exists", export_name);
            return Ok(());
        }

        match fs::create_dir(&export_path) {
            Ok(()) => {
                // mkdir honours the umask, set the mode explicitly.
                fs::set_permissions(&export_path, Permissions::from_mode(EXPORT_DIR_MODE))?;
                debug!("Created export directory '{}'", export_name);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn wipe_export(&self, export_name: &str) -> Result<()> {
        validate_export_name(export_name)?;

        let point = export_point(export_name);
        if self.load_table()?.contains(&point) {
            return Err(ExportError::ExportHasGrants {
                reason: format!("Unable to remove export '{}' with grants", point),
            });
        }

        let _privileges = self.host.elevate()?;
        let mount = self.host.mount_root(&self.root_export)?;
        if !mount.has_directory(export_name) {
            return Err(ExportError::ExportNotFound {
                reason: format!("No export directory found for '{}'", export_name),
            });
        }

        let tombstone = format!("{}{}", TOMBSTONE_PREFIX, export_name);
        info!("Renaming export '{}' to '{}'", export_name, tombstone);
        if let Err(e) = fs::rename(mount.path().join(export_name), mount.path().join(&tombstone)) {
            error!("Unable to rename '{}' for removal: {}", export_name, e);
            // A concurrent wipe of the same export may have won the race.
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        fsync_dir(mount.path())
    }

    fn grant_access(&self, export_name: &str, host: &str, options: &[String]) -> Result<()> {
        validate_export_name(export_name)?;
        let options: ClientOptions = options.iter().cloned().collect();
        validate_client(host, &options)?;

        if !self.export_directory_exists(export_name)? {
            return Err(ExportError::ExportNotFound {
                reason: format!(
                    "No export directory found for '{}', create it first",
                    export_name
                ),
            });
        }

        let mut table = self.load_table()?;
        table.add_client(&export_point(export_name), host, Some(options))?;
        self.commit(&table)
    }

    fn revoke_access(&self, export_name: &str, host: &str) -> Result<()> {
        validate_export_name(export_name)?;
        let mut table = self.load_table()?;
        table.remove_client(&export_point(export_name), host)?;
        self.commit(&table)
    }

    fn get_export(&self, export_name: &str) -> Result<String> {
        validate_export_name(export_name)?;
        let table = self.load_table()?;
        if let Some(export) = table.get(&export_point(export_name)) {
            return Ok(serde_json::to_string(&export.client_listing())?);
        }

        if self.export_directory_exists(export_name)? {
            let empty: BTreeMap<String, Vec<String>> = BTreeMap::new();
            return Ok(serde_json::to_string(&empty)?);
        }

        Err(ExportError::ExportNotFound {
            reason: format!("No export found for '{}'", export_name),
        })
    }
}
