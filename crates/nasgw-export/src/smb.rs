//! SMB export backend: shares are defined in the Samba registry through
//! `net conf`, export directories live under a locally mounted SOFS root.

use std::collections::BTreeMap;
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Command;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::backend::{validate_export_name, ExportBackend};
use crate::error::{ExportError, Result};
use crate::export::{validate_client, ClientOptions};
use crate::host::{binary_check, is_stored_on_sofs, process_check, HostOps};
use crate::nfs::{DEFAULT_NFS_SERVICE, EXPORT_DIR_MODE, TOMBSTONE_PREFIX};
use crate::persist::fsync_dir;

/// Samba daemon serving the shares.
pub const DEFAULT_SMB_SERVICE: &str = "smbd";
/// Default Samba configuration file.
pub const DEFAULT_SMB_CONF: &str = "/etc/samba/smb.conf";
/// Line enabling registry-backed shares in the Samba configuration.
pub const REGISTRY_SHARES_LINE: &str = "registry shares = yes";
/// Hosts allowed on a share that has no external grant.
pub const LOCALHOST: &str = "127.0.0.1";

const HOSTS_ALLOW: &str = "hosts allow";

/// Share parameters set on creation; all hosts are denied until granted.
const SHARE_PARAMETERS: &[(&str, &str)] = &[
    ("browseable", "yes"),
    ("create mask", "0755"),
    ("hosts deny", "0.0.0.0/0"),
    (HOSTS_ALLOW, LOCALHOST),
    ("read only", "no"),
];

/// Parameters of every share in the registry, keyed by share name.
pub type ShareRegistry = BTreeMap<String, BTreeMap<String, String>>;

/// Runs external commands and returns their standard output.
pub trait CommandRunner {
    /// Runs `cmd` (program followed by its arguments), failing with
    /// `ExportError::Command` on a non-zero exit status.
    fn run(&self, cmd: &[String]) -> Result<String>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &[String]) -> Result<String> {
        let (program, args) = cmd.split_first().ok_or_else(|| ExportError::Command {
            reason: "empty command".to_string(),
            stdout: String::new(),
            stderr: String::new(),
        })?;

        let output = Command::new(program).args(args).output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ExportError::Command {
                reason: format!("'{}' exited with {}", cmd.join(" "), output.status),
                stdout,
                stderr,
            });
        }
        Ok(stdout)
    }
}

fn net_conf(args: &[&str]) -> Vec<String> {
    ["net", "conf"]
        .iter()
        .chain(args)
        .map(|s| s.to_string())
        .collect()
}

/// Parses the INI dump printed by `net conf list`.
///
/// Keys are lower-cased, values trimmed; lines outside a section are ignored.
pub fn parse_net_conf(output: &str) -> ShareRegistry {
    let mut shares = ShareRegistry::new();
    let mut current: Option<String> = None;

    for raw in output.lines() {
        let line = raw.replace('\t', "");
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            shares.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let (Some(section), Some((key, value))) = (current.as_ref(), line.split_once('=')) else {
            continue;
        };
        shares
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_lowercase(), value.trim().to_string());
    }

    shares
}

fn hosts_allow(share: &BTreeMap<String, String>) -> Vec<String> {
    share
        .get(HOSTS_ALLOW)
        .map(|hosts| hosts.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Export backend driving the Samba registry.
#[derive(Debug)]
pub struct SmbBackend<H, R> {
    root_export: PathBuf,
    smb_conf: PathBuf,
    host: H,
    runner: R,
    service: String,
    connector: String,
}

impl<H: HostOps, R: CommandRunner> SmbBackend<H, R> {
    /// Creates a backend exporting directories of the SOFS directory
    /// `root_export` (e.g. `/ring/fs/samba_shares`).
    pub fn new(root_export: impl Into<PathBuf>, host: H, runner: R) -> Self {
        Self {
            root_export: root_export.into(),
            smb_conf: PathBuf::from(DEFAULT_SMB_CONF),
            host,
            runner,
            service: DEFAULT_SMB_SERVICE.to_string(),
            connector: DEFAULT_NFS_SERVICE.to_string(),
        }
    }

    /// Overrides the Samba configuration checked for registry shares.
    pub fn with_smb_conf(mut self, smb_conf: impl Into<PathBuf>) -> Self {
        self.smb_conf = smb_conf.into();
        self
    }

    /// Overrides the Samba daemon and SOFS connector process names.
    pub fn with_services(mut self, service: &str, connector: &str) -> Self {
        self.service = service.to_string();
        self.connector = connector.to_string();
        self
    }

    /// The command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// All shares currently defined in the Samba registry.
    pub fn defined_exports(&self) -> Result<ShareRegistry> {
        let stdout = {
            let _privileges = self.host.elevate()?;
            self.runner.run(&net_conf(&["list"]))?
        };
        Ok(parse_net_conf(&stdout))
    }

    fn existing_export(&self, export_name: &str) -> Result<BTreeMap<String, String>> {
        self.defined_exports()?
            .remove(export_name)
            .ok_or_else(|| ExportError::ExportNotFound {
                reason: format!("Share '{}' not found in Samba registry.", export_name),
            })
    }

    fn set_hosts_allow(&self, export_name: &str, hosts: &[String]) -> Result<()> {
        let joined = hosts.join(" ");
        let _privileges = self.host.elevate()?;
        self.runner
            .run(&net_conf(&["setparm", export_name, HOSTS_ALLOW, joined.as_str()]))?;
        Ok(())
    }

    fn registry_shares_enabled(&self) -> Result<bool> {
        let content = fs::read_to_string(&self.smb_conf)?;
        Ok(content
            .lines()
            .any(|line| line.trim() == REGISTRY_SHARES_LINE))
    }
}

impl<H: HostOps, R: CommandRunner> ExportBackend for SmbBackend<H, R> {
    fn verify_environment(&self) -> Result<()> {
        let root = self.root_export.to_string_lossy();
        if !is_stored_on_sofs(&self.host.mounts()?, &root) {
            return Err(ExportError::Environment {
                reason: format!("{} doesn't seem to be stored on a SOFS filesystem", root),
            });
        }

        let paths = self.host.search_path();
        for binary in ["net", self.connector.as_str()] {
            binary_check(binary, &paths)?;
        }
        for process in [&self.connector, &self.service] {
            process_check(&self.host, process)?;
        }

        if !self.registry_shares_enabled()? {
            return Err(ExportError::Environment {
                reason: format!(
                    "You must enable 'registry shares' in your Samba configuration: \
                     add '{}' in the [global] section.",
                    REGISTRY_SHARES_LINE
                ),
            });
        }
        Ok(())
    }

    fn add_export(&self, export_name: &str) -> Result<()> {
        validate_export_name(export_name)?;

        let export_path = self.root_export.join(export_name);
        let export_path_str = export_path.to_string_lossy().into_owned();

        let _privileges = self.host.elevate()?;
        match fs::create_dir(&export_path) {
            Ok(()) => {
                fs::set_permissions(&export_path, Permissions::from_mode(EXPORT_DIR_MODE))?;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("The share/directory {} already exists on SOFS", export_name);
                if self.defined_exports()?.contains_key(export_name) {
                    return Err(ExportError::ExportAlreadyExists {
                        reason: format!("Share '{}' already defined in Samba registry.", export_name),
                    });
                }
            }
            Err(e) => return Err(e.into()),
        }

        self.runner.run(&net_conf(&[
            "addshare",
            export_name,
            export_path_str.as_str(),
            "writeable=y",
            "guest_ok=y",
        ]))?;
        for &(param, value) in SHARE_PARAMETERS {
            self.runner
                .run(&net_conf(&["setparm", export_name, param, value]))?;
        }
        Ok(())
    }

    fn wipe_export(&self, export_name: &str) -> Result<()> {
        validate_export_name(export_name)?;

        let export = self.existing_export(export_name)?;
        let allowed = export.get(HOSTS_ALLOW).map(|h| h.trim()).unwrap_or_default();
        if !allowed.is_empty() && allowed != LOCALHOST {
            return Err(ExportError::ExportHasGrants {
                reason: "Unable to remove export with grants".to_string(),
            });
        }

        // Timestamped so the same name can be wiped more than once.
        let tombstone = format!(
            "{}{}-{}",
            TOMBSTONE_PREFIX,
            export_name,
            Utc::now().format("%Y-%b-%d-%H:%M:%S-%Z")
        );
        let export_path = self.root_export.join(export_name);
        let tombstone_path = self.root_export.join(&tombstone);

        let _privileges = self.host.elevate()?;
        info!("Deleting the export '{}' from the Samba registry", export_name);
        self.runner.run(&net_conf(&["delshare", export_name]))?;

        info!("Renaming export '{}' to '{}'", export_name, tombstone);
        if let Err(e) = fs::rename(&export_path, &tombstone_path) {
            error!("Unable to rename '{}' for removal: {}", export_name, e);
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        fsync_dir(&self.root_export)
    }

    fn grant_access(&self, export_name: &str, host: &str, options: &[String]) -> Result<()> {
        validate_export_name(export_name)?;
        let client_options: ClientOptions = options.iter().cloned().collect();
        validate_client(host, &client_options)?;

        let export = self.existing_export(export_name)?;
        let mut hosts = hosts_allow(&export);

        if hosts.iter().any(|h| h == host) {
            return Err(ExportError::ClientExists {
                reason: format!("Host '{}' already allowed on share '{}'", host, export_name),
            });
        }
        if !options.is_empty() {
            debug!("Ignoring per-host options {:?} on SMB share", options);
        }

        hosts.push(host.to_string());
        self.set_hosts_allow(export_name, &hosts)
    }

    fn revoke_access(&self, export_name: &str, host: &str) -> Result<()> {
        let export = self.existing_export(export_name)?;
        let mut hosts = hosts_allow(&export);

        if !hosts.iter().any(|h| h == host) {
            return Err(ExportError::ClientNotFound {
                reason: format!(
                    "'{}' has no access defined on share '{}'",
                    host, export_name
                ),
            });
        }

        hosts.retain(|h| h != host);
        self.set_hosts_allow(export_name, &hosts)
    }

    fn get_export(&self, export_name: &str) -> Result<String> {
        let export = self.existing_export(export_name)?;
        let clients: BTreeMap<String, Vec<String>> = hosts_allow(&export)
            .into_iter()
            .map(|host| (host, vec!["rw".to_string()]))
            .collect();
        Ok(serde_json::to_string(&clients)?)
    }
}
