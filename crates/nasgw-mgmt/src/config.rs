//! Gateway configuration: built-in defaults overlaid by an optional TOML or
//! JSON file.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use nasgw_export::nfs::{DEFAULT_NFS_SERVICE, DEFAULT_RPC_SERVICE};
use nasgw_export::persist::DEFAULT_FILE_MODE;
use nasgw_export::smb::{DEFAULT_SMB_CONF, DEFAULT_SMB_SERVICE};

/// Export backend the lifecycle commands operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Exports file reloaded by the NFS connector
    #[default]
    Nfs,
    /// Samba registry shares
    Smb,
}

/// Settings of the exports tool; missing keys take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgmtConfig {
    /// Backend the commands operate on
    pub backend: Backend,
    /// Exports file rewritten by the NFS backend
    pub exports_file: PathBuf,
    /// NFS root export, or SOFS directory for the SMB backend
    pub root_export: String,
    /// NFS connector signalled after each exports change
    pub nfs_service: String,
    /// RPC helper the NFS connector depends on
    pub rpc_service: String,
    /// Samba daemon
    pub smb_service: String,
    /// Samba configuration file
    pub smb_conf: PathBuf,
    /// Permission bits of the exports file
    pub file_mode: u32,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Nfs,
            exports_file: PathBuf::from("/etc/exports.conf"),
            root_export: String::from("127.0.0.1:/"),
            nfs_service: String::from(DEFAULT_NFS_SERVICE),
            rpc_service: String::from(DEFAULT_RPC_SERVICE),
            smb_service: String::from(DEFAULT_SMB_SERVICE),
            smb_conf: PathBuf::from(DEFAULT_SMB_CONF),
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl MgmtConfig {
    /// Loads a `.toml` or `.json` file, chosen by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MgmtConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MgmtConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Loads `path` when given and present, the defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) if path.exists() => Self::from_file(path),
            Some(path) => {
                tracing::warn!("Config file not found, using defaults: {}", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }
}
