//! `nasgw-exports` command line: global flags, subcommands and dispatch to
//! an export backend.

use crate::config::{Backend, MgmtConfig};
use clap::{Parser, Subcommand};
use nasgw_export::{
    ExportBackend, ExportError, LinuxHost, NfsBackend, SmbBackend, SystemRunner, Verified,
};
use std::path::PathBuf;

/// Global flags and the subcommand to run.
#[derive(Parser, Debug)]
#[command(name = "nasgw-exports", version)]
#[command(about = "Manage NFS and SMB exports of a NAS gateway", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, env = "NASGW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Exports file rewritten by the NFS backend
    #[arg(long)]
    pub exports_file: Option<PathBuf>,

    /// Root export holding one directory per export
    #[arg(long)]
    pub root_export: Option<String>,

    /// Export backend to operate on
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Log at debug level
    #[arg(short, long)]
    pub debug: bool,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

/// Export lifecycle operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Prepare an export without granting any access
    Create {
        /// Name of the export directory
        export_name: String,
    },
    /// Remove an export that has no grants left
    Wipe {
        /// Name of the export directory
        export_name: String,
    },
    /// Grant a host access to an export
    Grant {
        /// Name of the export directory
        export_name: String,
        /// Host, network or wildcard pattern to allow
        host: String,
        /// Export options, e.g. `rw no_root_squash`
        options: Vec<String>,
    },
    /// Revoke the access of a host
    Revoke {
        /// Name of the export directory
        export_name: String,
        /// Host to revoke
        host: String,
    },
    /// Print the clients of an export as JSON
    Get {
        /// Name of the export directory
        export_name: String,
    },
    /// Check binaries and services the backend relies on
    Check,
}

impl Cli {
    /// Applies the command-line overrides on top of the loaded configuration.
    pub fn resolve_config(&self) -> anyhow::Result<MgmtConfig> {
        let mut config = MgmtConfig::load(self.config.as_deref())?;
        if let Some(exports_file) = &self.exports_file {
            config.exports_file = exports_file.clone();
        }
        if let Some(root_export) = &self.root_export {
            config.root_export = root_export.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        Ok(config)
    }
}

impl Command {
    /// Subcommand name as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Wipe { .. } => "wipe",
            Command::Grant { .. } => "grant",
            Command::Revoke { .. } => "revoke",
            Command::Get { .. } => "get",
            Command::Check => "check",
        }
    }

    /// Renders the invocation as `name(arg, ...)` for logging.
    pub fn describe(&self) -> String {
        let args: Vec<String> = match self {
            Command::Create { export_name }
            | Command::Wipe { export_name }
            | Command::Get { export_name } => vec![format!("{:?}", export_name)],
            Command::Grant {
                export_name,
                host,
                options,
            } => vec![
                format!("{:?}", export_name),
                format!("{:?}", host),
                format!("{:?}", options),
            ],
            Command::Revoke { export_name, host } => {
                vec![format!("{:?}", export_name), format!("{:?}", host)]
            }
            Command::Check => Vec::new(),
        };
        format!("{}({})", self.name(), args.join(", "))
    }

    /// Dispatches to the backend, returning what should go to stdout.
    pub fn execute(&self, backend: &dyn ExportBackend) -> nasgw_export::Result<Option<String>> {
        match self {
            Command::Create { export_name } => backend.add_export(export_name).map(|_| None),
            Command::Wipe { export_name } => backend.wipe_export(export_name).map(|_| None),
            Command::Grant {
                export_name,
                host,
                options,
            } => backend
                .grant_access(export_name, host, options)
                .map(|_| None),
            Command::Revoke { export_name, host } => {
                backend.revoke_access(export_name, host).map(|_| None)
            }
            Command::Get { export_name } => backend.get_export(export_name).map(Some),
            Command::Check => backend.verify_environment().map(|_| None),
        }
    }
}

/// Production backend for `config`, running the environment checks first.
pub fn build_backend(config: &MgmtConfig) -> Box<dyn ExportBackend> {
    match config.backend {
        Backend::Nfs => Box::new(Verified::new(
            NfsBackend::new(
                config.root_export.clone(),
                config.exports_file.clone(),
                LinuxHost::new(),
            )
            .with_services(&config.nfs_service, &config.rpc_service)
            .with_file_mode(config.file_mode),
        )),
        Backend::Smb => Box::new(Verified::new(
            SmbBackend::new(config.root_export.clone(), LinuxHost::new(), SystemRunner)
                .with_smb_conf(config.smb_conf.clone())
                .with_services(&config.smb_service, &config.nfs_service),
        )),
    }
}

/// Process exit code for a failure reaching `main`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ExportError>()
        .map(ExportError::exit_code)
        .unwrap_or(1)
}
