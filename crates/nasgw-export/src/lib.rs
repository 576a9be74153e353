#![warn(missing_docs)]

//! NAS gateway subsystem: export table model, reexport protocol, NFS and SMB
//! export backends

pub mod backend;
pub mod error;
pub mod export;
pub mod host;
pub mod nfs;
pub mod persist;
pub mod privilege;
pub mod smb;
pub mod table;

pub use backend::{validate_export_name, ExportBackend, Verified};
pub use error::{ExportError, Result};
pub use export::{validate_client, ClientOptions, Clients, Export};
pub use host::{HostOps, LinuxHost, RootMount};
pub use nfs::NfsBackend;
pub use privilege::PrivilegeGuard;
pub use smb::{CommandRunner, SmbBackend, SystemRunner};
pub use table::ExportTable;
