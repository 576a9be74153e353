//! Error types for NAS gateway export management

use thiserror::Error;

/// Exit code: export point or export directory not found
pub const EXIT_EXPORT_NOT_FOUND: i32 = 10;
/// Exit code: client already granted on the export point
pub const EXIT_CLIENT_EXISTS: i32 = 11;
/// Exit code: client has no grant on the export point
pub const EXIT_CLIENT_NOT_FOUND: i32 = 12;
/// Exit code: export still has client grants
pub const EXIT_EXPORT_HAS_GRANTS: i32 = 13;
/// Exit code: invalid export name
pub const EXIT_INVALID_NAME: i32 = 14;
/// Exit code: export already defined
pub const EXIT_EXPORT_ALREADY_EXISTS: i32 = 15;
/// Exit code: required binary, process or file missing
pub const EXIT_ENVIRONMENT: i32 = 16;
/// Exit code: malformed exports file
pub const EXIT_DESERIALIZATION: i32 = 17;
/// Exit code: export without clients
pub const EXIT_NO_CLIENTS: i32 = 18;
/// Exit code: host or export option outside the exports line grammar
pub const EXIT_INVALID_CLIENT: i32 = 19;
/// Exit code: any other failure
pub const EXIT_FAILURE: i32 = 1;

/// Errors raised while loading, mutating or committing exports.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A line or client token of the exports file could not be parsed
    #[error("Deserialization error: {reason}")]
    Deserialization {
        /// What was malformed
        reason: String,
    },
    /// A required binary, process or file is missing
    #[error("Environment error: {reason}")]
    Environment {
        /// Which check failed
        reason: String,
    },
    /// The export point or its directory does not exist
    #[error("Export not found: {reason}")]
    ExportNotFound {
        /// Which export was looked up
        reason: String,
    },
    /// The export is already defined
    #[error("Export already exists: {reason}")]
    ExportAlreadyExists {
        /// Which export was defined twice
        reason: String,
    },
    /// The host is already granted on the export point
    #[error("Client exists: {reason}")]
    ClientExists {
        /// Which host was granted twice
        reason: String,
    },
    /// The host has no grant on the export point
    #[error("Client not found: {reason}")]
    ClientNotFound {
        /// Which host was revoked
        reason: String,
    },
    /// The export still has client grants and cannot be wiped
    #[error("Export has grants: {reason}")]
    ExportHasGrants {
        /// Which export still has grants
        reason: String,
    },
    /// The export name is empty or contains a path separator
    #[error("Invalid export name: {name:?}")]
    InvalidName {
        /// The rejected name
        name: String,
    },
    /// A host or export option that cannot be written to an exports line
    #[error("Invalid client: {reason}")]
    InvalidClient {
        /// The rejected host or option
        reason: String,
    },
    /// An export was built without any client
    #[error("Export '{export_point}' must have at least one client")]
    NoClients {
        /// The export point without clients
        export_point: String,
    },
    /// Changing the effective uid or gid failed
    #[error("Privilege error: {reason}")]
    Privilege {
        /// The failed transition
        reason: String,
    },
    /// An external command exited unsuccessfully
    #[error("Command failed: {reason} (stdout={stdout:?}, stderr={stderr:?})")]
    Command {
        /// The command and its exit status
        reason: String,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },
    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Converts the error to a stable process exit code for scripted callers.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExportError::ExportNotFound { .. } => EXIT_EXPORT_NOT_FOUND,
            ExportError::ClientExists { .. } => EXIT_CLIENT_EXISTS,
            ExportError::ClientNotFound { .. } => EXIT_CLIENT_NOT_FOUND,
            ExportError::ExportHasGrants { .. } => EXIT_EXPORT_HAS_GRANTS,
            ExportError::InvalidName { .. } => EXIT_INVALID_NAME,
            ExportError::ExportAlreadyExists { .. } => EXIT_EXPORT_ALREADY_EXISTS,
            ExportError::Environment { .. } => EXIT_ENVIRONMENT,
            ExportError::Deserialization { .. } => EXIT_DESERIALIZATION,
            ExportError::NoClients { .. } => EXIT_NO_CLIENTS,
            ExportError::InvalidClient { .. } => EXIT_INVALID_CLIENT,
            ExportError::Privilege { .. }
            | ExportError::Command { .. }
            | ExportError::Json(_)
            | ExportError::Io(_) => EXIT_FAILURE,
        }
    }
}

/// Result type alias using ExportError as the error type.
pub type Result<T> = std::result::Result<T, ExportError>;
