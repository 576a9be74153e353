//! The export lifecycle contract shared by the NFS and SMB backends.

use crate::error::{ExportError, Result};

/// Lifecycle operations every export backend provides.
pub trait ExportBackend {
    /// Preliminary checks for installed binaries and running services.
    fn verify_environment(&self) -> Result<()>;
    /// Prepares an export without any access grants.
    fn add_export(&self, export_name: &str) -> Result<()>;
    /// Removes an export, leaving its data behind under a tombstone name.
    fn wipe_export(&self, export_name: &str) -> Result<()>;
    /// Grants `host` access to an existing export.
    fn grant_access(&self, export_name: &str, host: &str, options: &[String]) -> Result<()>;
    /// Revokes the access of `host` to an export.
    fn revoke_access(&self, export_name: &str, host: &str) -> Result<()>;
    /// Client details of an export as a JSON object `{host: [options]}`.
    fn get_export(&self, export_name: &str) -> Result<String>;
}

/// Wrapper running the environment checks before every lifecycle operation.
#[derive(Debug)]
pub struct Verified<B> {
    inner: B,
}

impl<B: ExportBackend> Verified<B> {
    /// Wraps `inner`.
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn verified<T>(&self, op: impl FnOnce(&B) -> Result<T>) -> Result<T> {
        self.inner.verify_environment()?;
        op(&self.inner)
    }
}

impl<B: ExportBackend> ExportBackend for Verified<B> {
    fn verify_environment(&self) -> Result<()> {
        self.inner.verify_environment()
    }

    fn add_export(&self, export_name: &str) -> Result<()> {
        self.verified(|b| b.add_export(export_name))
    }

    fn wipe_export(&self, export_name: &str) -> Result<()> {
        self.verified(|b| b.wipe_export(export_name))
    }

    fn grant_access(&self, export_name: &str, host: &str, options: &[String]) -> Result<()> {
        self.verified(|b| b.grant_access(export_name, host, options))
    }

    fn revoke_access(&self, export_name: &str, host: &str) -> Result<()> {
        self.verified(|b| b.revoke_access(export_name, host))
    }

    fn get_export(&self, export_name: &str) -> Result<String> {
        self.verified(|b| b.get_export(export_name))
    }
}

impl<B: ExportBackend + ?Sized> ExportBackend for Box<B> {
    fn verify_environment(&self) -> Result<()> {
        (**self).verify_environment()
    }

    fn add_export(&self, export_name: &str) -> Result<()> {
        (**self).add_export(export_name)
    }

    fn wipe_export(&self, export_name: &str) -> Result<()> {
        (**self).wipe_export(export_name)
    }

    fn grant_access(&self, export_name: &str, host: &str, options: &[String]) -> Result<()> {
        (**self).grant_access(export_name, host, options)
    }

    fn revoke_access(&self, export_name: &str, host: &str) -> Result<()> {
        (**self).revoke_access(export_name, host)
    }

    fn get_export(&self, export_name: &str) -> Result<String> {
        (**self).get_export(export_name)
    }
}

/// Rejects names that are not a single directory entry under the root export
/// or that would not survive a round trip through the exports file: empty,
/// `.`, `..`, or containing `/`, `#` or whitespace.
pub fn validate_export_name(export_name: &str) -> Result<()> {
    if matches!(export_name, "" | "." | "..")
        || export_name.contains(['/', '#'])
        || export_name.chars().any(char::is_whitespace)
    {
        return Err(ExportError::InvalidName {
            name: export_name.to_string(),
        });
    }
    Ok(())
}
