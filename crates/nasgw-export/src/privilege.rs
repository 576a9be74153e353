//! Effective uid/gid management.
//!
//! The tool runs with real uid 0 but drops its effective identity to an
//! unprivileged user right after start-up. Operations touching the mounted
//! root or the exports file re-acquire root through a [`PrivilegeGuard`],
//! which restores the previous effective ids when it goes out of scope.

use std::ffi::CString;
use std::io;

use tracing::{debug, error};

use crate::error::{ExportError, Result};

/// Unprivileged user the tool runs as between privileged scopes.
pub const UNPRIVILEGED_USER: &str = "nobody";

/// Group candidates for the unprivileged identity, in order of preference.
pub const UNPRIVILEGED_GROUPS: &[&str] = &["nogroup", "nobody"];

/// Scoped root privileges; dropping the guard restores the previous ids.
#[derive(Debug)]
pub struct PrivilegeGuard {
    previous: Option<(libc::uid_t, libc::gid_t)>,
}

impl PrivilegeGuard {
    /// Switches the effective uid and gid to root.
    pub fn acquire() -> Result<Self> {
        // SAFETY: geteuid/getegid have no preconditions.
        let (previous_uid, previous_gid) = unsafe { (libc::geteuid(), libc::getegid()) };

        debug!("Elevating privileges");
        // SAFETY: plain syscalls, failures are reported through errno.
        if unsafe { libc::seteuid(0) } != 0 {
            return Err(privilege_error("seteuid(0)"));
        }
        if unsafe { libc::setegid(0) } != 0 {
            let err = privilege_error("setegid(0)");
            unsafe {
                libc::setegid(previous_gid);
                libc::seteuid(previous_uid);
            }
            return Err(err);
        }

        Ok(Self {
            previous: Some((previous_uid, previous_gid)),
        })
    }

    /// A guard that changes nothing, for hosts where privileges are managed
    /// externally.
    pub fn unprivileged() -> Self {
        Self { previous: None }
    }

    /// Whether dropping the guard restores a previous identity.
    pub fn is_elevated(&self) -> bool {
        self.previous.is_some()
    }
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        let Some((uid, gid)) = self.previous.take() else {
            return;
        };

        debug!("Dropping elevated privileges");
        // gid first: once euid is no longer root setegid would be refused.
        // SAFETY: plain syscalls, failures are reported through errno.
        if unsafe { libc::setegid(gid) } != 0 {
            error!(
                "Unable to restore effective gid {}: {}",
                gid,
                io::Error::last_os_error()
            );
        }
        if unsafe { libc::seteuid(uid) } != 0 {
            error!(
                "Unable to restore effective uid {}: {}",
                uid,
                io::Error::last_os_error()
            );
        }
    }
}

fn privilege_error(call: &str) -> ExportError {
    ExportError::Privilege {
        reason: format!("{} failed: {}", call, io::Error::last_os_error()),
    }
}

/// Whether the process was started by the superuser.
pub fn is_superuser() -> bool {
    // SAFETY: getuid has no preconditions.
    unsafe { libc::getuid() == 0 }
}

fn lookup_user(name: &str) -> Option<(String, libc::uid_t)> {
    let c_name = CString::new(name).ok()?;
    // SAFETY: the returned record is only read before the next getpw* call.
    let entry = unsafe { libc::getpwnam(c_name.as_ptr()) };
    if entry.is_null() {
        return None;
    }
    Some((name.to_string(), unsafe { (*entry).pw_uid }))
}

fn lookup_group(name: &str) -> Option<(String, libc::gid_t)> {
    let c_name = CString::new(name).ok()?;
    // SAFETY: the returned record is only read before the next getgr* call.
    let entry = unsafe { libc::getgrnam(c_name.as_ptr()) };
    if entry.is_null() {
        return None;
    }
    Some((name.to_string(), unsafe { (*entry).gr_gid }))
}

/// Drops the effective identity to `nobody` and the first existing group
/// among [`UNPRIVILEGED_GROUPS`].
pub fn drop_privileges() -> Result<()> {
    let user = lookup_user(UNPRIVILEGED_USER);
    let group = UNPRIVILEGED_GROUPS.iter().find_map(|name| lookup_group(name));

    let ((user_name, uid), (group_name, gid)) = match (user, group) {
        (Some(user), Some(group)) => (user, group),
        _ => {
            let reason = "Unable to find an unprivileged user/group".to_string();
            error!("{}", reason);
            return Err(ExportError::Privilege { reason });
        }
    };

    debug!("Dropping privileges to {}:{}", user_name, group_name);
    // SAFETY: plain syscalls, failures are reported through errno.
    let previous_gid = unsafe { libc::getegid() };
    if unsafe { libc::setegid(gid) } != 0 {
        return Err(privilege_error("setegid"));
    }
    if unsafe { libc::seteuid(uid) } != 0 {
        let err = privilege_error("seteuid");
        error!("Unable to drop effective uid");
        if unsafe { libc::setegid(previous_gid) } != 0 {
            error!(
                "Unable to restore effective gid: {}",
                io::Error::last_os_error()
            );
        }
        return Err(err);
    }

    Ok(())
}
