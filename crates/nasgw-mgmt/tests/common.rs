//! Shared fixtures for the command dispatch tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use nasgw_export::{HostOps, NfsBackend, PrivilegeGuard, Result, RootMount, Verified};
use tempfile::TempDir;

/// Host whose root export, binaries and services live in a scratch directory.
pub struct TestHost {
    pub root: PathBuf,
    pub bin: PathBuf,
    pub running: Vec<String>,
    pub signals: RefCell<Vec<(i32, i32)>>,
}

impl HostOps for TestHost {
    fn elevate(&self) -> Result<PrivilegeGuard> {
        Ok(PrivilegeGuard::unprivileged())
    }

    fn mount_root(&self, _root_export: &str) -> Result<RootMount> {
        Ok(RootMount::existing(&self.root))
    }

    fn find_pids(&self, process: &str) -> Result<Vec<i32>> {
        Ok(self
            .running
            .iter()
            .position(|name| name == process)
            .map(|i| vec![100 + i as i32])
            .unwrap_or_default())
    }

    fn send_signal(&self, pid: i32, signal: i32) -> Result<()> {
        self.signals.borrow_mut().push((pid, signal));
        Ok(())
    }

    fn search_path(&self) -> Vec<PathBuf> {
        vec![self.bin.clone()]
    }

    fn mounts(&self) -> Result<String> {
        Ok(String::new())
    }
}

pub struct TestGateway {
    pub dir: TempDir,
    pub backend: Verified<NfsBackend<TestHost>>,
}

impl TestGateway {
    /// A gateway with `sfused` and `rpcbind` installed and running.
    pub fn new() -> Self {
        Self::with_running(&["sfused", "rpcbind"])
    }

    pub fn with_running(running: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let bin = dir.path().join("bin");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&bin).unwrap();
        for binary in ["sfused", "rpcbind"] {
            fs::write(bin.join(binary), "").unwrap();
        }
        let exports_file = dir.path().join("exports.conf");
        fs::write(&exports_file, "").unwrap();

        let host = TestHost {
            root,
            bin,
            running: running.iter().map(|s| s.to_string()).collect(),
            signals: RefCell::new(Vec::new()),
        };
        let backend = Verified::new(NfsBackend::new("127.0.0.1:/", exports_file, host));
        Self { dir, backend }
    }

    pub fn exports_file(&self) -> &Path {
        self.backend.inner().exports_file()
    }

    pub fn exports(&self) -> String {
        fs::read_to_string(self.exports_file()).unwrap()
    }

    pub fn root(&self) -> &Path {
        &self.backend.inner().host().root
    }
}
