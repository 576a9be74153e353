#![warn(missing_docs)]

//! NAS gateway exports management: configuration and command line.

pub mod cli;
pub mod config;

pub use cli::{build_backend, exit_code, Cli, Command};
pub use config::{Backend, MgmtConfig};
