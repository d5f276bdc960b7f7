//! Configuration documents rendered for database and proxy pods
//!
//! Rendering runs once in an init container before the server process
//! starts; the reconciler never calls into this module.

pub mod ini;
pub mod mycnf;
pub mod nested;
pub mod proxysql;

use std::fs;
use std::path::Path;

use tracing::info;

pub use ini::{IniDocument, Section};
pub use mycnf::{ordinal_from_hostname, render_mycnf, MyCnfParams};
pub use nested::{Block, NestedDocument};
pub use proxysql::{render_proxysql, ProxySqlParams, ProxyUser};

use crate::error::Result;

/// Write a rendered document to `path`, creating parent directories.
///
/// The file is written beside its destination and renamed into place so a
/// reader never sees a partial config.
pub fn write_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    fs::write(&staging, contents)?;
    fs::rename(&staging, path)?;

    info!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}
