//! Path resolution for hostform
//!
//! # Environment Variables
//!
//! - `HOSTFORM_CONFIG` - Declaration file (also accepted as `--config`)
//! - `HOSTFORM_CONFIG_DIR` - Directory holding `hostform.toml`
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` / `HOSTFORM_CONFIG`
//! 2. `config_dir()/hostform.toml`
//!
//! For config_dir():
//! 1. `HOSTFORM_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/hostform` (if set)
//! 3. `~/.config/hostform`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "HOSTFORM_CONFIG_DIR";

/// Default declaration file name
pub const CONFIG_FILE: &str = "hostform.toml";

/// Get the hostform config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("hostform");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("hostform");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Resolve the declaration file, preferring an explicit path.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join(CONFIG_FILE)),
    }
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}
