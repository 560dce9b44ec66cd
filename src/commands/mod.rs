//! Subcommand implementations

pub mod apply;
pub mod hosts;
pub mod validate;

use anyhow::Result;

use crate::Context;
use crate::config::Config;
use crate::paths;

/// Load the declaration file named on the command line or the default one.
pub fn load_config(ctx: &Context) -> Result<Config> {
    let path = paths::config_file(ctx.config.as_deref())?;
    Config::load(&path)
}
