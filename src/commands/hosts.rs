//! `hostform hosts` - list declared hosts

use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_config(ctx)?;

    if config.hosts.is_empty() {
        ui::warn("No [[hosts]] declared");
        return Ok(());
    }

    ui::header("Hosts");
    for host in &config.hosts {
        let resources = config.resources_for(host).count();
        println!(
            "  {:<20} {:<32} {}",
            host.name.bold(),
            host.connection(),
            ui::plural(resources, "resource").dimmed()
        );
    }
    Ok(())
}
