//! `hostform validate` - check every host plan without touching a host

use anyhow::{Result, bail};
use colored::Colorize;

use crate::Context;
use crate::config::Config;
use crate::secrets::PlaceholderSecrets;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_config(ctx)?;
    let problems = validate(&config);

    for (host, outcome) in &problems {
        match outcome {
            Ok(count) if !ctx.quiet => {
                println!("  {} {:<20} {}", "✓".green(), host, ui::plural(*count, "resource").dimmed());
            }
            Ok(_) => {}
            Err(e) => println!("  {} {:<20} {}", "✗".red(), host, e.red()),
        }
    }

    let failed = problems.iter().filter(|(_, o)| o.is_err()).count();
    if failed > 0 {
        bail!("{} failed validation", ui::plural(failed, "host"));
    }
    if !ctx.quiet {
        println!();
        ui::success(&format!(
            "{} valid, {}",
            ui::plural(config.hosts.len(), "host"),
            ui::plural(config.handlers.len(), "handler")
        ));
    }
    Ok(())
}

/// Per-host outcome: resource count or the first problem found.
fn validate(config: &Config) -> Vec<(String, Result<usize, String>)> {
    config
        .hosts
        .iter()
        .map(|host| {
            let outcome = config
                .plan_for(host, &PlaceholderSecrets)
                .and_then(|hp| {
                    hp.plan.validate()?;
                    Ok(hp.plan.len())
                })
                .map_err(|e| format!("{e:#}"));
            (host.name.clone(), outcome)
        })
        .collect()
}
