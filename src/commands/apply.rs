//! `hostform apply` and `hostform check`

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use converge::{CancelFlag, Mode, RunResult};
use std::sync::OnceLock;

use crate::Context;
use crate::cli::{ApplyArgs, OutputFormat, RunArgs};
use crate::config::Config;
use crate::engine::{self, ExecuteOptions, HostJob};
use crate::secrets::ConfiguredSecrets;
use crate::ui;

/// Predict changes on every selected host.
pub fn check(ctx: &Context, args: &RunArgs) -> Result<()> {
    let config = super::load_config(ctx)?;
    let jobs = plan_jobs(&config, args)?;
    let cancel = interrupt_flag()?;
    let results = execute(ctx, &config, &jobs, args, Mode::Check, &cancel)?;
    report(args, &results)?;
    finish(&results)
}

/// Converge every selected host, confirming first unless `--yes`.
pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    if args.check {
        return check(ctx, &args.run);
    }
    if args.run.format == OutputFormat::Json && !args.yes {
        bail!("--format json needs --yes for apply (no interactive confirmation)");
    }

    let config = super::load_config(ctx)?;
    let jobs = plan_jobs(&config, &args.run)?;
    let cancel = interrupt_flag()?;

    if !args.yes {
        let preview = execute(ctx, &config, &jobs, &args.run, Mode::Check, &cancel)?;
        if cancel.is_cancelled() {
            bail!("Interrupted");
        }
        engine::display_report(&preview, args.run.diff);

        if !engine::differ::has_changes(&preview) {
            println!();
            println!("  {} No changes needed", "✓".green());
            return finish(&preview);
        }
        if preview.iter().any(|r| !r.is_success()) {
            ui::warn("Some resources failed to probe; apply may fail the same way");
        }
        if !confirm_proceed()? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    let results = execute(ctx, &config, &jobs, &args.run, Mode::Apply, &cancel)?;
    report(&args.run, &results)?;
    finish(&results)
}

fn plan_jobs<'a>(config: &'a Config, args: &RunArgs) -> Result<Vec<HostJob<'a>>> {
    let hosts = config.select_hosts(&args.hosts)?;
    let secrets = ConfiguredSecrets::new(config.secrets.command.clone(), config.settings.timeout());
    engine::build_jobs(config, &hosts, args.only.as_deref(), &secrets)
}

fn execute(
    ctx: &Context,
    config: &Config,
    jobs: &[HostJob<'_>],
    args: &RunArgs,
    mode: Mode,
    cancel: &CancelFlag,
) -> Result<Vec<RunResult>> {
    let settings = &config.settings;
    let opts = ExecuteOptions {
        mode,
        host_jobs: args.jobs.unwrap_or(settings.host_jobs),
        probe_jobs: settings.probe_jobs,
        retry: settings.retry(),
        timeout: settings.timeout(),
        force_handlers: args.force_handlers || settings.force_handlers,
        show_progress: !ctx.quiet && args.format == OutputFormat::Text,
        verbose: ctx.verbose > 0,
    };
    engine::execute(jobs, &config.platform, &opts, cancel)
}

/// Flag raised by Ctrl-C. Runs stop before their next resource; a second
/// Ctrl-C exits at once.
fn interrupt_flag() -> Result<CancelFlag> {
    static INTERRUPT: OnceLock<CancelFlag> = OnceLock::new();

    if let Some(flag) = INTERRUPT.get() {
        return Ok(flag.clone());
    }
    let flag = CancelFlag::new();
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        if handler_flag.is_cancelled() {
            std::process::exit(130);
        }
        handler_flag.cancel();
        eprintln!("Interrupted, stopping after the current resources (Ctrl-C again to abort)");
    })
    .context("Failed to set signal handler")?;
    Ok(INTERRUPT.get_or_init(|| flag).clone())
}

fn report(args: &RunArgs, results: &[RunResult]) -> Result<()> {
    match args.format {
        OutputFormat::Text => engine::display_report(results, args.diff),
        OutputFormat::Json => println!("{}", engine::to_json(results)?),
    }
    Ok(())
}

/// Fail the process when any host did not finish cleanly.
fn finish(results: &[RunResult]) -> Result<()> {
    let unclean: Vec<&str> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.host.as_str())
        .collect();
    if unclean.is_empty() {
        return Ok(());
    }
    bail!(
        "{} did not converge cleanly: {}",
        ui::plural(unclean.len(), "host"),
        unclean.join(", ")
    )
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use converge::{LedgerSummary, RunStatus};

    fn result(host: &str, status: RunStatus, failed: usize) -> RunResult {
        RunResult {
            host: host.to_string(),
            mode: Mode::Apply,
            status,
            summary: LedgerSummary {
                total: 2,
                changed: 0,
                failed,
            },
            records: Vec::new(),
            handlers: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_finish() {
        assert!(finish(&[result("a", RunStatus::Done, 0)]).is_ok());

        let err = finish(&[
            result("a", RunStatus::Done, 0),
            result("b", RunStatus::Done, 1),
            result("c", RunStatus::Failed, 0),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "2 hosts did not converge cleanly: b, c");
    }

    #[test]
    fn test_interrupt_flag_shared_across_runs() {
        // Installing twice would fail inside ctrlc; the second call reuses the flag
        let preview = interrupt_flag().unwrap();
        let apply = interrupt_flag().unwrap();
        assert!(!apply.is_cancelled());

        preview.cancel();
        assert!(apply.is_cancelled());
    }
}
