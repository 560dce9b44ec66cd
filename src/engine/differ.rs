//! Run report rendering - text and JSON

use anyhow::Result;
use colored::Colorize;
use converge::{ChangeRecord, ContentDiff, HandlerStatus, LedgerSummary, RunResult, RunStatus};
use serde::Serialize;

use crate::ui;

/// Summary over every host
pub fn total_summary(results: &[RunResult]) -> LedgerSummary {
    let mut total = LedgerSummary::default();
    for result in results {
        total.merge(&result.summary);
    }
    total
}

/// Whether any host has something to change
pub fn has_changes(results: &[RunResult]) -> bool {
    results.iter().any(|r| r.summary.changed > 0)
}

/// Print every host's ledger; `show_diff` adds content diffs.
pub fn display_report(results: &[RunResult], show_diff: bool) {
    for result in results {
        display_host(result, show_diff);
    }

    let total = total_summary(results);
    let verb = if results.first().is_some_and(|r| r.mode.is_check()) {
        "would change"
    } else {
        "changed"
    };
    println!();
    println!(
        "  {} {}, {} {}, {} unchanged, {} failed",
        "Summary:".bold(),
        ui::plural(results.len(), "host"),
        total.changed.to_string().yellow(),
        verb,
        total.unchanged(),
        if total.failed > 0 {
            total.failed.to_string().red()
        } else {
            total.failed.to_string().normal()
        }
    );
}

fn display_host(result: &RunResult, show_diff: bool) {
    let elapsed = (result.finished_at - result.started_at).num_milliseconds().max(0);
    let status = match result.status {
        RunStatus::Failed => "failed".red(),
        RunStatus::Done if result.exit_code() == 0 => "done".green(),
        RunStatus::Done => "done with failures".yellow(),
    };

    println!();
    println!(
        "┌─ {} ({}) {} {}",
        result.host.bold(),
        result.mode,
        status,
        ui::format_duration_ms(elapsed).dimmed()
    );

    for record in &result.records {
        display_record(record, show_diff);
    }

    if !result.handlers.is_empty() {
        println!("│ {}", "Handlers".bold());
        for handler in &result.handlers {
            let (symbol, label) = match handler.status {
                HandlerStatus::Fired => ("↻".green(), "fired"),
                HandlerStatus::WouldFire => ("↻".yellow(), "would fire"),
                HandlerStatus::Failed => ("✗".red(), "failed"),
            };
            let critical = if handler.critical { " [critical]".red().to_string() } else { String::new() };
            println!("│   {} {:<30} {}{}", symbol, handler.name, label.dimmed(), critical);
            if let Some(error) = &handler.error {
                println!("│       {}", error.to_string().red());
            }
        }
    }

    if let Some(error) = &result.error {
        println!("│ {} {}", "✗".red(), error);
    }
    println!(
        "└─ {} changed, {} unchanged, {} failed",
        result.summary.changed,
        result.summary.unchanged(),
        result.summary.failed
    );
}

fn display_record(record: &ChangeRecord, show_diff: bool) {
    if let Some(error) = &record.error {
        println!("│   {} {:<30} {}", "✗".red(), record.resource, error.to_string().red());
        return;
    }
    if !record.changed {
        log::debug!("{} unchanged", record.resource);
        return;
    }
    println!("│   {} {:<30} {}", "~".yellow(), record.resource, record.kind.dimmed());
    for change in &record.changes {
        println!("│       • {change}");
    }
    if show_diff && let Some(diff) = &record.diff {
        print_diff(diff);
    }
}

/// Unified diff of one file's content
pub fn print_diff(diff: &ContentDiff) {
    for line in unified_lines(diff) {
        if line.starts_with("---") || line.starts_with("+++") {
            println!("│       {}", line.bold());
        } else if line.starts_with("@@") {
            println!("│       {}", line.cyan());
        } else if line.starts_with('-') {
            println!("│       {}", line.red());
        } else if line.starts_with('+') {
            println!("│       {}", line.green());
        } else {
            println!("│       {}", line.dimmed());
        }
    }
}

fn unified_lines(diff: &ContentDiff) -> Vec<String> {
    let text = similar::TextDiff::from_lines(&diff.before, &diff.after);
    text.unified_diff()
        .context_radius(3)
        .header(&diff.path, &diff.path)
        .to_string()
        .lines()
        .map(str::to_string)
        .collect()
}

#[derive(Serialize)]
struct Report<'a> {
    summary: LedgerSummary,
    hosts: &'a [RunResult],
}

/// Machine-readable report over every host
pub fn to_json(results: &[RunResult]) -> Result<String> {
    let report = Report {
        summary: total_summary(results),
        hosts: results,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}
