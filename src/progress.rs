//! Progress display for convergence runs.
//!
//! One bar covers every resource on every selected host; each host's
//! coordinator reports into it through its own [`HostProgress`].

use colored::Colorize;
use converge::{ChangeRecord, HandlerResult, HandlerStatus, ProgressCallback, RunPhase};
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Shared bar over `total` resources; hidden when `visible` is false.
pub fn run_bar(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    match ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        Ok(style) => pb.set_style(style.progress_chars("=>-")),
        Err(e) => log::debug!("Progress template rejected: {e}"),
    }
    pb
}

/// Per-host reporter into the shared bar
pub struct HostProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl HostProgress {
    pub fn new(bar: ProgressBar, verbose: bool) -> Self {
        Self { bar, verbose }
    }
}

impl ProgressCallback for HostProgress {
    fn on_phase(&mut self, host: &str, phase: RunPhase) {
        log::info!("[{host}] {phase}");
        if phase == RunPhase::Failed {
            self.bar
                .suspend(|| println!("  {} {} run failed", "✗".red(), host.bold()));
        }
    }

    fn on_resource_start(&mut self, host: &str, id: &str, description: &str) {
        self.bar.set_message(format!("{host}: {id}"));
        log::debug!("[{host}] {id}: {description}");
    }

    fn on_resource_complete(&mut self, host: &str, record: &ChangeRecord) {
        self.bar.inc(1);
        if let Some(error) = &record.error {
            self.bar.suspend(|| {
                println!("  {} {}: {} ({})", "✗".red(), host, record.resource, error);
            });
        } else if self.verbose && record.changed {
            self.bar.suspend(|| {
                println!("  {} {}: {}", "~".yellow(), host, record.resource);
            });
        }
    }

    fn on_handler_complete(&mut self, host: &str, result: &HandlerResult) {
        if result.status == HandlerStatus::Failed {
            let detail = result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            self.bar.suspend(|| {
                println!("  {} {}: handler {} failed {}", "✗".red(), host, result.name, detail.dimmed());
            });
        }
    }
}
