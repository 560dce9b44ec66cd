//! Execution engine - converges selected hosts in parallel

use anyhow::{Context as AnyhowContext, Result};
use converge::{
    CancelFlag, CommandValidator, Coordinator, HostContext, Mode, Platform, RunOptions, RunResult,
};
use rayon::prelude::*;
use remote::RetryConfig;
use std::collections::HashSet;
use std::time::Duration;

use super::planner::HostJob;
use crate::progress::{self, HostProgress};

/// Options for one invocation across all hosts
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub mode: Mode,
    /// Hosts converged concurrently
    pub host_jobs: usize,
    /// Concurrent probes per host
    pub probe_jobs: usize,
    pub retry: RetryConfig,
    /// Deadline for each remote call
    pub timeout: Duration,
    pub force_handlers: bool,
    /// Draw the progress bar
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Apply,
            host_jobs: 4,
            probe_jobs: 4,
            retry: RetryConfig::default(),
            timeout: converge::DEFAULT_TIMEOUT,
            force_handlers: false,
            show_progress: true,
            verbose: false,
        }
    }
}

/// Converge every job; results come back in job order.
pub fn execute(
    jobs: &[HostJob<'_>],
    platform: &Platform,
    opts: &ExecuteOptions,
    cancel: &CancelFlag,
) -> Result<Vec<RunResult>> {
    let total: usize = jobs.iter().map(|j| j.plan.len()).sum();
    let bar = progress::run_bar(total as u64, opts.show_progress);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.host_jobs.max(1))
        .build()
        .context("Failed to create host thread pool")?;

    let results = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                let mut reporter = HostProgress::new(bar.clone(), opts.verbose);
                converge_host(job, platform, opts, cancel, &mut reporter)
            })
            .collect::<Vec<_>>()
    });

    bar.finish_and_clear();
    Ok(results)
}

fn converge_host(
    job: &HostJob<'_>,
    platform: &Platform,
    opts: &ExecuteOptions,
    cancel: &CancelFlag,
    reporter: &mut HostProgress,
) -> RunResult {
    let executor = job.host.executor();
    let host = HostContext::new(executor.as_ref(), &CommandValidator, platform, opts.timeout);
    let options = RunOptions {
        mode: opts.mode,
        probe_jobs: opts.probe_jobs,
        retry: opts.retry.clone(),
        force_handlers: opts.force_handlers,
    };

    log::info!("Converging {} ({}) in {} mode", job.host.name, job.host.connection(), opts.mode);
    let mut result = Coordinator::new(host, options)
        .with_cancel(cancel.clone())
        .run(&job.plan, reporter);
    redact(&mut result, &job.sensitive);
    result
}

/// Drop content diffs of secret-backed resources.
pub(crate) fn redact(result: &mut RunResult, sensitive: &HashSet<String>) {
    for record in &mut result.records {
        if sensitive.contains(&record.resource) {
            record.diff = None;
        }
    }
}
