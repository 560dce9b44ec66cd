//! Prober - read-only state detection, retried on transient failures

use crate::context::HostContext;
use crate::declaration::ResourceDeclaration;
use crate::error::{Error, Result};
use crate::types::ProbedState;
use rayon::prelude::*;
use remote::{LogCallback, RetryConfig, with_retry};

/// Probe one resource once.
///
/// Never mutates the host; calling it any number of times leaves the
/// host unchanged.
pub fn probe(decl: &ResourceDeclaration, host: &HostContext<'_>) -> Result<ProbedState> {
    decl.resource().probe(&decl.id, host)
}

/// Probe one resource, retrying transient failures with backoff.
pub fn probe_with_retry(
    decl: &ResourceDeclaration,
    host: &HostContext<'_>,
    retry: &RetryConfig,
) -> Result<ProbedState> {
    with_retry(retry, Some(&LogCallback), || probe(decl, host))
}

/// Probe many resources concurrently on a pool of `jobs` threads.
///
/// Results come back in the order of `decls`; each entry carries its own
/// error so one unreachable target does not hide the others.
pub fn probe_all(
    decls: &[&ResourceDeclaration],
    host: &HostContext<'_>,
    jobs: usize,
    retry: &RetryConfig,
) -> Result<Vec<Result<ProbedState>>> {
    if jobs <= 1 || decls.len() <= 1 {
        return Ok(decls
            .iter()
            .map(|decl| probe_with_retry(decl, host, retry))
            .collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| Error::Unreachable {
            resource: host.name.clone(),
            detail: format!("failed to create probe pool: {e}"),
        })?;

    Ok(pool.install(|| {
        decls
            .par_iter()
            .map(|decl| probe_with_retry(decl, host, retry))
            .collect()
    }))
}
