//! # Converge
//!
//! Idempotent convergence of one host to a declared desired state.
//!
//! This crate provides the engine behind hostform: probing current
//! state, reconciling it to the declared state, and firing deferred
//! handlers once per run when something actually changed.
//!
//! ## Core Concepts
//!
//! - **ResourceDeclaration**: one desired-state statement (file, line,
//!   package, service, guarded command)
//! - **ProbedState**: a per-run, read-only snapshot of a resource's target
//! - **Reconciler**: plans the minimal steps and, in apply mode, executes
//!   them; file content goes through stage/validate/promote
//! - **ChangeLedger**: append-only record of what changed in a run
//! - **HandlerDispatcher**: deduplicated, deferred change triggers
//! - **Coordinator**: the `Init -> Probing -> Reconciling -> HandlerFlush`
//!   state machine for one host
//!
//! ## Example
//!
//! ```no_run
//! use converge::{
//!     CommandValidator, Coordinator, HandlerDefinition, HostContext, Mode, NoProgress,
//!     Platform, ResourceDeclaration, RunOptions, RunPlan, DEFAULT_TIMEOUT,
//! };
//! use remote::LocalExecutor;
//!
//! let plan = RunPlan::new(
//!     vec![
//!         ResourceDeclaration::file("hosts", "/etc/hosts", "127.0.0.1 localhost\n"),
//!         ResourceDeclaration::line("sshd", "/etc/ssh/sshd_config", "PermitRootLogin no")
//!             .notify("restart-sshd"),
//!     ],
//!     vec![HandlerDefinition::new("restart-sshd", "systemctl restart sshd")],
//! );
//!
//! let exec = LocalExecutor::new();
//! let platform = Platform::default();
//! let host = HostContext::new(&exec, &CommandValidator, &platform, DEFAULT_TIMEOUT);
//! let options = RunOptions { mode: Mode::Check, ..Default::default() };
//!
//! let result = Coordinator::new(host, options).run(&plan, &mut NoProgress);
//! std::process::exit(result.exit_code());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Validator`]: checks staged content before promotion
//! - [`SecretResolver`]: turns secret references into plaintext
//! - [`ProgressCallback`]: receives progress updates
//!
//! The execution channel itself is the [`remote::Executor`] trait.

pub mod context;
pub mod coordinator;
pub mod declaration;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod planner;
pub mod probe;
pub mod reconcile;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{
    CancelFlag, CommandValidator, DEFAULT_TIMEOUT, HostContext, NoProgress, NoSecrets,
    PackageCommands, Platform, ProgressCallback, SecretResolver, ServiceCommands, Validator,
    Verdict,
};
pub use coordinator::{Coordinator, RunOptions, RunPhase, RunResult, RunStatus};
pub use declaration::{
    CommandSpec, FileSpec, LineSpec, PackageSpec, ResourceDeclaration, ResourceKind, ServiceSpec,
};
pub use error::{Error, ErrorKind, Result};
pub use handlers::{HandlerDefinition, HandlerDispatcher, HandlerResult, HandlerStatus};
pub use ledger::{ChangeLedger, ChangeRecord, LedgerSummary};
pub use planner::RunPlan;
pub use probe::{probe, probe_all, probe_with_retry};
pub use reconcile::{predict, reconcile, staging_path};
pub use resource::{Action, Resource, Step};
pub use types::{ContentDiff, Ensure, Mode, ProbedState, ReconcileResult, digest};
