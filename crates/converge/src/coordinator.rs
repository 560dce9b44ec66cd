//! Run coordinator - the per-host convergence state machine
//!
//! `Init -> Probing -> Reconciling -> HandlerFlush -> Done`, with
//! `Failed` reachable from every non-terminal phase.

use crate::context::{CancelFlag, HostContext, ProgressCallback};
use crate::declaration::ResourceDeclaration;
use crate::error::Error;
use crate::handlers::{HandlerDispatcher, HandlerResult};
use crate::ledger::{ChangeLedger, ChangeRecord, LedgerSummary};
use crate::planner::RunPlan;
use crate::probe::{probe_all, probe_with_retry};
use crate::reconcile::{predict, reconcile_planned};
use crate::types::{Mode, ProbedState};
use chrono::{DateTime, Utc};
use remote::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Probing,
    Reconciling,
    HandlerFlush,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Probing => "probing",
            Self::Reconciling => "reconciling",
            Self::HandlerFlush => "handler flush",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
}

/// Options for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: Mode,
    /// Concurrent probes per host
    pub probe_jobs: usize,
    /// Backoff for transient probe failures
    pub retry: RetryConfig,
    /// Flush pending handlers even when the run failed
    pub force_handlers: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Apply,
            probe_jobs: 4,
            retry: RetryConfig::default(),
            force_handlers: false,
        }
    }
}

/// Everything a run produced, ready for display or serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub host: String,
    pub mode: Mode,
    pub status: RunStatus,
    pub summary: LedgerSummary,
    pub records: Vec<ChangeRecord>,
    pub handlers: Vec<HandlerResult>,
    /// Error that ended the run early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Process exit code: 0 for a clean `Done`, 1 for `Failed`, 2 for a
    /// run that finished with failed resources or handlers.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Failed => 1,
            RunStatus::Done if self.summary.failed > 0 || self.handler_failures() > 0 => 2,
            RunStatus::Done => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }

    pub fn handler_failures(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_failure()).count()
    }

    /// Records of resources that changed (or would change)
    pub fn changed(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().filter(|r| r.changed)
    }
}

/// Drives one host through a run.
pub struct Coordinator<'a> {
    host: HostContext<'a>,
    options: RunOptions,
    cancel: CancelFlag,
    phase: RunPhase,
}

impl<'a> Coordinator<'a> {
    pub fn new(host: HostContext<'a>, options: RunOptions) -> Self {
        Self {
            host,
            options,
            cancel: CancelFlag::new(),
            phase: RunPhase::Init,
        }
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, phase: RunPhase, progress: &mut dyn ProgressCallback) {
        log::debug!("[{}] {} -> {}", self.host.name, self.phase, phase);
        self.phase = phase;
        progress.on_phase(&self.host.name, phase);
    }

    /// Converge the host to `plan`.
    pub fn run(&mut self, plan: &RunPlan, progress: &mut dyn ProgressCallback) -> RunResult {
        let started_at = Utc::now();
        let mode = self.options.mode;
        let mut ledger = ChangeLedger::new();
        let mut dispatcher = HandlerDispatcher::new(plan.handlers.clone());

        self.phase = RunPhase::Init;
        progress.on_phase(&self.host.name, RunPhase::Init);

        let mut fatal = plan.validate().err();
        if fatal.is_none() {
            fatal = self.converge(plan, &mut ledger, &mut dispatcher, progress);
        }

        let mut handlers = Vec::new();
        if fatal.is_none() || self.options.force_handlers {
            self.transition(RunPhase::HandlerFlush, progress);
            handlers = dispatcher.flush(mode, &self.host);
            for result in &handlers {
                progress.on_handler_complete(&self.host.name, result);
            }
        } else if !dispatcher.pending().is_empty() {
            log::warn!(
                "[{}] Skipping handlers after failure: {}",
                self.host.name,
                dispatcher.pending().join(", ")
            );
        }

        if fatal.is_none() {
            fatal = handlers
                .iter()
                .find(|h| h.is_critical_failure())
                .and_then(|h| h.error.clone());
        }

        let status = if fatal.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Done
        };
        self.transition(
            match status {
                RunStatus::Done => RunPhase::Done,
                RunStatus::Failed => RunPhase::Failed,
            },
            progress,
        );

        RunResult {
            host: self.host.name.clone(),
            mode,
            status,
            summary: ledger.summary(),
            records: ledger.into_records(),
            handlers,
            error: fatal,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Probe and reconcile every declaration; returns the error that
    /// must end the run, if any.
    fn converge(
        &mut self,
        plan: &RunPlan,
        ledger: &mut ChangeLedger,
        dispatcher: &mut HandlerDispatcher,
        progress: &mut dyn ProgressCallback,
    ) -> Option<Error> {
        let mode = self.options.mode;
        let decls: Vec<_> = plan.declarations.iter().collect();

        self.transition(RunPhase::Probing, progress);
        let probes = match probe_all(&decls, &self.host, self.options.probe_jobs, &self.options.retry) {
            Ok(probes) => probes,
            Err(e) => return Some(e),
        };

        for (decl, probe) in decls.iter().zip(&probes) {
            if decl.required
                && let Err(e) = probe
            {
                log::warn!("[{}] Required resource {} could not be probed", self.host.name, decl.id);
                ledger.record(ChangeRecord::failed(&decl.id, decl.resource_type(), e.clone()));
                return Some(e.clone());
            }
        }

        self.transition(RunPhase::Reconciling, progress);

        // Apply: once anything changed the host, every later resource is
        // re-probed, since resources of other kinds can touch the same
        // files. Check: changed targets carry their predicted state.
        let mut host_changed = false;
        let mut predicted: HashMap<String, ProbedState> = HashMap::new();

        for (decl, probed) in decls.into_iter().zip(probes) {
            if self.cancel.is_cancelled() {
                log::warn!("[{}] Run cancelled before {}", self.host.name, decl.id);
                return Some(Error::Cancelled {
                    resource: decl.id.clone(),
                });
            }

            if let Some(prerequisite) = decl.requires.iter().find(|p| !ledger.succeeded(p)) {
                let err = Error::PrerequisiteUnmet {
                    resource: decl.id.clone(),
                    prerequisite: prerequisite.clone(),
                };
                log::warn!("[{}] {}", self.host.name, err);
                let record = ChangeRecord::failed(&decl.id, decl.resource_type(), err.clone());
                progress.on_resource_complete(&self.host.name, &record);
                ledger.record(record);
                return Some(err);
            }

            let resource = decl.resource();
            let target = resource.target();
            progress.on_resource_start(&self.host.name, &decl.id, &resource.description());

            let state = match (mode, predicted.get(&target)) {
                (Mode::Check, Some(next)) => Ok(next.clone()),
                (Mode::Apply, _) if host_changed => probe_with_retry(decl, &self.host, &self.options.retry),
                _ => probed,
            };

            let mut record = match state {
                Err(e) => ChangeRecord::failed(&decl.id, decl.resource_type(), e),
                Ok(state) => {
                    let (result, steps) = reconcile_planned(decl, &state, mode, &self.host);
                    match mode {
                        // A failed step may have run part of its actions
                        Mode::Apply => host_changed |= result.changed || result.error.is_some(),
                        Mode::Check => {
                            if result.changed
                                && let Some(next) = predict(&state, &steps)
                            {
                                predicted.insert(target, next);
                            }
                        }
                    }
                    ChangeRecord::from_result(&decl.id, decl.resource_type(), result)
                }
            };

            notify_handlers(dispatcher, decl, &mut record, &self.host.name);

            let error = record.error.clone();
            progress.on_resource_complete(&self.host.name, &record);
            ledger.record(record);

            if let Some(e) = error
                && (decl.required || e.kind().is_fatal())
            {
                return Some(e);
            }
        }

        None
    }
}

/// Queue the handlers a changed resource notifies. An unknown handler
/// name is recorded on the resource unless it already failed.
fn notify_handlers(
    dispatcher: &mut HandlerDispatcher,
    decl: &ResourceDeclaration,
    record: &mut ChangeRecord,
    host: &str,
) {
    if !record.changed {
        return;
    }
    for name in &decl.notify {
        if let Err(e) = dispatcher.notify(name) {
            log::warn!("[{}] {}: {}", host, decl.id, e);
            record.error.get_or_insert(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CommandValidator, DEFAULT_TIMEOUT, NoProgress, Platform};
    use crate::declaration::{CommandSpec, FileSpec, LineSpec, ResourceDeclaration, ResourceKind};
    use crate::error::ErrorKind;
    use crate::handlers::{HandlerDefinition, HandlerStatus};
    use crate::types::ReconcileResult;
    use remote::{CommandOutput, Executor, LocalExecutor, RemoteCommand};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Local executor that records every script, can fail the first
    /// few calls as unreachable and can time out scripts containing a
    /// given text.
    struct RecordingExecutor {
        inner: LocalExecutor,
        scripts: Mutex<Vec<String>>,
        unreachable_calls: AtomicUsize,
        timeout_on: Option<String>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                inner: LocalExecutor::with_label("web1"),
                scripts: Mutex::new(Vec::new()),
                unreachable_calls: AtomicUsize::new(0),
                timeout_on: None,
            }
        }

        fn flaky(calls: usize) -> Self {
            let exec = Self::new();
            exec.unreachable_calls.store(calls, Ordering::SeqCst);
            exec
        }

        fn timing_out(needle: &str) -> Self {
            Self {
                timeout_on: Some(needle.to_string()),
                ..Self::new()
            }
        }

        fn ran(&self, needle: &str) -> bool {
            self.scripts.lock().unwrap().iter().any(|s| s.contains(needle))
        }
    }

    impl Executor for RecordingExecutor {
        fn host(&self) -> &str {
            self.inner.host()
        }

        fn execute(&self, command: &RemoteCommand, timeout: Duration) -> remote::Result<CommandOutput> {
            let remaining = self.unreachable_calls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.unreachable_calls.store(remaining - 1, Ordering::SeqCst);
                return Err(remote::Error::Unreachable {
                    host: "web1".to_string(),
                    message: "Connection refused".to_string(),
                });
            }
            self.scripts.lock().unwrap().push(command.script.clone());
            if let Some(needle) = &self.timeout_on
                && command.script.contains(needle.as_str())
            {
                return Err(remote::Error::Timeout {
                    command: command.script.clone(),
                    timeout,
                });
            }
            self.inner.execute(command, timeout)
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1), 1.0)
    }

    fn run_plan(exec: &RecordingExecutor, plan: &RunPlan, mode: Mode) -> RunResult {
        run_with(exec, plan, mode, false, CancelFlag::new())
    }

    fn run_with(
        exec: &RecordingExecutor,
        plan: &RunPlan,
        mode: Mode,
        force_handlers: bool,
        cancel: CancelFlag,
    ) -> RunResult {
        let platform = Platform::default();
        let host = HostContext::new(exec, &CommandValidator, &platform, DEFAULT_TIMEOUT);
        let options = RunOptions {
            mode,
            probe_jobs: 2,
            retry: fast_retry(),
            force_handlers,
        };
        let mut coordinator = Coordinator::new(host, options).with_cancel(cancel);
        let result = coordinator.run(plan, &mut NoProgress);
        assert!(coordinator.phase().is_terminal());
        result
    }

    fn p(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    fn sshd_line(id: &str, path: &Path, line: &str, regexp: &str) -> ResourceDeclaration {
        ResourceDeclaration::new(
            id,
            ResourceKind::Line(LineSpec::new(p(path), line).with_regexp(regexp)),
        )
    }

    #[test]
    fn test_etc_hosts_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        std::fs::write(&hosts, "127.0.0.1 old\n").unwrap();

        let plan = RunPlan::new(
            vec![ResourceDeclaration::file("hosts", p(&hosts), "127.0.0.1 host\n")],
            vec![],
        );
        let exec = RecordingExecutor::new();

        let first = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(first.status, RunStatus::Done);
        assert_eq!(first.summary.changed, 1);
        assert!(first.records[0].changed);
        assert_eq!(std::fs::read_to_string(&hosts).unwrap(), "127.0.0.1 host\n");
        assert_eq!(first.exit_code(), 0);

        let second = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(second.summary.changed, 0);
        assert!(!second.records[0].changed);
        assert_eq!(second.exit_code(), 0);
    }

    #[test]
    fn test_restart_handler_fires_once() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("sshd_config");
        let restarts = dir.path().join("restarts");
        std::fs::write(&conf, "PasswordAuthentication yes\nPermitRootLogin yes\n").unwrap();

        let plan = RunPlan::new(
            vec![
                sshd_line("password", &conf, "PasswordAuthentication no", "^PasswordAuthentication")
                    .notify("restart-sshd"),
                sshd_line("root", &conf, "PermitRootLogin no", "^PermitRootLogin").notify("restart-sshd"),
            ],
            vec![HandlerDefinition::new(
                "restart-sshd",
                format!("echo restarted >> {}", restarts.display()),
            )],
        );
        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Apply);

        assert_eq!(result.summary.changed, 2);
        assert_eq!(result.handlers.len(), 1);
        assert_eq!(result.handlers[0].status, HandlerStatus::Fired);
        assert_eq!(std::fs::read_to_string(&restarts).unwrap(), "restarted\n");

        // Second resource re-probed the file, so both edits survive
        assert_eq!(
            std::fs::read_to_string(&conf).unwrap(),
            "PasswordAuthentication no\nPermitRootLogin no\n"
        );

        let rerun = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(rerun.summary.changed, 0);
        assert!(rerun.handlers.is_empty());
    }

    #[test]
    fn test_command_output_survives_later_line_edit() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("app.conf");

        let plan = RunPlan::new(
            vec![
                ResourceDeclaration::new(
                    "seed",
                    ResourceKind::Command(CommandSpec {
                        run: format!("printf 'a=1\\nb=2\\n' > {}", conf.display()),
                        creates: Some(p(&conf)),
                        unless: None,
                    }),
                ),
                ResourceDeclaration::line("c", p(&conf), "c=3"),
            ],
            vec![],
        );
        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Apply);

        assert_eq!(result.status, RunStatus::Done);
        assert_eq!(result.summary.changed, 2);
        // The line resource sees what the command wrote, not the stale absent file
        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "a=1\nb=2\nc=3\n");

        let rerun = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(rerun.summary.changed, 0);
    }

    #[test]
    fn test_timeout_during_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("app.conf");
        let other = dir.path().join("other.conf");
        std::fs::write(&conf, "old\n").unwrap();

        let plan = RunPlan::new(
            vec![
                ResourceDeclaration::file("conf", p(&conf), "new\n"),
                ResourceDeclaration::file("other", p(&other), "x\n"),
            ],
            vec![],
        );
        let exec = RecordingExecutor::timing_out("mv -f --");
        let result = run_plan(&exec, &plan, Mode::Apply);

        let record = &result.records[0];
        assert!(!record.changed);
        assert_eq!(record.error.as_ref().map(Error::kind), Some(ErrorKind::Timeout));
        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "old\n");
        // The staged copy is discarded
        assert!(!dir.path().join(".app.conf.hostform-staged").exists());

        // Not required, so the run continues and reports the failure
        assert_eq!(result.records[1].error.as_ref().map(Error::kind), Some(ErrorKind::Timeout));
        assert!(!other.exists());
        assert_eq!(result.summary.failed, 2);
        assert_eq!(result.status, RunStatus::Done);
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn test_unknown_handler_recorded_on_resource() {
        let mut dispatcher = HandlerDispatcher::new(vec![HandlerDefinition::new("reload", "true")]);
        let decl = ResourceDeclaration::file("conf", "/tmp/conf", "x\n")
            .notify("reload")
            .notify("ghost");
        let changed = ReconcileResult {
            changed: true,
            changes: vec!["create /tmp/conf".to_string()],
            diff: None,
            error: None,
        };

        let mut record = ChangeRecord::from_result("conf", "file", changed.clone());
        notify_handlers(&mut dispatcher, &decl, &mut record, "web1");
        assert_eq!(record.error.as_ref().map(Error::kind), Some(ErrorKind::InvalidDeclaration));
        assert_eq!(dispatcher.pending(), vec!["reload"]);

        // An earlier failure is kept
        let mut record = ChangeRecord::from_result(
            "conf",
            "file",
            ReconcileResult {
                error: Some(Error::invalid("conf", "first")),
                ..changed
            },
        );
        notify_handlers(&mut dispatcher, &decl, &mut record, "web1");
        assert!(record.error.as_ref().is_some_and(|e| e.to_string().contains("first")));
    }

    #[test]
    fn test_prerequisite_failure_blocks_dependent() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("sshd_config");
        std::fs::write(&conf, "PasswordAuthentication yes\n").unwrap();
        let key = dir.path().join("missing-dir").join("authorized_keys");

        let plan = RunPlan::new(
            vec![
                ResourceDeclaration::file("authorized-key", p(&key), "ssh-ed25519 AAAA\n"),
                sshd_line("no-password", &conf, "PasswordAuthentication no", "^PasswordAuthentication")
                    .requires("authorized-key"),
            ],
            vec![],
        );
        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Apply);

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.as_ref().map(Error::kind), Some(ErrorKind::PrerequisiteUnmet));
        assert_eq!(result.summary.failed, 2);
        assert_eq!(
            std::fs::read_to_string(&conf).unwrap(),
            "PasswordAuthentication yes\n"
        );
        assert!(!exec.ran(".sshd_config.hostform-staged"));
        assert_ne!(result.exit_code(), 0);
    }

    #[test]
    fn test_check_mode_predicts_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("app.conf");
        let fired = dir.path().join("fired");
        std::fs::write(&conf, "a=1\n").unwrap();

        let plan = RunPlan::new(
            vec![
                ResourceDeclaration::line("b", p(&conf), "b=2").notify("reload"),
                ResourceDeclaration::line("c", p(&conf), "c=3").notify("reload"),
                ResourceDeclaration::line("b-again", p(&conf), "b=2"),
            ],
            vec![HandlerDefinition::new("reload", format!("touch {}", fired.display()))],
        );
        let exec = RecordingExecutor::new();
        let check = run_plan(&exec, &plan, Mode::Check);

        assert_eq!(check.status, RunStatus::Done);
        let changed: Vec<bool> = check.records.iter().map(|r| r.changed).collect();
        assert_eq!(changed, vec![true, true, false]);
        assert_eq!(
            check.records[1].diff.as_ref().map(|d| d.after.as_str()),
            Some("a=1\nb=2\nc=3\n")
        );
        assert_eq!(check.handlers[0].status, HandlerStatus::WouldFire);
        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "a=1\n");
        assert!(!fired.exists());
        assert!(!exec.ran("mv -f"));

        let apply = run_plan(&exec, &plan, Mode::Apply);
        let applied: Vec<bool> = apply.records.iter().map(|r| r.changed).collect();
        assert_eq!(applied, changed);
        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "a=1\nb=2\nc=3\n");
        assert!(fired.exists());
    }

    #[test]
    fn test_required_failure_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let later = dir.path().join("later");
        let broken = ResourceDeclaration::new(
            "broken",
            ResourceKind::Command(CommandSpec {
                run: "exit 3".to_string(),
                creates: None,
                unless: Some("false".to_string()),
            }),
        );

        let plan = RunPlan::new(
            vec![broken.clone().required(), ResourceDeclaration::file("later", p(&later), "x")],
            vec![],
        );
        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.records.len(), 1);
        assert!(!later.exists());

        // Not required: recorded, run continues, non-zero exit
        let plan = RunPlan::new(
            vec![broken, ResourceDeclaration::file("later", p(&later), "x")],
            vec![],
        );
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(result.status, RunStatus::Done);
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.changed, 1);
        assert!(later.exists());
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn test_validation_failure_keeps_live_file_and_skips_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("sshd_config");
        let fired = dir.path().join("fired");
        std::fs::write(&conf, "Port 22\n").unwrap();

        let decl = ResourceDeclaration::new(
            "sshd",
            ResourceKind::File(FileSpec::new(p(&conf), "Port abc\n").with_validate("grep -q '^Port [0-9]' %s")),
        )
        .notify("restart");
        let plan = RunPlan::new(
            vec![decl],
            vec![HandlerDefinition::new("restart", format!("touch {}", fired.display()))],
        );

        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "Port 22\n");
        assert!(!result.records[0].changed);
        assert_eq!(
            result.records[0].error.as_ref().map(Error::kind),
            Some(ErrorKind::ValidationFailed)
        );
        assert!(result.handlers.is_empty());
        assert!(!fired.exists());
    }

    #[test]
    fn test_failed_run_skips_handlers_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("conf");
        let fired = dir.path().join("fired");
        let bad = ResourceDeclaration::new(
            "bad",
            ResourceKind::Command(CommandSpec {
                run: "exit 1".to_string(),
                creates: None,
                unless: Some("false".to_string()),
            }),
        )
        .required();

        let plan = RunPlan::new(
            vec![ResourceDeclaration::file("conf", p(&conf), "x\n").notify("reload"), bad],
            vec![HandlerDefinition::new("reload", format!("touch {}", fired.display()))],
        );
        let exec = RecordingExecutor::new();

        let result = run_with(&exec, &plan, Mode::Apply, false, CancelFlag::new());
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.handlers.is_empty());
        assert!(!fired.exists());

        std::fs::remove_file(&conf).unwrap();
        let result = run_with(&exec, &plan, Mode::Apply, true, CancelFlag::new());
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.handlers.len(), 1);
        assert!(fired.exists());
    }

    #[test]
    fn test_critical_handler_failure_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("conf");
        let plan = RunPlan::new(
            vec![ResourceDeclaration::file("conf", p(&conf), "x\n").notify("reload")],
            vec![HandlerDefinition::new("reload", "exit 1").critical()],
        );
        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.as_ref().map(Error::kind), Some(ErrorKind::HandlerExecution));

        // The same failure on a non-critical handler leaves the run Done
        std::fs::remove_file(&conf).unwrap();
        let plan = RunPlan::new(
            plan.declarations.clone(),
            vec![HandlerDefinition::new("reload", "exit 1")],
        );
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(result.status, RunStatus::Done);
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn test_invalid_plan_fails_before_probing() {
        let plan = RunPlan::new(
            vec![ResourceDeclaration::new(
                "unguarded",
                ResourceKind::Command(CommandSpec {
                    run: "make install".to_string(),
                    creates: None,
                    unless: None,
                }),
            )],
            vec![],
        );
        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.as_ref().map(Error::kind), Some(ErrorKind::InvalidDeclaration));
        assert!(result.records.is_empty());
        assert!(exec.scripts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_run() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let plan = RunPlan::new(vec![ResourceDeclaration::file("f", p(&file), "x")], vec![]);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let exec = RecordingExecutor::new();
        let result = run_with(&exec, &plan, Mode::Apply, false, cancel);

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.as_ref().map(Error::kind), Some(ErrorKind::Cancelled));
        assert!(!file.exists());
    }

    #[test]
    fn test_transient_probe_failure_retried() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let plan = RunPlan::new(vec![ResourceDeclaration::file("f", p(&file), "x").required()], vec![]);

        let exec = RecordingExecutor::flaky(2);
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(result.status, RunStatus::Done, "{:?}", result.error);
        assert!(file.exists());

        let exec = RecordingExecutor::flaky(10);
        let result = run_plan(&exec, &plan, Mode::Apply);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.as_ref().map(Error::kind), Some(ErrorKind::Unreachable));
    }

    #[test]
    fn test_run_result_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let plan = RunPlan::new(
            vec![ResourceDeclaration::file("f", p(&dir.path().join("f")), "x")],
            vec![],
        );
        let exec = RecordingExecutor::new();
        let result = run_plan(&exec, &plan, Mode::Check);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "done");
        assert_eq!(json["mode"], "check");
        assert_eq!(json["summary"]["changed"], 1);
        assert_eq!(json["records"][0]["diff"]["after"], "x");
    }
}
