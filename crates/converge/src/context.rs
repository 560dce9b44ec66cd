//! Host context and provider traits
//!
//! These traits let the engine run without depending on a particular
//! validator, secret store or progress display. The CLI supplies real
//! implementations; tests supply fakes.

use crate::coordinator::RunPhase;
use crate::error::{Error, Result};
use crate::handlers::HandlerResult;
use crate::ledger::ChangeRecord;
use remote::{CommandOutput, Executor, RemoteCommand, shell};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default deadline for every remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a resource needs to observe or change one host.
pub struct HostContext<'a> {
    /// Host label used in logs and reports
    pub name: String,
    /// Execution channel to the host
    pub executor: &'a dyn Executor,
    /// Checks staged content before promotion
    pub validator: &'a dyn Validator,
    /// Package and service command templates
    pub platform: &'a Platform,
    /// Deadline applied to every remote call
    pub timeout: Duration,
}

impl<'a> HostContext<'a> {
    /// Create a context; the host label comes from the executor.
    pub fn new(
        executor: &'a dyn Executor,
        validator: &'a dyn Validator,
        platform: &'a Platform,
        timeout: Duration,
    ) -> Self {
        Self {
            name: executor.host().to_string(),
            executor,
            validator,
            platform,
            timeout,
        }
    }

    /// Run a command, attributing transport failures to `resource`.
    pub fn run(&self, resource: &str, operation: &str, command: RemoteCommand) -> Result<CommandOutput> {
        log::debug!("[{}] {}: {}", self.name, resource, command.script);
        self.executor
            .execute(&command, self.timeout)
            .map_err(|e| Error::from_remote(resource, operation, e))
    }

    /// Run a script and return its output, whatever the exit status.
    pub fn run_script(&self, resource: &str, operation: &str, script: &str) -> Result<CommandOutput> {
        self.run(resource, operation, RemoteCommand::new(script))
    }

    /// Run a script that must succeed.
    pub fn run_checked(&self, resource: &str, command: RemoteCommand) -> Result<CommandOutput> {
        let script = command.script.clone();
        let output = self.run(resource, "apply", command)?;
        if !output.success() {
            return Err(Error::from_failed_command(
                resource,
                &script,
                &failure_detail(&output),
            ));
        }
        Ok(output)
    }
}

/// Best description of why a command failed.
pub(crate) fn failure_detail(output: &CommandOutput) -> String {
    let stderr = output.stderr_str();
    if !stderr.trim().is_empty() {
        return stderr.trim().to_string();
    }
    let stdout = output.stdout_str();
    if !stdout.trim().is_empty() {
        return stdout.trim().to_string();
    }
    match output.exit_code {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    }
}

/// Package manager command templates; `%s` is the package argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageCommands {
    /// Prints the installed version, empty or non-zero when not installed
    pub query: String,
    pub install: String,
    pub remove: String,
    /// Joins name and version for pinned installs (`name=1.2`)
    pub version_separator: String,
}

impl Default for PackageCommands {
    fn default() -> Self {
        Self {
            // Only `ii` counts; `rc` (removed, config kept) still has a version
            query: "dpkg-query -W -f='${db:Status-Abbrev} ${Version}\\n' %s 2>/dev/null \
                    | awk '$1 == \"ii\" { print $2 }'"
                .to_string(),
            install: "DEBIAN_FRONTEND=noninteractive apt-get install -y -q %s".to_string(),
            remove: "DEBIAN_FRONTEND=noninteractive apt-get remove -y -q %s".to_string(),
            version_separator: "=".to_string(),
        }
    }
}

/// Service manager command templates; `%s` is the unit name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceCommands {
    pub is_enabled: String,
    pub is_active: String,
    pub enable: String,
    pub disable: String,
    pub start: String,
    pub stop: String,
}

impl Default for ServiceCommands {
    fn default() -> Self {
        Self {
            is_enabled: "systemctl is-enabled --quiet %s".to_string(),
            is_active: "systemctl is-active --quiet %s".to_string(),
            enable: "systemctl enable %s".to_string(),
            disable: "systemctl disable %s".to_string(),
            start: "systemctl start %s".to_string(),
            stop: "systemctl stop %s".to_string(),
        }
    }
}

/// OS-specific command templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Platform {
    pub packages: PackageCommands,
    pub services: ServiceCommands,
}

/// Answer from a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(String),
}

/// Checks staged content before it replaces the live file.
///
/// Implement this trait to plug in kind-specific validation.
pub trait Validator: Send + Sync {
    /// Validate the file at `staged_path` with the declaration's template.
    fn validate(
        &self,
        host: &HostContext<'_>,
        resource: &str,
        template: &str,
        staged_path: &str,
    ) -> Result<Verdict>;
}

/// Runs the template on the host; exit status 0 accepts.
pub struct CommandValidator;

impl Validator for CommandValidator {
    fn validate(
        &self,
        host: &HostContext<'_>,
        resource: &str,
        template: &str,
        staged_path: &str,
    ) -> Result<Verdict> {
        let script = shell::fill_template(template, staged_path);
        let output = host.run_script(resource, "validate", &script)?;
        if output.success() {
            Ok(Verdict::Accepted)
        } else {
            Ok(Verdict::Rejected(failure_detail(&output)))
        }
    }
}

/// Resolves secret references to plaintext.
///
/// The decryption mechanism is up to the implementation.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String>;
}

/// Resolver for runs that declare no secrets.
pub struct NoSecrets;

impl SecretResolver for NoSecrets {
    fn resolve(&self, reference: &str) -> Result<String> {
        Err(Error::Secret {
            reference: reference.to_string(),
            detail: "no secret resolver configured".to_string(),
        })
    }
}

/// Progress callback for convergence runs
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback: Send {
    /// Called on every state machine transition
    fn on_phase(&mut self, host: &str, phase: RunPhase);

    /// Called before a resource is reconciled
    fn on_resource_start(&mut self, host: &str, id: &str, description: &str);

    /// Called after a resource's outcome is recorded
    fn on_resource_complete(&mut self, host: &str, record: &ChangeRecord);

    /// Called after each handler runs (or would run)
    fn on_handler_complete(&mut self, host: &str, result: &HandlerResult);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_phase(&mut self, _host: &str, _phase: RunPhase) {}
    fn on_resource_start(&mut self, _host: &str, _id: &str, _description: &str) {}
    fn on_resource_complete(&mut self, _host: &str, _record: &ChangeRecord) {}
    fn on_handler_complete(&mut self, _host: &str, _result: &HandlerResult) {}
}

/// Cooperative cancellation, checked between resources.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
