//! Resource reconciler
//!
//! Turns a probed state into a plan and, in apply mode, executes it.
//! File content never changes in place: new content is staged next to
//! the live file, given its final mode and owner, validated, and only
//! then renamed over the live path.

use crate::context::{HostContext, Verdict};
use crate::declaration::ResourceDeclaration;
use crate::error::{Error, Result};
use crate::resource::{Action, Step};
use crate::types::{ContentDiff, Mode, ProbedState, ReconcileResult};
use remote::RemoteCommand;
use remote::shell::quote;

/// Suffix of the staging file written next to a managed file.
pub const STAGING_SUFFIX: &str = "hostform-staged";

/// Staging location for `path`: a hidden sibling in the same directory,
/// so promotion is a same-filesystem rename.
pub fn staging_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/.{name}.{STAGING_SUFFIX}"),
        None => format!(".{path}.{STAGING_SUFFIX}"),
    }
}

/// Reconcile one resource against its probed state.
pub fn reconcile(
    decl: &ResourceDeclaration,
    state: &ProbedState,
    mode: Mode,
    host: &HostContext<'_>,
) -> ReconcileResult {
    reconcile_planned(decl, state, mode, host).0
}

/// Reconcile and also return the planned steps.
pub(crate) fn reconcile_planned(
    decl: &ResourceDeclaration,
    state: &ProbedState,
    mode: Mode,
    host: &HostContext<'_>,
) -> (ReconcileResult, Vec<Step>) {
    let steps = match decl.resource().plan(&decl.id, state, host) {
        Ok(steps) => steps,
        Err(e) => return (ReconcileResult::failed(e), Vec::new()),
    };
    if steps.is_empty() {
        log::debug!("[{}] {} converged", host.name, decl.id);
        return (ReconcileResult::unchanged(), steps);
    }

    let diff = content_diff(&steps);

    if mode.is_check() {
        return (
            ReconcileResult {
                changed: true,
                changes: steps.iter().map(|s| s.description.clone()).collect(),
                diff,
                error: None,
            },
            steps,
        );
    }

    let mut result = ReconcileResult::default();
    for step in &steps {
        match execute_step(&decl.id, step, host) {
            Ok(()) => {
                log::info!("[{}] {}: {}", host.name, decl.id, step.description);
                result.changed = true;
                result.changes.push(step.description.clone());
            }
            Err(e) => {
                log::warn!("[{}] {}: {}", host.name, decl.id, e);
                result.error = Some(e);
                break;
            }
        }
    }
    if result.changed {
        result.diff = diff.filter(|_| result.error.is_none());
    }
    (result, steps)
}

/// State the target would be in after `steps`, for file targets.
///
/// Lets check mode chain several resources that edit the same file.
pub fn predict(state: &ProbedState, steps: &[Step]) -> Option<ProbedState> {
    let ProbedState::File { content, mode } = state else {
        return None;
    };
    let (mut content, mut mode) = (content.clone(), *mode);
    for step in steps {
        match &step.action {
            Action::WriteFile {
                content: new,
                mode: new_mode,
                ..
            } => {
                content = Some(new.clone());
                mode = Some(*new_mode);
            }
            Action::Chmod { mode: new_mode, .. } => mode = Some(*new_mode),
            Action::RemoveFile { .. } => {
                content = None;
                mode = None;
            }
            Action::Run { .. } => return None,
        }
    }
    Some(ProbedState::File { content, mode })
}

fn content_diff(steps: &[Step]) -> Option<ContentDiff> {
    steps.iter().find_map(|step| match &step.action {
        Action::WriteFile {
            path,
            content,
            before,
            ..
        } => Some(ContentDiff {
            path: path.clone(),
            before: before
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default(),
            after: String::from_utf8_lossy(content).into_owned(),
        }),
        _ => None,
    })
}

fn execute_step(id: &str, step: &Step, host: &HostContext<'_>) -> Result<()> {
    match &step.action {
        Action::WriteFile {
            path,
            content,
            mode,
            validate,
            ..
        } => write_file(id, path, content, *mode, validate.as_deref(), host),
        Action::Chmod { path, mode } => {
            let script = format!("chmod {mode:o} -- {}", quote(path));
            host.run_checked(id, RemoteCommand::new(script)).map(|_| ())
        }
        Action::RemoveFile { path } => {
            let script = format!("rm -f -- {}", quote(path));
            host.run_checked(id, RemoteCommand::new(script)).map(|_| ())
        }
        Action::Run { script } => host
            .run_checked(id, RemoteCommand::new(script.as_str()))
            .map(|_| ()),
    }
}

/// Stage, validate and promote new file content.
fn write_file(
    id: &str,
    path: &str,
    content: &[u8],
    mode: u32,
    validate: Option<&str>,
    host: &HostContext<'_>,
) -> Result<()> {
    let staged = staging_path(path);
    let (p, s) = (quote(path), quote(&staged));

    // Owner is copied only when the live file exists; failure to chown
    // (unprivileged runs) keeps the connecting user's ownership.
    let upload = format!(
        "umask 077 && cat > {s} && chmod {mode:o} {s} && \
         {{ [ ! -e {p} ] || chown --reference={p} {s} 2>/dev/null || true; }}"
    );
    let staged_ok = host
        .run_checked(id, RemoteCommand::new(upload).with_stdin(content))
        .and_then(|_| match validate {
            Some(template) => match host.validator.validate(host, id, template, &staged)? {
                Verdict::Accepted => Ok(()),
                Verdict::Rejected(detail) => Err(Error::ValidationFailed {
                    resource: id.to_string(),
                    detail,
                }),
            },
            None => Ok(()),
        })
        .and_then(|()| {
            host.run_checked(id, RemoteCommand::new(format!("mv -f -- {s} {p}")))
                .map(|_| ())
        });

    if staged_ok.is_err() {
        discard_staged(id, &staged, host);
    }
    staged_ok
}

fn discard_staged(id: &str, staged: &str, host: &HostContext<'_>) {
    let script = format!("rm -f -- {}", quote(staged));
    if let Err(e) = host.run_script(id, "cleanup", &script) {
        log::warn!("[{}] {}: could not remove {}: {}", host.name, id, staged, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CommandValidator, DEFAULT_TIMEOUT, Platform};
    use crate::declaration::{FileSpec, LineSpec, ResourceKind};
    use crate::probe::probe;
    use remote::LocalExecutor;
    use std::os::unix::fs::PermissionsExt;

    struct Fixture {
        exec: LocalExecutor,
        platform: Platform,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                exec: LocalExecutor::new(),
                platform: Platform::default(),
            }
        }

        fn host(&self) -> HostContext<'_> {
            HostContext::new(&self.exec, &CommandValidator, &self.platform, DEFAULT_TIMEOUT)
        }
    }

    fn run(decl: &ResourceDeclaration, mode: Mode, host: &HostContext<'_>) -> ReconcileResult {
        let state = probe(decl, host).unwrap();
        reconcile(decl, &state, mode, host)
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(staging_path("/etc/hosts"), "/etc/.hosts.hostform-staged");
        assert_eq!(staging_path("/hosts"), "/.hosts.hostform-staged");
    }

    #[test]
    fn test_etc_hosts_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 old\n").unwrap();

        let fx = Fixture::new();
        let host = fx.host();
        let decl = ResourceDeclaration::file("hosts", path.to_string_lossy(), "127.0.0.1 host\n");

        let first = run(&decl, Mode::Apply, &host);
        assert!(first.is_success(), "{:?}", first.error);
        assert!(first.changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "127.0.0.1 host\n");

        let second = run(&decl, Mode::Apply, &host);
        assert!(!second.changed);
        assert!(second.is_success());

        // Nothing staged is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_idempotence_for_every_file_kind() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("sshd_config");
        std::fs::write(&conf, "Port 22\nPasswordAuthentication yes\n").unwrap();
        let conf = conf.to_string_lossy().to_string();

        let fx = Fixture::new();
        let host = fx.host();

        let decls = [
            ResourceDeclaration::file("motd", format!("{}/motd", dir.path().display()), "hi\n"),
            ResourceDeclaration::new(
                "mode",
                ResourceKind::File(FileSpec::new(conf.clone(), "Port 22\n").with_mode(0o600)),
            ),
            ResourceDeclaration::new(
                "pw",
                ResourceKind::Line(
                    LineSpec::new(conf.clone(), "PasswordAuthentication no")
                        .with_regexp("^PasswordAuthentication"),
                ),
            ),
        ];

        for decl in &decls {
            let first = run(decl, Mode::Apply, &host);
            assert!(first.is_success(), "{}: {:?}", decl.id, first.error);
            let second = run(decl, Mode::Apply, &host);
            assert!(!second.changed, "{} changed twice", decl.id);
        }
    }

    #[test]
    fn test_check_apply_parity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        std::fs::write(&path, "a=1\n").unwrap();

        let fx = Fixture::new();
        let host = fx.host();
        let decls = [
            ResourceDeclaration::file("same", path.to_string_lossy(), "a=1\n"),
            ResourceDeclaration::line("add", path.to_string_lossy(), "b=2"),
        ];

        for decl in &decls {
            let state = probe(decl, &host).unwrap();
            let check = reconcile(decl, &state, Mode::Check, &host);
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "a=1\n");
            let apply = reconcile(decl, &state, Mode::Apply, &host);
            assert_eq!(check.changed, apply.changed, "{}", decl.id);
            assert_eq!(check.changes, apply.changes, "{}", decl.id);
            std::fs::write(&path, "a=1\n").unwrap();
        }
    }

    #[test]
    fn test_validation_failure_leaves_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshd_config");
        std::fs::write(&path, "Port 22\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let before = std::fs::read(&path).unwrap();

        let fx = Fixture::new();
        let host = fx.host();
        let decl = ResourceDeclaration::new(
            "sshd",
            ResourceKind::File(
                FileSpec::new(path.to_string_lossy(), "Bogus yes\n").with_validate("grep -q '^Port' %s"),
            ),
        );

        let result = run(&decl, Mode::Apply, &host);
        assert!(!result.changed);
        assert_eq!(
            result.error.as_ref().map(Error::kind),
            Some(crate::error::ErrorKind::ValidationFailed)
        );
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(
            std::fs::metadata(&path).unwrap().permissions().mode() & 0o7777,
            0o600
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_validated_content_promoted_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sudoers");

        let fx = Fixture::new();
        let host = fx.host();
        let decl = ResourceDeclaration::new(
            "sudoers",
            ResourceKind::File(
                FileSpec::new(path.to_string_lossy(), "Defaults env_reset\n")
                    .with_mode(0o440)
                    .with_validate("grep -q Defaults %s"),
            ),
        );

        let result = run(&decl, Mode::Apply, &host);
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(
            std::fs::metadata(&path).unwrap().permissions().mode() & 0o7777,
            0o440
        );
        let diff = result.diff.unwrap();
        assert_eq!(diff.before, "");
        assert_eq!(diff.after, "Defaults env_reset\n");
    }

    #[test]
    fn test_failed_command_reported() {
        let fx = Fixture::new();
        let host = fx.host();
        let decl = ResourceDeclaration::new(
            "broken",
            ResourceKind::Command(crate::declaration::CommandSpec {
                run: "echo boom >&2; exit 1".to_string(),
                creates: None,
                unless: Some("false".to_string()),
            }),
        );
        let result = run(&decl, Mode::Apply, &host);
        assert!(!result.changed);
        assert_eq!(
            result.error.as_ref().map(Error::kind),
            Some(crate::error::ErrorKind::CommandFailed)
        );
    }

    #[test]
    fn test_predict_chains_file_edits() {
        let state = ProbedState::File {
            content: Some(b"a\n".to_vec()),
            mode: Some(0o644),
        };
        let steps = vec![
            Step::new(
                "write",
                Action::WriteFile {
                    path: "/f".to_string(),
                    content: b"b\n".to_vec(),
                    mode: 0o644,
                    before: Some(b"a\n".to_vec()),
                    validate: None,
                },
            ),
            Step::new(
                "chmod",
                Action::Chmod {
                    path: "/f".to_string(),
                    mode: 0o600,
                },
            ),
        ];
        assert_eq!(
            predict(&state, &steps),
            Some(ProbedState::File {
                content: Some(b"b\n".to_vec()),
                mode: Some(0o600),
            })
        );
        assert_eq!(predict(&ProbedState::Command { satisfied: false }, &[]), None);
    }
}
