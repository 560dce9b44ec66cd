//! File resource - whole content and permission bits

use super::{Action, Resource, Step, require_absolute};
use crate::context::{HostContext, failure_detail};
use crate::declaration::FileSpec;
use crate::error::{Error, Result};
use crate::types::{Ensure, ProbedState, digest};
use remote::shell::quote;

/// Mode given to files we create without an explicit mode.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

const PROBE_ABSENT: i32 = 1;
const PROBE_NOT_REGULAR: i32 = 3;

/// Read a regular file's content and mode from the host.
///
/// Shared by every resource whose target is a file.
pub(crate) fn probe_file(id: &str, path: &str, host: &HostContext<'_>) -> Result<ProbedState> {
    let p = quote(path);
    let script = format!(
        "if [ -e {p} ]; then if [ -f {p} ]; then stat -c %a {p}; \
         else echo 'not a regular file' >&2; exit {PROBE_NOT_REGULAR}; fi; \
         else exit {PROBE_ABSENT}; fi"
    );
    let output = host.run_script(id, "probe", &script)?;

    let mode = match output.exit_code {
        Some(0) => parse_mode(id, output.stdout_str().trim())?,
        Some(PROBE_ABSENT) => return Ok(ProbedState::absent_file()),
        Some(PROBE_NOT_REGULAR) => {
            return Err(Error::malformed(id, format!("{path} is not a regular file")));
        }
        _ => {
            return Err(Error::from_failed_command(id, &script, &failure_detail(&output)));
        }
    };

    let read = format!("cat -- {p}");
    let output = host.run_script(id, "probe", &read)?;
    if !output.success() {
        return Err(Error::from_failed_command(id, &read, &failure_detail(&output)));
    }

    Ok(ProbedState::File {
        content: Some(output.stdout),
        mode: Some(mode),
    })
}

fn parse_mode(id: &str, raw: &str) -> Result<u32> {
    u32::from_str_radix(raw, 8)
        .map_err(|_| Error::malformed(id, format!("unexpected mode from stat: {raw:?}")))
}

/// Split a probed file state, rejecting states of other kinds.
pub(crate) fn file_state<'s>(
    id: &str,
    state: &'s ProbedState,
) -> Result<(Option<&'s Vec<u8>>, Option<u32>)> {
    match state {
        ProbedState::File { content, mode } => Ok((content.as_ref(), *mode)),
        other => Err(Error::malformed(
            id,
            format!("expected file state, got {}", other.summary()),
        )),
    }
}

impl Resource for FileSpec {
    fn resource_type(&self) -> &'static str {
        "file"
    }

    fn target(&self) -> String {
        format!("file:{}", self.path)
    }

    fn description(&self) -> String {
        match self.ensure {
            Ensure::Present => format!("File {}", self.path),
            Ensure::Absent => format!("Remove {}", self.path),
        }
    }

    fn check(&self, id: &str) -> Result<()> {
        require_absolute(id, &self.path)?;
        if let Some(mode) = self.mode
            && mode > 0o7777
        {
            return Err(Error::invalid(id, format!("mode {mode:o} out of range")));
        }
        Ok(())
    }

    fn probe(&self, id: &str, host: &HostContext<'_>) -> Result<ProbedState> {
        probe_file(id, &self.path, host)
    }

    fn plan(&self, id: &str, state: &ProbedState, _host: &HostContext<'_>) -> Result<Vec<Step>> {
        let (current, current_mode) = file_state(id, state)?;
        let desired = self.content.as_bytes();

        let steps = match (self.ensure, current) {
            (Ensure::Absent, None) => vec![],
            (Ensure::Absent, Some(_)) => vec![Step::new(
                format!("remove {}", self.path),
                Action::RemoveFile {
                    path: self.path.clone(),
                },
            )],
            (Ensure::Present, None) => {
                let mode = self.mode.unwrap_or(DEFAULT_FILE_MODE);
                vec![Step::new(
                    format!("create {} ({} bytes, mode {mode:04o})", self.path, desired.len()),
                    Action::WriteFile {
                        path: self.path.clone(),
                        content: desired.to_vec(),
                        mode,
                        before: None,
                        validate: self.validate.clone(),
                    },
                )]
            }
            (Ensure::Present, Some(bytes)) => {
                let mode = self
                    .mode
                    .or(current_mode)
                    .unwrap_or(DEFAULT_FILE_MODE);

                if bytes.as_slice() != desired {
                    vec![Step::new(
                        format!(
                            "update content of {} (blake3 {} -> {})",
                            self.path,
                            &digest(bytes)[..12],
                            &digest(desired)[..12]
                        ),
                        Action::WriteFile {
                            path: self.path.clone(),
                            content: desired.to_vec(),
                            mode,
                            before: Some(bytes.clone()),
                            validate: self.validate.clone(),
                        },
                    )]
                } else if current_mode != Some(mode) {
                    vec![Step::new(
                        format!(
                            "mode {} -> {mode:04o}",
                            current_mode
                                .map(|m| format!("{m:04o}"))
                                .unwrap_or_else(|| "?".to_string())
                        ),
                        Action::Chmod {
                            path: self.path.clone(),
                            mode,
                        },
                    )]
                } else {
                    vec![]
                }
            }
        };

        Ok(steps)
    }
}
