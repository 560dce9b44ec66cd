//! Line-in-file resource
//!
//! Manages a single line inside a file that is otherwise left alone.
//! With a regexp, the last matching line is replaced; without one, the
//! exact line is appended (or inserted at an anchor) when missing.

use super::file::{DEFAULT_FILE_MODE, file_state, probe_file};
use super::{Action, Resource, Step, require_absolute};
use crate::context::HostContext;
use crate::declaration::LineSpec;
use crate::error::{Error, Result};
use crate::types::{Ensure, ProbedState};
use regex::Regex;

/// Anchor value meaning "beginning of file"
pub const BOF: &str = "BOF";
/// Anchor value meaning "end of file"
pub const EOF: &str = "EOF";

fn compile(id: &str, field: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::invalid(id, format!("invalid {field}: {e}")))
}

fn compile_anchor(id: &str, field: &str, anchor: Option<&str>) -> Result<Option<Regex>> {
    match anchor {
        None | Some(BOF) | Some(EOF) => Ok(None),
        Some(pattern) => compile(id, field, pattern).map(Some),
    }
}

/// Split text into lines, dropping the terminator of the final line.
fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n').map(str::to_string).collect()
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

impl LineSpec {
    /// Compute the edited text. Returns the input unchanged when the
    /// line is already in the desired state.
    pub fn edit(&self, id: &str, text: &str) -> Result<String> {
        let regexp = self
            .regexp
            .as_deref()
            .map(|p| compile(id, "regexp", p))
            .transpose()?;
        let mut lines = split_lines(text);

        let edited = match self.ensure {
            Ensure::Present => self.ensure_present(id, &mut lines, regexp.as_ref())?,
            Ensure::Absent => {
                let before = lines.len();
                lines.retain(|l| match &regexp {
                    Some(re) => !re.is_match(l),
                    None => *l != self.line,
                });
                lines.len() != before
            }
        };

        if edited {
            Ok(join_lines(&lines))
        } else {
            Ok(text.to_string())
        }
    }

    fn ensure_present(&self, id: &str, lines: &mut Vec<String>, regexp: Option<&Regex>) -> Result<bool> {
        if let Some(re) = regexp
            && let Some(idx) = lines.iter().rposition(|l| re.is_match(l))
        {
            if lines[idx] == self.line {
                return Ok(false);
            }
            lines[idx] = self.line.clone();
            return Ok(true);
        }

        if lines.iter().any(|l| *l == self.line) {
            return Ok(false);
        }

        let position = if let Some(anchor) = self.insert_after.as_deref() {
            match compile_anchor(id, "insert_after", Some(anchor))? {
                None if anchor == BOF => 0,
                None => lines.len(),
                Some(re) => lines
                    .iter()
                    .rposition(|l| re.is_match(l))
                    .map_or(lines.len(), |i| i + 1),
            }
        } else if let Some(anchor) = self.insert_before.as_deref() {
            match compile_anchor(id, "insert_before", Some(anchor))? {
                None if anchor == EOF => lines.len(),
                None => 0,
                Some(re) => lines
                    .iter()
                    .position(|l| re.is_match(l))
                    .unwrap_or(lines.len()),
            }
        } else {
            lines.len()
        };

        lines.insert(position, self.line.clone());
        Ok(true)
    }
}

impl Resource for LineSpec {
    fn resource_type(&self) -> &'static str {
        "line"
    }

    fn target(&self) -> String {
        format!("file:{}", self.path)
    }

    fn description(&self) -> String {
        match self.ensure {
            Ensure::Present => format!("Line {:?} in {}", self.line, self.path),
            Ensure::Absent => match &self.regexp {
                Some(re) => format!("No lines matching /{re}/ in {}", self.path),
                None => format!("No line {:?} in {}", self.line, self.path),
            },
        }
    }

    fn check(&self, id: &str) -> Result<()> {
        require_absolute(id, &self.path)?;
        if self.line.contains('\n') {
            return Err(Error::invalid(id, "line must not contain a newline"));
        }
        match self.ensure {
            Ensure::Present if self.line.is_empty() => {
                return Err(Error::invalid(id, "line is required"));
            }
            Ensure::Absent if self.line.is_empty() && self.regexp.is_none() => {
                return Err(Error::invalid(id, "line or regexp is required"));
            }
            _ => {}
        }
        if self.insert_after.is_some() && self.insert_before.is_some() {
            return Err(Error::invalid(
                id,
                "insert_after and insert_before are mutually exclusive",
            ));
        }
        if let Some(p) = &self.regexp {
            compile(id, "regexp", p)?;
        }
        compile_anchor(id, "insert_after", self.insert_after.as_deref())?;
        compile_anchor(id, "insert_before", self.insert_before.as_deref())?;
        Ok(())
    }

    fn probe(&self, id: &str, host: &HostContext<'_>) -> Result<ProbedState> {
        probe_file(id, &self.path, host)
    }

    fn plan(&self, id: &str, state: &ProbedState, _host: &HostContext<'_>) -> Result<Vec<Step>> {
        let (current, current_mode) = file_state(id, state)?;

        let Some(bytes) = current else {
            return match self.ensure {
                Ensure::Absent => Ok(vec![]),
                Ensure::Present if !self.create => Err(Error::malformed(
                    id,
                    format!("{} does not exist and create is disabled", self.path),
                )),
                Ensure::Present => Ok(vec![Step::new(
                    format!("create {} with {:?}", self.path, self.line),
                    Action::WriteFile {
                        path: self.path.clone(),
                        content: format!("{}\n", self.line).into_bytes(),
                        mode: DEFAULT_FILE_MODE,
                        before: None,
                        validate: self.validate.clone(),
                    },
                )]),
            };
        };

        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::malformed(id, format!("{} is not valid UTF-8", self.path)))?;
        let edited = self.edit(id, text)?;
        if edited == text {
            return Ok(vec![]);
        }

        let description = match self.ensure {
            Ensure::Present => format!("set {:?} in {}", self.line, self.path),
            Ensure::Absent => format!("remove matching lines from {}", self.path),
        };
        Ok(vec![Step::new(
            description,
            Action::WriteFile {
                path: self.path.clone(),
                content: edited.into_bytes(),
                mode: current_mode.unwrap_or(DEFAULT_FILE_MODE),
                before: Some(bytes.clone()),
                validate: self.validate.clone(),
            },
        )])
    }
}
