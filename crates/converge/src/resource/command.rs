//! Guarded command resource
//!
//! A command is only convergent when a guard tells us whether it has
//! already taken effect, so a guard is mandatory.

use super::{Action, Resource, Step, require_absolute};
use crate::context::HostContext;
use crate::declaration::CommandSpec;
use crate::error::{Error, Result};
use crate::types::ProbedState;
use remote::shell::quote;

impl Resource for CommandSpec {
    fn resource_type(&self) -> &'static str {
        "command"
    }

    fn target(&self) -> String {
        format!("command:{}", self.run)
    }

    fn description(&self) -> String {
        match (&self.creates, &self.unless) {
            (Some(path), _) => format!("Run {:?} unless {path} exists", self.run),
            (None, Some(guard)) => format!("Run {:?} unless {guard:?} succeeds", self.run),
            (None, None) => format!("Run {:?}", self.run),
        }
    }

    fn check(&self, id: &str) -> Result<()> {
        if self.run.trim().is_empty() {
            return Err(Error::invalid(id, "run is required"));
        }
        if self.creates.is_none() && self.unless.is_none() {
            return Err(Error::invalid(id, "a command needs a creates or unless guard"));
        }
        if let Some(path) = &self.creates {
            require_absolute(id, path)?;
        }
        Ok(())
    }

    fn probe(&self, id: &str, host: &HostContext<'_>) -> Result<ProbedState> {
        if let Some(path) = &self.creates {
            let output = host.run_script(id, "probe", &format!("test -e {}", quote(path)))?;
            if output.success() {
                return Ok(ProbedState::Command { satisfied: true });
            }
        }
        if let Some(guard) = &self.unless {
            let output = host.run_script(id, "probe", guard)?;
            if output.success() {
                return Ok(ProbedState::Command { satisfied: true });
            }
        }
        Ok(ProbedState::Command { satisfied: false })
    }

    fn plan(&self, id: &str, state: &ProbedState, _host: &HostContext<'_>) -> Result<Vec<Step>> {
        match state {
            ProbedState::Command { satisfied: true } => Ok(vec![]),
            ProbedState::Command { satisfied: false } => Ok(vec![Step::new(
                format!("run {}", self.run),
                Action::Run {
                    script: self.run.clone(),
                },
            )]),
            other => Err(Error::malformed(
                id,
                format!("expected command state, got {}", other.summary()),
            )),
        }
    }
}
