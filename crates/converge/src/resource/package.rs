//! Package resource backed by the platform's package manager templates

use super::{Action, Resource, Step};
use crate::context::HostContext;
use crate::declaration::PackageSpec;
use crate::error::{Error, Result};
use crate::types::{Ensure, ProbedState};
use remote::shell::fill_template;

impl PackageSpec {
    fn install_argument(&self, separator: &str) -> String {
        match &self.version {
            Some(v) => format!("{}{separator}{v}", self.name),
            None => self.name.clone(),
        }
    }
}

impl Resource for PackageSpec {
    fn resource_type(&self) -> &'static str {
        "package"
    }

    fn target(&self) -> String {
        format!("package:{}", self.name)
    }

    fn description(&self) -> String {
        match (self.ensure, &self.version) {
            (Ensure::Present, Some(v)) => format!("Package {} {v}", self.name),
            (Ensure::Present, None) => format!("Package {}", self.name),
            (Ensure::Absent, _) => format!("Package {} removed", self.name),
        }
    }

    fn check(&self, id: &str) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(Error::invalid(id, format!("invalid package name: {:?}", self.name)));
        }
        if self.ensure == Ensure::Absent && self.version.is_some() {
            return Err(Error::invalid(id, "version cannot be pinned on an absent package"));
        }
        Ok(())
    }

    fn probe(&self, id: &str, host: &HostContext<'_>) -> Result<ProbedState> {
        let script = fill_template(&host.platform.packages.query, &self.name);
        let output = host.run_script(id, "probe", &script)?;
        let version = output.stdout_str().trim().to_string();

        Ok(ProbedState::Package {
            version: (output.success() && !version.is_empty()).then_some(version),
        })
    }

    fn plan(&self, id: &str, state: &ProbedState, host: &HostContext<'_>) -> Result<Vec<Step>> {
        let ProbedState::Package { version: installed } = state else {
            return Err(Error::malformed(
                id,
                format!("expected package state, got {}", state.summary()),
            ));
        };
        let commands = &host.platform.packages;

        let step = match (self.ensure, installed) {
            (Ensure::Absent, None) => None,
            (Ensure::Absent, Some(v)) => Some(Step::new(
                format!("remove {} {v}", self.name),
                Action::Run {
                    script: fill_template(&commands.remove, &self.name),
                },
            )),
            (Ensure::Present, Some(current)) if self.version.as_ref().is_none_or(|v| v == current) => None,
            (Ensure::Present, current) => {
                let wanted = self.version.as_deref().unwrap_or("latest");
                let description = match current {
                    Some(c) => format!("upgrade {} {c} -> {wanted}", self.name),
                    None => format!("install {} {wanted}", self.name),
                };
                Some(Step::new(
                    description,
                    Action::Run {
                        script: fill_template(
                            &commands.install,
                            &self.install_argument(&commands.version_separator),
                        ),
                    },
                ))
            }
        };

        Ok(step.into_iter().collect())
    }
}
