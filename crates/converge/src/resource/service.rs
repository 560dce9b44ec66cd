//! Service resource: boot-time enablement and run state

use super::{Action, Resource, Step};
use crate::context::HostContext;
use crate::declaration::ServiceSpec;
use crate::error::{Error, Result};
use crate::types::ProbedState;
use remote::shell::fill_template;

impl Resource for ServiceSpec {
    fn resource_type(&self) -> &'static str {
        "service"
    }

    fn target(&self) -> String {
        format!("service:{}", self.name)
    }

    fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(enabled) = self.enabled {
            parts.push(if enabled { "enabled" } else { "disabled" });
        }
        if let Some(running) = self.running {
            parts.push(if running { "running" } else { "stopped" });
        }
        format!("Service {} {}", self.name, parts.join(", "))
    }

    fn check(&self, id: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid(id, "service name is required"));
        }
        if self.enabled.is_none() && self.running.is_none() {
            return Err(Error::invalid(id, "set at least one of enabled or running"));
        }
        Ok(())
    }

    fn probe(&self, id: &str, host: &HostContext<'_>) -> Result<ProbedState> {
        let commands = &host.platform.services;
        let query = |template: &str| -> Result<bool> {
            let output = host.run_script(id, "probe", &fill_template(template, &self.name))?;
            Ok(output.success())
        };

        Ok(ProbedState::Service {
            enabled: query(&commands.is_enabled)?,
            active: query(&commands.is_active)?,
        })
    }

    fn plan(&self, id: &str, state: &ProbedState, host: &HostContext<'_>) -> Result<Vec<Step>> {
        let ProbedState::Service { enabled, active } = state else {
            return Err(Error::malformed(
                id,
                format!("expected service state, got {}", state.summary()),
            ));
        };
        let commands = &host.platform.services;
        let mut steps = Vec::new();

        if let Some(want) = self.enabled
            && want != *enabled
        {
            let (verb, template) = if want {
                ("enable", &commands.enable)
            } else {
                ("disable", &commands.disable)
            };
            steps.push(Step::new(
                format!("{verb} {}", self.name),
                Action::Run {
                    script: fill_template(template, &self.name),
                },
            ));
        }

        if let Some(want) = self.running
            && want != *active
        {
            let (verb, template) = if want {
                ("start", &commands.start)
            } else {
                ("stop", &commands.stop)
            };
            steps.push(Step::new(
                format!("{verb} {}", self.name),
                Action::Run {
                    script: fill_template(template, &self.name),
                },
            ));
        }

        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CommandValidator, DEFAULT_TIMEOUT, Platform, ServiceCommands};
    use remote::LocalExecutor;

    fn fake_platform(dir: &std::path::Path) -> Platform {
        let d = dir.to_string_lossy();
        Platform {
            services: ServiceCommands {
                is_enabled: format!("test -e {d}/%s.enabled"),
                is_active: format!("test -e {d}/%s.active"),
                enable: format!("touch {d}/%s.enabled"),
                disable: format!("rm -f {d}/%s.enabled"),
                start: format!("touch {d}/%s.active"),
                stop: format!("rm -f {d}/%s.active"),
            },
            ..Platform::default()
        }
    }

    #[test]
    fn test_probe_and_plan() {
        let dir = tempfile::tempdir().unwrap();
        let platform = fake_platform(dir.path());
        let exec = LocalExecutor::new();
        let host = HostContext::new(&exec, &CommandValidator, &platform, DEFAULT_TIMEOUT);

        let spec = ServiceSpec {
            name: "nginx".to_string(),
            enabled: Some(true),
            running: Some(true),
        };
        std::fs::write(dir.path().join("nginx.enabled"), "").unwrap();

        let state = spec.probe("s", &host).unwrap();
        assert_eq!(
            state,
            ProbedState::Service {
                enabled: true,
                active: false
            }
        );

        let steps = spec.plan("s", &state, &host).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].description, "start nginx");
    }

    #[test]
    fn test_unmanaged_attribute_ignored() {
        let platform = Platform::default();
        let exec = LocalExecutor::new();
        let host = HostContext::new(&exec, &CommandValidator, &platform, DEFAULT_TIMEOUT);

        let spec = ServiceSpec {
            name: "cron".to_string(),
            enabled: Some(true),
            running: None,
        };
        let state = ProbedState::Service {
            enabled: true,
            active: false,
        };
        assert!(spec.plan("s", &state, &host).unwrap().is_empty());
    }

    #[test]
    fn test_check_requires_something_to_manage() {
        let spec = ServiceSpec {
            name: "cron".to_string(),
            enabled: None,
            running: None,
        };
        assert!(spec.check("s").is_err());
    }
}
