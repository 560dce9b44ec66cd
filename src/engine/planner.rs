//! Host job planning

use anyhow::{Context, Result};
use converge::{RunPlan, SecretResolver};
use std::collections::HashSet;

use crate::config::{Config, HostEntry};

/// One host and the plan it will be converged to
#[derive(Debug)]
pub struct HostJob<'a> {
    pub host: &'a HostEntry,
    pub plan: RunPlan,
    /// Resources whose diffs must not be shown
    pub sensitive: HashSet<String>,
}

/// Build and validate a plan for every host.
///
/// `only` narrows each plan to matching resources plus their prerequisites.
pub fn build_jobs<'a>(
    config: &'a Config,
    hosts: &[&'a HostEntry],
    only: Option<&str>,
    secrets: &dyn SecretResolver,
) -> Result<Vec<HostJob<'a>>> {
    hosts
        .iter()
        .map(|&host| {
            let host_plan = config.plan_for(host, secrets)?;
            host_plan
                .plan
                .validate()
                .with_context(|| format!("Invalid plan for host {}", host.name))?;
            let plan = host_plan.plan.filter_by_target(only);
            log::debug!("Host {}: {} resources planned", host.name, plan.len());
            Ok(HostJob {
                host,
                plan,
                sensitive: host_plan.sensitive,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::NoSecrets;

    const SITE: &str = r#"
[[hosts]]
name = "web1"

[[hosts]]
name = "web2"

[[resources]]
id = "conf-dir"
kind = "command"
run = "mkdir -p /srv/app"
creates = "/srv/app"

[[resources]]
id = "app-conf"
kind = "file"
path = "/srv/app/app.conf"
content = "listen 80\n"
requires = ["conf-dir"]

[[resources]]
id = "motd"
kind = "file"
path = "/etc/motd"
content = "hello\n"
"#;

    #[test]
    fn test_build_jobs_for_every_host() {
        let config = Config::parse(SITE).unwrap();
        let hosts = config.select_hosts(&[]).unwrap();
        let jobs = build_jobs(&config, &hosts, None, &NoSecrets).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].host.name, "web2");
        assert_eq!(jobs[0].plan.len(), 3);
    }

    #[test]
    fn test_only_keeps_prerequisites() {
        let config = Config::parse(SITE).unwrap();
        let hosts = config.select_hosts(&["web1".to_string()]).unwrap();
        let jobs = build_jobs(&config, &hosts, Some("app-conf"), &NoSecrets).unwrap();
        let ids: Vec<&str> = jobs[0].plan.declarations.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["conf-dir", "app-conf"]);
    }

    #[test]
    fn test_invalid_plan_names_host() {
        let config = Config::parse(
            r#"
[[hosts]]
name = "web1"

[[resources]]
id = "a"
kind = "file"
path = "relative/path"
"#,
        )
        .unwrap();
        let hosts = config.select_hosts(&[]).unwrap();
        let err = build_jobs(&config, &hosts, None, &NoSecrets).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid plan for host web1"));
    }
}
