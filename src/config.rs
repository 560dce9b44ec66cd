//! Declaration file loading
//!
//! One TOML file declares hosts, handlers and resources. Each host gets
//! its own plan: resource strings are expanded against the global vars
//! overlaid with the host's vars, and secret references are resolved
//! last so their plaintext is never expanded.

use anyhow::{Context, Result, bail};
use converge::{HandlerDefinition, Platform, ResourceDeclaration, RunPlan, SecretResolver};
use remote::{Executor, LocalExecutor, RetryConfig, SshExecutor, SshTarget};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::Value;

use crate::paths;

/// Address meaning "this machine, no ssh"
pub const LOCAL_ADDRESS: &str = "local";

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub platform: Platform,
    pub secrets: SecretsConfig,
    pub vars: BTreeMap<String, String>,
    pub hosts: Vec<HostEntry>,
    pub handlers: Vec<HandlerDefinition>,
    /// Raw resource tables; turned into declarations per host
    pub resources: Vec<toml::Table>,
    /// Directory of the declaration file, for relative `source` paths
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deadline for every remote call
    pub timeout_secs: u64,
    /// Concurrent probes per host
    pub probe_jobs: usize,
    /// Hosts converged in parallel
    pub host_jobs: usize,
    /// Attempts for transient probe failures
    pub retries: u32,
    pub force_handlers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            probe_jobs: 4,
            host_jobs: 4,
            retries: 3,
            force_handlers: false,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.retries.max(1), Duration::from_secs(1), 2.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Local command printing a secret; `%s` is the reference
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    /// Hostname or IP; omitted or `"local"` runs on this machine
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Extra ssh `-o` options
    #[serde(default)]
    pub ssh_options: Vec<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl HostEntry {
    pub fn is_local(&self) -> bool {
        self.address.as_deref().is_none_or(|a| a == LOCAL_ADDRESS)
    }

    /// Human-readable connection target
    pub fn connection(&self) -> String {
        if self.is_local() {
            return LOCAL_ADDRESS.to_string();
        }
        let target = self.ssh_target();
        match target.port {
            Some(port) => format!("{}:{port}", target.destination()),
            None => target.destination(),
        }
    }

    fn ssh_target(&self) -> SshTarget {
        SshTarget {
            address: self.address.clone().unwrap_or_else(|| self.name.clone()),
            user: self.user.clone(),
            port: self.port,
            identity_file: self.identity_file.as_deref().map(paths::expand),
            options: self.ssh_options.clone(),
        }
    }

    /// Execution channel for this host
    pub fn executor(&self) -> Box<dyn Executor> {
        if self.is_local() {
            Box::new(LocalExecutor::with_label(&self.name))
        } else {
            Box::new(SshExecutor::new(&self.name, self.ssh_target()))
        }
    }
}

/// One host's plan, ready for the coordinator.
#[derive(Debug)]
pub struct HostPlan {
    pub plan: RunPlan,
    /// Resources whose content came from a secret; never shown in diffs
    pub sensitive: HashSet<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load and parse a declaration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid declaration file {}", path.display()))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        log::debug!(
            "Loaded {}: {} hosts, {} resources, {} handlers",
            path.display(),
            config.hosts.len(),
            config.resources.len(),
            config.handlers.len()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        let mut names = HashSet::new();
        for host in &config.hosts {
            if !names.insert(host.name.as_str()) {
                bail!("Duplicate host name: {}", host.name);
            }
        }
        Ok(config)
    }

    /// Find a host by name
    pub fn find_host(&self, name: &str) -> Option<&HostEntry> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Hosts named on the command line, or all of them.
    pub fn select_hosts(&self, names: &[String]) -> Result<Vec<&HostEntry>> {
        if self.hosts.is_empty() {
            bail!("No [[hosts]] declared");
        }
        if names.is_empty() {
            return Ok(self.hosts.iter().collect());
        }
        names
            .iter()
            .map(|n| {
                self.find_host(n)
                    .with_context(|| format!("Unknown host: {n}"))
            })
            .collect()
    }

    /// Variables visible to `host`: globals, then host vars, then built-ins.
    pub fn overlay(&self, host: &HostEntry) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.extend(host.vars.clone());
        vars.insert("host".to_string(), host.name.clone());
        vars.insert(
            "address".to_string(),
            host.address.clone().unwrap_or_else(|| LOCAL_ADDRESS.to_string()),
        );
        vars
    }

    /// Resources that apply to `host`, before expansion.
    pub fn resources_for<'a>(&'a self, host: &'a HostEntry) -> impl Iterator<Item = &'a toml::Table> {
        self.resources.iter().filter(|table| match table.get("hosts") {
            Some(Value::Array(names)) => names.iter().any(|n| n.as_str() == Some(host.name.as_str())),
            _ => true,
        })
    }

    /// Build the run plan for one host.
    pub fn plan_for(&self, host: &HostEntry, secrets: &dyn SecretResolver) -> Result<HostPlan> {
        let vars = self.overlay(host);
        let mut declarations = Vec::new();
        let mut sensitive = HashSet::new();

        for (idx, raw) in self.resources_for(host).enumerate() {
            let label = raw
                .get("id")
                .and_then(Value::as_str)
                .map_or_else(|| format!("resources[{idx}]"), str::to_string);
            let (decl, secret) = self
                .build_declaration(raw, &vars, secrets)
                .with_context(|| format!("Invalid resource {label} for host {}", host.name))?;
            if secret {
                sensitive.insert(decl.id.clone());
            }
            declarations.push(decl);
        }

        let handlers = self
            .handlers
            .iter()
            .cloned()
            .map(|mut h| {
                h.command = expand(&h.command, &vars);
                h
            })
            .collect();

        Ok(HostPlan {
            plan: RunPlan::new(declarations, handlers),
            sensitive,
        })
    }

    fn build_declaration(
        &self,
        raw: &toml::Table,
        vars: &BTreeMap<String, String>,
        secrets: &dyn SecretResolver,
    ) -> Result<(ResourceDeclaration, bool)> {
        let mut table = raw.clone();
        table.remove("hosts");
        let source = table.remove("source");
        let secret = table.remove("secret");
        check_keys(&table)?;

        let sources = [table.contains_key("content"), source.is_some(), secret.is_some()];
        if sources.iter().filter(|s| **s).count() > 1 {
            bail!("content, source and secret are mutually exclusive");
        }

        if let Some(source) = source {
            let source = source.as_str().context("source must be a string")?;
            let path = paths::resolve_relative(&self.base_dir, &expand(source, vars));
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Could not read source {}", path.display()))?;
            table.insert("content".to_string(), Value::String(text));
        }

        expand_table(&mut table, vars);

        let is_secret = secret.is_some();
        if let Some(secret) = secret {
            let reference = secret.as_str().context("secret must be a string")?;
            let plaintext = secrets
                .resolve(reference)
                .with_context(|| format!("Could not resolve secret {reference}"))?;
            table.insert("content".to_string(), Value::String(plaintext));
        }

        let decl: ResourceDeclaration = Value::Table(table).try_into()?;
        Ok((decl, is_secret))
    }
}

const COMMON_KEYS: &[&str] = &["id", "kind", "required", "notify", "requires"];

/// Reject keys the declared kind does not know, so a typo is not silently ignored.
fn check_keys(table: &toml::Table) -> Result<()> {
    let kind = table.get("kind").and_then(Value::as_str).unwrap_or_default();
    let fields: &[&str] = match kind {
        "file" => &["path", "content", "mode", "ensure", "validate"],
        "line" => &[
            "path",
            "line",
            "regexp",
            "ensure",
            "insert_after",
            "insert_before",
            "create",
            "validate",
        ],
        "package" => &["name", "ensure", "version"],
        "service" => &["name", "enabled", "running"],
        "command" => &["run", "creates", "unless"],
        // Unknown or missing kind is reported by deserialization
        _ => return Ok(()),
    };
    for key in table.keys() {
        if !COMMON_KEYS.contains(&key.as_str()) && !fields.contains(&key.as_str()) {
            bail!("unknown key {key:?} for {kind} resource");
        }
    }
    Ok(())
}

/// Expand `$name` / `${name}`; unknown names are left untouched.
pub fn expand(input: &str, vars: &BTreeMap<String, String>) -> String {
    shellexpand::env_with_context_no_errors(input, |name: &str| vars.get(name)).into_owned()
}

fn expand_value(value: &mut Value, vars: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => *s = expand(s, vars),
        Value::Array(items) => items.iter_mut().for_each(|v| expand_value(v, vars)),
        Value::Table(table) => expand_table(table, vars),
        _ => {}
    }
}

fn expand_table(table: &mut toml::Table, vars: &BTreeMap<String, String>) {
    for (_, value) in table.iter_mut() {
        expand_value(value, vars);
    }
}

// ============================================================================
// Tests
// ============================================================================
