//! Secret resolution for `secret = "..."` resources
//!
//! With `[secrets] command` set, the command runs locally with the
//! reference substituted for `%s` and its stdout is the plaintext.
//! Otherwise the reference is read from `HOSTFORM_SECRET_<REF>`.

use converge::{Error, Result, SecretResolver};
use remote::{Executor, LocalExecutor, RemoteCommand, shell};
use std::time::Duration;

/// Prefix for environment-provided secrets
pub const ENV_PREFIX: &str = "HOSTFORM_SECRET_";

/// Resolver built from the `[secrets]` table.
pub struct ConfiguredSecrets {
    command: Option<String>,
    executor: LocalExecutor,
    timeout: Duration,
}

impl ConfiguredSecrets {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self {
            command,
            executor: LocalExecutor::with_label("secrets"),
            timeout,
        }
    }

    fn run_command(&self, template: &str, reference: &str) -> Result<String> {
        let script = shell::fill_template(template, reference);
        let output = self
            .executor
            .execute(&RemoteCommand::new(script), self.timeout)
            .map_err(|e| secret_error(reference, e.to_string()))?;
        if !output.success() {
            let stderr = output.stderr_str();
            return Err(secret_error(
                reference,
                format!("secret command failed: {}", stderr.trim()),
            ));
        }
        let mut plaintext = output.stdout_str();
        if plaintext.ends_with('\n') {
            plaintext.pop();
            if plaintext.ends_with('\r') {
                plaintext.pop();
            }
        }
        Ok(plaintext)
    }
}

impl SecretResolver for ConfiguredSecrets {
    fn resolve(&self, reference: &str) -> Result<String> {
        log::debug!("Resolving secret {reference}");
        match &self.command {
            Some(template) => self.run_command(template, reference),
            None => {
                let key = env_key(reference);
                std::env::var(&key).map_err(|_| secret_error(reference, format!("{key} is not set")))
            }
        }
    }
}

/// Resolver for `validate`: secrets are never fetched, only referenced.
pub struct PlaceholderSecrets;

impl SecretResolver for PlaceholderSecrets {
    fn resolve(&self, reference: &str) -> Result<String> {
        Ok(format!("<secret {reference}>"))
    }
}

/// Environment variable holding `reference`
pub fn env_key(reference: &str) -> String {
    let suffix: String = reference
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{ENV_PREFIX}{suffix}")
}

fn secret_error(reference: &str, detail: String) -> Error {
    Error::Secret {
        reference: reference.to_string(),
        detail,
    }
}
