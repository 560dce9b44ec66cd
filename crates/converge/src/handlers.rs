//! Handler dispatcher
//!
//! Handlers are deferred commands fired once per run, after every
//! resource has been reconciled, and only when something that notifies
//! them actually changed.

use crate::context::HostContext;
use crate::error::{Error, Result};
use crate::types::Mode;
use remote::RemoteCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named deferred action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDefinition {
    pub name: String,
    /// Shell command run on the host
    pub command: String,
    /// A failing critical handler fails the whole run
    #[serde(default)]
    pub critical: bool,
    /// Extra notification names this handler answers to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,
}

impl HandlerDefinition {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            critical: false,
            listen: Vec::new(),
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn listen(mut self, topic: impl Into<String>) -> Self {
        self.listen.push(topic.into());
        self
    }

    fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.listen.iter().any(|l| l == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    Fired,
    WouldFire,
    Failed,
}

/// What happened to one pending handler at flush time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResult {
    pub name: String,
    pub status: HandlerStatus,
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

impl HandlerResult {
    pub fn is_failure(&self) -> bool {
        self.status == HandlerStatus::Failed
    }

    /// Failure that must fail the run
    pub fn is_critical_failure(&self) -> bool {
        self.critical && self.is_failure()
    }
}

/// Pending set of handlers for one run.
///
/// Pending handlers are kept as indexes into the declaration list, so
/// re-notifying is a no-op and flush order is declaration order.
#[derive(Debug)]
pub struct HandlerDispatcher {
    handlers: Vec<HandlerDefinition>,
    pending: BTreeSet<usize>,
}

impl HandlerDispatcher {
    pub fn new(handlers: Vec<HandlerDefinition>) -> Self {
        Self {
            handlers,
            pending: BTreeSet::new(),
        }
    }

    /// Whether any handler answers to `name`
    pub fn knows(&self, name: &str) -> bool {
        self.handlers.iter().any(|h| h.answers_to(name))
    }

    /// Mark every handler answering to `name` as pending.
    pub fn notify(&mut self, name: &str) -> Result<()> {
        let before = self.pending.len();
        let mut matched = false;
        for (idx, handler) in self.handlers.iter().enumerate() {
            if handler.answers_to(name) {
                matched = true;
                self.pending.insert(idx);
            }
        }
        if !matched {
            return Err(Error::invalid(name, "no handler answers to this name"));
        }
        if self.pending.len() > before {
            log::debug!("Handler notified: {}", name);
        }
        Ok(())
    }

    /// Names of pending handlers in flush order
    pub fn pending(&self) -> Vec<&str> {
        self.pending
            .iter()
            .map(|&idx| self.handlers[idx].name.as_str())
            .collect()
    }

    /// Run (or, in check mode, report) each pending handler once.
    ///
    /// A failing handler does not stop the others.
    pub fn flush(&mut self, mode: Mode, host: &HostContext<'_>) -> Vec<HandlerResult> {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            log::info!("[{}] Running {} notified handlers", host.name, pending.len());
        }

        pending
            .into_iter()
            .map(|idx| {
                let handler = &self.handlers[idx];
                if mode.is_check() {
                    return HandlerResult {
                        name: handler.name.clone(),
                        status: HandlerStatus::WouldFire,
                        critical: handler.critical,
                        error: None,
                    };
                }

                log::debug!("[{}] Running handler: {}", host.name, handler.name);
                match host.run_checked(&handler.name, RemoteCommand::new(handler.command.as_str())) {
                    Ok(_) => HandlerResult {
                        name: handler.name.clone(),
                        status: HandlerStatus::Fired,
                        critical: handler.critical,
                        error: None,
                    },
                    Err(e) => {
                        log::warn!("[{}] Handler {} failed: {}", host.name, handler.name, e);
                        HandlerResult {
                            name: handler.name.clone(),
                            status: HandlerStatus::Failed,
                            critical: handler.critical,
                            error: Some(Error::HandlerExecution {
                                handler: handler.name.clone(),
                                detail: e.to_string(),
                            }),
                        }
                    }
                }
            })
            .collect()
    }
}
