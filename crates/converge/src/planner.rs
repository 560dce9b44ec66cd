//! Run planner - validates and narrows an ordered declaration list

use crate::declaration::ResourceDeclaration;
use crate::error::{Error, Result};
use crate::handlers::{HandlerDefinition, HandlerDispatcher};
use std::collections::HashSet;

const KINDS: [&str; 5] = ["file", "line", "package", "service", "command"];

/// Ordered declarations plus the handlers they may notify.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub declarations: Vec<ResourceDeclaration>,
    pub handlers: Vec<HandlerDefinition>,
}

impl RunPlan {
    pub fn new(declarations: Vec<ResourceDeclaration>, handlers: Vec<HandlerDefinition>) -> Self {
        Self {
            declarations,
            handlers,
        }
    }

    /// Reject plans that can never run safely.
    ///
    /// Ordering violations come back as [`Error::PrerequisiteUnmet`],
    /// everything else as [`Error::InvalidDeclaration`].
    pub fn validate(&self) -> Result<()> {
        let mut handler_names = HashSet::new();
        for handler in &self.handlers {
            if !handler_names.insert(handler.name.as_str()) {
                return Err(Error::invalid(&handler.name, "duplicate handler name"));
            }
            if handler.command.trim().is_empty() {
                return Err(Error::invalid(&handler.name, "handler command is empty"));
            }
        }
        let dispatcher = HandlerDispatcher::new(self.handlers.clone());

        let mut seen: HashSet<&str> = HashSet::new();
        for decl in &self.declarations {
            if decl.id.is_empty() {
                return Err(Error::invalid("<unnamed>", "resource id is required"));
            }
            if seen.contains(decl.id.as_str()) {
                return Err(Error::invalid(&decl.id, "duplicate resource id"));
            }

            decl.resource().check(&decl.id)?;

            for prerequisite in &decl.requires {
                if !seen.contains(prerequisite.as_str()) {
                    return Err(Error::PrerequisiteUnmet {
                        resource: decl.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }

            for name in &decl.notify {
                if !dispatcher.knows(name) {
                    return Err(Error::invalid(
                        &decl.id,
                        format!("notifies undeclared handler {name:?}"),
                    ));
                }
            }

            seen.insert(&decl.id);
        }
        Ok(())
    }

    /// Keep resources matching `target` plus everything they transitively
    /// require, in the original order.
    ///
    /// Target format: `"kind"`, `"kind.id"` or `"id"`, where the id part
    /// is a substring match.
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        let Some(target) = target else {
            return self;
        };
        let (kind, name) = parse_target(target);

        let mut keep: HashSet<String> = self
            .declarations
            .iter()
            .filter(|d| matches_filter(d, kind.as_deref(), name.as_deref()))
            .map(|d| d.id.clone())
            .collect();

        // Prerequisites always come earlier, so one reverse pass closes the set
        for decl in self.declarations.iter().rev() {
            if keep.contains(&decl.id) {
                keep.extend(decl.requires.iter().cloned());
            }
        }

        Self {
            declarations: self
                .declarations
                .into_iter()
                .filter(|d| keep.contains(&d.id))
                .collect(),
            handlers: self.handlers,
        }
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// Parse a target string like "kind.name" into (kind, name)
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        Some((kind, name)) if KINDS.contains(&kind) => {
            (Some(kind.to_string()), Some(name.to_string()))
        }
        None if KINDS.contains(&target) => (Some(target.to_string()), None),
        _ => (None, Some(target.to_string())),
    }
}

fn matches_filter(decl: &ResourceDeclaration, kind: Option<&str>, name: Option<&str>) -> bool {
    if let Some(k) = kind
        && decl.resource_type() != k
    {
        return false;
    }

    if let Some(n) = name
        && !decl.id.contains(n)
    {
        return false;
    }

    true
}
