//! Resource declarations: one desired-state statement each.
//!
//! Declarations are immutable once loaded. The run coordinator borrows a
//! slice of them for the whole run.

use crate::resource::Resource;
use crate::types::Ensure;
use serde::{Deserialize, Serialize};

/// One desired-state statement about a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    /// Unique identifier within a run
    pub id: String,
    /// What is managed and how it should look
    #[serde(flatten)]
    pub kind: ResourceKind,
    /// Fail the whole run when this resource fails
    #[serde(default)]
    pub required: bool,
    /// Handlers to notify when this resource changes
    #[serde(default)]
    pub notify: Vec<String>,
    /// Resources that must have applied successfully before this one
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Kind tag plus kind-specific desired-state payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKind {
    File(FileSpec),
    Line(LineSpec),
    Package(PackageSpec),
    Service(ServiceSpec),
    Command(CommandSpec),
}

/// Whole-file content and mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub content: String,
    /// Permission bits; kept as found when unset
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub ensure: Ensure,
    /// Validator command template, `%s` is the staged path
    #[serde(default)]
    pub validate: Option<String>,
}

/// A single line inside a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpec {
    pub path: String,
    #[serde(default)]
    pub line: String,
    /// Lines matching this pattern are replaced (present) or removed (absent)
    #[serde(default)]
    pub regexp: Option<String>,
    #[serde(default)]
    pub ensure: Ensure,
    /// Pattern, `BOF` or `EOF`; insert after its last match
    #[serde(default)]
    pub insert_after: Option<String>,
    /// Pattern, `BOF` or `EOF`; insert before its first match
    #[serde(default)]
    pub insert_before: Option<String>,
    /// Create the file when it is missing
    #[serde(default = "default_true")]
    pub create: bool,
    #[serde(default)]
    pub validate: Option<String>,
}

/// An OS package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub ensure: Ensure,
    /// Exact version to hold; any version satisfies when unset
    #[serde(default)]
    pub version: Option<String>,
}

/// Boot and runtime flags of a service unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub running: Option<bool>,
}

/// A command guarded so that it runs only until its effect exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub run: String,
    /// Skip when this path exists
    #[serde(default)]
    pub creates: Option<String>,
    /// Skip when this command succeeds
    #[serde(default)]
    pub unless: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ResourceDeclaration {
    /// Create a declaration with no handlers or prerequisites.
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            required: false,
            notify: Vec::new(),
            requires: Vec::new(),
        }
    }

    /// A file with exactly `content`.
    pub fn file(id: impl Into<String>, path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, ResourceKind::File(FileSpec::new(path, content)))
    }

    /// A line that must be present in a file.
    pub fn line(id: impl Into<String>, path: impl Into<String>, line: impl Into<String>) -> Self {
        Self::new(id, ResourceKind::Line(LineSpec::new(path, line)))
    }

    /// An installed package.
    pub fn package(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(
            id,
            ResourceKind::Package(PackageSpec {
                name: name.into(),
                ensure: Ensure::Present,
                version: None,
            }),
        )
    }

    /// A service that is enabled and running.
    pub fn service(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(
            id,
            ResourceKind::Service(ServiceSpec {
                name: name.into(),
                enabled: Some(true),
                running: Some(true),
            }),
        )
    }

    /// Notify a handler on change.
    pub fn notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    /// Depend on an earlier resource.
    pub fn requires(mut self, id: impl Into<String>) -> Self {
        self.requires.push(id.into());
        self
    }

    /// Fail the run fast when this resource fails.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The kind-specific behavior behind this declaration.
    pub fn resource(&self) -> &dyn Resource {
        match &self.kind {
            ResourceKind::File(spec) => spec,
            ResourceKind::Line(spec) => spec,
            ResourceKind::Package(spec) => spec,
            ResourceKind::Service(spec) => spec,
            ResourceKind::Command(spec) => spec,
        }
    }

    /// Kind tag, e.g. `"file"`.
    pub fn resource_type(&self) -> &'static str {
        self.resource().resource_type()
    }
}

impl FileSpec {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            mode: None,
            ensure: Ensure::Present,
            validate: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_validate(mut self, template: impl Into<String>) -> Self {
        self.validate = Some(template.into());
        self
    }
}

impl LineSpec {
    pub fn new(path: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: line.into(),
            regexp: None,
            ensure: Ensure::Present,
            insert_after: None,
            insert_before: None,
            create: true,
            validate: None,
        }
    }

    pub fn with_regexp(mut self, pattern: impl Into<String>) -> Self {
        self.regexp = Some(pattern.into());
        self
    }

    pub fn with_validate(mut self, template: impl Into<String>) -> Self {
        self.validate = Some(template.into());
        self
    }

    pub fn absent(mut self) -> Self {
        self.ensure = Ensure::Absent;
        self
    }
}
