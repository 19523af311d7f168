//! Host capabilities the model may invoke, and the registry that exposes them.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use agent_provider::{CancelSignal, ToolDefinition};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror::Error;

mod builtin;
mod confirm;
mod workspace;

pub use builtin::{EditFileTool, ListTool, ReadFileTool, SearchInDirectoryTool, WriteFileTool};
pub use confirm::{Confirmer, StaticConfirmer, StdinConfirmer};
pub use workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Boolean,
    Integer,
}

impl ParameterKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub description: &'static str,
    pub required: bool,
}

impl ParameterSpec {
    #[must_use]
    pub fn required(name: &'static str, kind: ParameterKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: &'static str, kind: ParameterKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
        }
    }
}

/// Self-description of a capability: what the model sees plus the mutating flag
/// the mode policy reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterSpec>,
    pub mutating: bool,
}

impl CapabilitySchema {
    /// Renders the schema as a provider tool definition with a JSON-Schema object.
    #[must_use]
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = Map::new();
        for parameter in &self.parameters {
            properties.insert(
                parameter.name.to_string(),
                json!({
                    "type": parameter.kind.json_type(),
                    "description": parameter.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|parameter| parameter.required)
            .map(|parameter| parameter.name)
            .collect();

        ToolDefinition {
            name: self.name.to_string(),
            description: Some(self.description.to_string()),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Per-call context handed to a capability.
pub struct InvocationContext<'a> {
    pub cancel: CancelSignal,
    pub confirmer: &'a dyn Confirmer,
}

pub trait Capability: Send + Sync {
    fn schema(&self) -> CapabilitySchema;

    /// Runs the capability. Faults are returned, never panicked, so the caller
    /// can embed them in the tool result.
    fn invoke(&self, args: &Value, ctx: &InvocationContext<'_>) -> Result<Value, ExecutionError>;
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },

    #[error("Path must not be empty")]
    EmptyPath,

    #[error("Path escapes workspace root: {path}")]
    PathEscape { path: PathBuf },

    #[error("{path} already exists; use editFile to change existing files")]
    AlreadyExists { path: PathBuf },

    #[error("{path} does not exist")]
    Missing { path: PathBuf },

    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("{path} is a directory, expected a file")]
    NotAFile { path: PathBuf },

    #[error("{path} exceeds max read size ({size} bytes > {limit} bytes)")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("{path} is not valid UTF-8 text")]
    NotUtf8 { path: PathBuf },

    #[error("failed to {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },
}

impl ExecutionError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::EmptyPath | Self::PathEscape { .. } => "invalid_path",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Missing { .. } => "not_found",
            Self::NotADirectory { .. } | Self::NotAFile { .. } => "wrong_file_type",
            Self::TooLarge { .. } => "too_large",
            Self::NotUtf8 { .. } => "not_utf8",
            Self::Io { .. } | Self::Walk { .. } => "io",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Structured payload embedded in the tool result sent back to the model.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Cancelled { reason } => json!({ "cancelled": true, "reason": reason }),
            other => json!({ "error": other.to_string(), "kind": other.kind() }),
        }
    }
}

pub(crate) fn parse_args<T: DeserializeOwned>(
    tool: &'static str,
    args: &Value,
) -> Result<T, ExecutionError> {
    serde_json::from_value(args.clone()).map_err(|error| ExecutionError::InvalidArguments {
        tool,
        message: error.to_string(),
    })
}

/// Capabilities keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the five built-in file capabilities rooted at `workspace`.
    #[must_use]
    pub fn with_builtins(workspace: &Workspace) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReadFileTool::new(workspace.clone())));
        registry.register(Arc::new(ListTool::new(workspace.clone())));
        registry.register(Arc::new(SearchInDirectoryTool::new(workspace.clone())));
        registry.register(Arc::new(WriteFileTool::new(workspace.clone())));
        registry.register(Arc::new(EditFileTool::new(workspace.clone())));
        registry
    }

    /// Adds a capability, returning any previous one registered under the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.schema().name.to_string();
        self.capabilities.insert(name, capability)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Provider definitions for every capability, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .capabilities
            .values()
            .map(|capability| capability.schema().to_definition())
            .collect();
        definitions.sort_by(|left, right| left.name.cmp(&right.name));
        definitions
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
