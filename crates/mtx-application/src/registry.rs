//! Registered tool catalog.
//!
//! Process-wide registry populated at bootstrap. Registration extends every
//! declared parameter schema with an optional `sessionId` parameter so the
//! transport can scope invocations without tools declaring it themselves.
//! Descriptors are immutable after registration.

use dashmap::DashMap;

use mtx_domain::error::{Error, Result};
use mtx_domain::tool::{
    ParamKind, ParameterSpec, RegisteredTool, ToolDescriptor, ToolHandler, SESSION_ID_PARAM,
};

/// Catalog of registered tools, keyed by tool id.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: DashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, extending its schema with the optional `sessionId`
    /// parameter.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when a tool with the same id is already
    /// registered — descriptors are immutable after registration.
    pub fn register(&self, mut descriptor: ToolDescriptor, handler: ToolHandler) -> Result<()> {
        if self.tools.contains_key(&descriptor.id) {
            return Err(Error::ConfigInvalid {
                key: "tool".to_owned(),
                message: format!("tool already registered: {}", descriptor.id),
            });
        }
        if !descriptor
            .parameters
            .iter()
            .any(|p| p.name == SESSION_ID_PARAM)
        {
            descriptor.parameters.push(
                ParameterSpec::optional(SESSION_ID_PARAM, ParamKind::String)
                    .with_description("Session scope for stateful execution"),
            );
        }
        let id = descriptor.id.clone();
        self.tools.insert(id, RegisteredTool { descriptor, handler });
        Ok(())
    }

    /// Look up a tool by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RegisteredTool> {
        self.tools.get(id).map(|entry| entry.value().clone())
    }

    /// Whether a tool id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// Snapshot of all descriptors, sorted by id for deterministic output.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut all: Vec<ToolDescriptor> = self
            .tools
            .iter()
            .map(|entry| entry.value().descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
