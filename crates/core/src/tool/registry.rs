use std::collections::HashMap;

use super::{Tool, ToolSpec};

/// Error returned when a tool cannot be registered.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The tool name is empty or whitespace.
    #[error("tool name must not be empty")]
    EmptyName,
    /// The spec has nothing to execute.
    #[error("tool `{0}` has no handler")]
    MissingHandler(String),
}

/// Tools known to the agent, keyed by name.
///
/// Iteration follows registration order, so the rendered tool prompt is
/// stable. Registering an existing name replaces its spec in place (last
/// write wins) and keeps the original position.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    specs: Vec<(String, ToolSpec)>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Stores `spec` under `name`, returning the spec it replaced.
    pub fn register<S: Into<String>>(
        &mut self,
        name: S,
        spec: ToolSpec,
    ) -> Result<Option<ToolSpec>, RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !spec.has_handler() {
            return Err(RegistryError::MissingHandler(name));
        }

        if let Some(&idx) = self.index.get(&name) {
            debug!("replacing tool: {name}");
            let previous = std::mem::replace(&mut self.specs[idx].1, spec);
            return Ok(Some(previous));
        }
        if spec.examples().is_empty() {
            warn!("tool `{name}` has no examples");
        }
        self.index.insert(name.clone(), self.specs.len());
        self.specs.push((name, spec));
        Ok(None)
    }

    /// Registers a typed tool under its own name.
    #[inline]
    pub fn register_tool<T: Tool>(
        &mut self,
        tool: T,
    ) -> Result<Option<ToolSpec>, RegistryError> {
        let name = tool.name().to_owned();
        self.register(name, ToolSpec::from_tool(tool))
    }

    /// Returns the spec registered under `name`.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&idx| &self.specs[idx].1)
    }

    /// Returns whether a tool named `name` exists.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates over all tools in registration order.
    #[inline]
    pub fn list(&self) -> impl Iterator<Item = (&str, &ToolSpec)> {
        self.specs.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
