//! Tool call supports.

mod error;
mod object;
mod registry;
pub mod schema;

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use error::{Error, ErrorKind};
use object::{AnyTool, FnTool, ToolObject};
pub use registry::{Registry, RegistryError};
pub use schema::Schema;

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// Decoded arguments of a tool call.
pub type Arguments = Map<String, Value>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as the working directory or the
/// current user. To do this, make the context an immutable state of the tool,
/// which can be set during initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameters(&self) -> &Schema;

    /// Returns worked examples that teach the model when and how to call
    /// the tool. They are never executed.
    fn examples(&self) -> &[ToolExample];

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// A query paired with the arguments the model should produce for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolExample {
    /// A natural-language request from the user.
    pub query: String,
    /// The arguments of the expected call.
    pub arguments: Arguments,
}

impl ToolExample {
    /// Creates an example. Non-object `arguments` are replaced by an empty
    /// map.
    pub fn new<S: Into<String>>(query: S, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            other => {
                warn!("example arguments must be an object, got: {other}");
                Map::new()
            }
        };
        Self {
            query: query.into(),
            arguments,
        }
    }
}

/// Everything the agent knows about a registered tool.
///
/// A spec without a handler cannot be registered. A spec without examples
/// can, but models tend to follow the call syntax less reliably then.
#[derive(Clone)]
pub struct ToolSpec {
    description: String,
    parameters: Schema,
    examples: Vec<ToolExample>,
    handler: Option<Arc<dyn ToolObject>>,
}

impl ToolSpec {
    /// Creates a spec with the given description, taking no parameters
    /// and having no handler yet.
    #[inline]
    pub fn new<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            parameters: Schema::object(),
            examples: vec![],
            handler: None,
        }
    }

    /// Creates a spec from a typed [`Tool`].
    pub fn from_tool<T: Tool>(tool: T) -> Self {
        Self {
            description: tool.description().trim().to_owned(),
            parameters: tool.parameters().clone(),
            examples: tool.examples().to_vec(),
            handler: Some(Arc::new(AnyTool(tool))),
        }
    }

    /// Sets the parameter schema.
    #[inline]
    pub fn with_parameters(mut self, parameters: Schema) -> Self {
        self.parameters = parameters;
        self
    }

    /// Appends a worked example.
    #[inline]
    pub fn with_example<S: Into<String>>(
        mut self,
        query: S,
        arguments: Value,
    ) -> Self {
        self.examples.push(ToolExample::new(query, arguments));
        self
    }

    /// Sets the function executed when the model calls the tool.
    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        self.handler = Some(Arc::new(FnTool(handler)));
        self
    }

    /// Returns the description.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the parameter schema.
    #[inline]
    pub fn parameters(&self) -> &Schema {
        &self.parameters
    }

    /// Returns the worked examples.
    #[inline]
    pub fn examples(&self) -> &[ToolExample] {
        &self.examples
    }

    #[inline]
    pub(crate) fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Executes the tool with unvalidated arguments.
    pub fn execute(
        &self,
        arguments: Arguments,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
        match &self.handler {
            Some(handler) => handler.execute(arguments),
            None => Box::pin(std::future::ready(Err(
                Error::execution_error().with_reason("tool has no handler"),
            ))),
        }
    }
}

impl Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("examples", &self.examples)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
