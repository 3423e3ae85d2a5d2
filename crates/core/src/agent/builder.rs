use tagcall_model::ModelProvider;
use tokio::sync::watch;

use super::{Agent, AgentError, DEFAULT_FALLBACK_ANSWER};
use crate::markup::Markup;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::parser::Parser;
use crate::tool::{Registry, Tool, ToolSpec};

type MakeClientFn = Box<dyn FnOnce(RetryPolicy) -> ModelClient + Send>;

/// [`Agent`] builder.
pub struct AgentBuilder {
    make_client: Option<MakeClientFn>,
    retry_policy: RetryPolicy,
    tools: Vec<(String, ToolSpec)>,
    markup: Markup,
    system_prompt: Option<String>,
    validate_arguments: bool,
    fallback_answer: String,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            make_client: Some(Box::new(move |retry_policy| {
                ModelClient::new(provider, retry_policy)
            })),
            ..Default::default()
        }
    }

    /// Registers a typed tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let name = tool.name().to_owned();
        self.tools.push((name, ToolSpec::from_tool(tool)));
        self
    }

    /// Registers `spec` under `name`.
    #[inline]
    pub fn with_tool_spec<S: Into<String>>(
        mut self,
        name: S,
        spec: ToolSpec,
    ) -> Self {
        self.tools.push((name.into(), spec));
        self
    }

    /// Sets the grammar used to teach and parse tool calls. Defaults to
    /// [`Markup::JSON_TOOL_CALL`].
    #[inline]
    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = markup;
        self
    }

    /// Creates the conversation right away, with `prefix` heading the
    /// system prompt. Requires a model provider.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prefix: S) -> Self {
        self.system_prompt = Some(prefix.into());
        self
    }

    /// Checks decoded arguments against the tool's parameter schema before
    /// executing it. Off by default.
    #[inline]
    pub fn validate_arguments(mut self, validate: bool) -> Self {
        self.validate_arguments = validate;
        self
    }

    /// Sets the answer returned when the model produced no text.
    #[inline]
    pub fn with_fallback_answer<S: Into<String>>(mut self, answer: S) -> Self {
        self.fallback_answer = answer.into();
        self
    }

    /// Sets how transient model errors are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Result<Agent, AgentError> {
        let AgentBuilder {
            make_client,
            retry_policy,
            tools,
            markup,
            system_prompt,
            validate_arguments,
            fallback_answer,
        } = self;

        let mut registry = Registry::default();
        for (name, spec) in tools {
            registry.register(name, spec)?;
        }

        let (stage, _) = watch::channel(Default::default());
        let mut agent = Agent {
            model_client: make_client.map(|make| make(retry_policy)),
            retry_policy,
            registry,
            parser: Parser::new(markup),
            conversation: None,
            validate_arguments,
            fallback_answer,
            stage,
        };
        if let Some(prefix) = system_prompt {
            agent.create_conversation(&prefix)?;
        }
        Ok(agent)
    }
}

impl Default for AgentBuilder {
    /// A builder without a model provider, which can be set later with
    /// [`Agent::set_model_provider`].
    fn default() -> Self {
        Self {
            make_client: None,
            retry_policy: RetryPolicy::default(),
            tools: vec![],
            markup: Markup::default(),
            system_prompt: None,
            validate_arguments: false,
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_owned(),
        }
    }
}
