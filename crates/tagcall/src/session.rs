use tagcall_core::conversation::Message;
use tagcall_core::{
    Agent, AgentBuilder, AgentError, AgentStage, Markup, RetryPolicy,
    RunOptions, RunOutcome,
};
use tagcall_model::ModelProvider;
use tokio::sync::watch;

use crate::settings::Settings;
use crate::tools::*;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    settings: Settings,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self {
            agent_builder,
            settings: Settings::default(),
        }
    }

    /// Sets the user preferences.
    #[inline]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the grammar used for tool calls.
    #[inline]
    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.agent_builder = self.agent_builder.with_markup(markup);
        self
    }

    /// Sets how transient model errors are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.agent_builder = self.agent_builder.with_retry_policy(retry_policy);
        self
    }

    /// Builds a new session with the demo tools registered.
    pub fn build(self) -> Result<Session, AgentError> {
        let agent = self
            .agent_builder
            .with_tool(WeatherTool::new())
            .with_tool(FlightSearchTool::new())
            .with_system_prompt(self.settings.system_prompt.clone())
            .build()?;

        Ok(Session {
            agent,
            settings: self.settings,
        })
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
    settings: Settings,
}

impl Session {
    /// Sends a message to the session and returns the answer.
    #[inline]
    pub async fn send_message(
        &mut self,
        message: &str,
    ) -> Result<String, AgentError> {
        let options = self.run_options();
        self.agent.process_prompt(message, options).await
    }

    /// Like [`Session::send_message`], with custom run options.
    #[inline]
    pub async fn send_message_with(
        &mut self,
        message: &str,
        options: RunOptions,
    ) -> Result<RunOutcome, AgentError> {
        self.agent.run(message, options).await
    }

    /// Returns the run options derived from the settings.
    #[inline]
    pub fn run_options(&self) -> RunOptions {
        self.settings.run_options()
    }

    /// Returns a receiver observing the message history.
    #[inline]
    pub fn subscribe_messages(&self) -> Option<watch::Receiver<Vec<Message>>> {
        self.agent.conversation().map(|c| c.subscribe())
    }

    /// Returns a receiver observing the stage of the agent.
    #[inline]
    pub fn subscribe_stage(&self) -> watch::Receiver<AgentStage> {
        self.agent.subscribe_stage()
    }

    /// Forgets the message history and starts over.
    pub fn reset(&mut self) -> Result<(), AgentError> {
        self.agent.create_conversation(&self.settings.system_prompt)?;
        Ok(())
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}
