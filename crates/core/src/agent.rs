mod builder;
mod error;
mod options;
mod state;
#[cfg(test)]
mod tests;

use std::fmt::Display;
use std::pin::Pin;

use futures_util::future::join_all;
use serde_json::Value;
use tagcall_model::ModelProvider;
use tokio::sync::watch;
use tracing::Instrument;

use crate::conversation::{Conversation, InputRole};
use crate::model_client::{ModelClient, RetryPolicy};
use crate::parser::{FunctionCall, Parser};
use crate::prompt;
use crate::tool::{Error as ToolError, Registry, Tool, ToolResult, ToolSpec};
pub use builder::AgentBuilder;
pub use error::AgentError;
pub use options::{RunOptions, RunOutcome};
use state::RoundState;
pub use state::AgentStage;

/// The answer returned when the model produced no text.
pub const DEFAULT_FALLBACK_ANSWER: &str =
    "Sorry, I was not able to answer the question.";

/// The default system prompt prefix.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI Assistant";

type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// An agent instance, which maintains a conversation, a model provider
/// and the tools the model can call.
///
/// A prompt is answered in rounds: the model replies, the tools it called
/// are executed, and their output is sent back as the next message, until
/// the model stops calling tools or the round limit is reached.
pub struct Agent {
    model_client: Option<ModelClient>,
    retry_policy: RetryPolicy,
    registry: Registry,
    parser: Parser,
    conversation: Option<Conversation>,
    validate_arguments: bool,
    fallback_answer: String,
    stage: watch::Sender<AgentStage>,
}

impl Agent {
    /// Registers a typed tool. Takes effect in the next conversation, the
    /// current one keeps the tools it was created with.
    #[inline]
    pub fn register_tool<T: Tool>(&mut self, tool: T) -> Result<(), AgentError> {
        self.registry.register_tool(tool)?;
        Ok(())
    }

    /// Registers `spec` under `name`, replacing any tool with the same
    /// name. Takes effect in the next conversation, the current one keeps
    /// the tools it was created with.
    #[inline]
    pub fn register_tool_spec<S: Into<String>>(
        &mut self,
        name: S,
        spec: ToolSpec,
    ) -> Result<(), AgentError> {
        self.registry.register(name, spec)?;
        Ok(())
    }

    /// Returns the registered tools.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Replaces the model provider. The current conversation, if any, is
    /// dropped.
    pub fn set_model_provider<P: ModelProvider + 'static>(&mut self, provider: P) {
        self.model_client = Some(ModelClient::new(provider, self.retry_policy));
        self.conversation = None;
    }

    /// Starts a new conversation whose system prompt is
    /// `system_prompt_prefix` followed by the instructions for every
    /// registered tool.
    pub fn create_conversation(
        &mut self,
        system_prompt_prefix: &str,
    ) -> Result<&Conversation, AgentError> {
        let Some(client) = &self.model_client else {
            return Err(AgentError::ModelNotConfigured);
        };
        let system_prompt = prompt::system_prompt(
            system_prompt_prefix,
            &self.registry,
            self.parser.markup(),
        );
        debug!(
            "creating conversation with {} tools, markup {}",
            self.registry.len(),
            self.parser.markup().version
        );
        Ok(self.conversation.insert(Conversation::new(
            client.clone(),
            system_prompt,
            self.registry.clone(),
        )))
    }

    /// Returns the current conversation.
    #[inline]
    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Returns a receiver observing the stage of the agent.
    #[inline]
    pub fn subscribe_stage(&self) -> watch::Receiver<AgentStage> {
        self.stage.subscribe()
    }

    /// Answers `prompt` and returns the final answer only.
    #[inline]
    pub async fn process_prompt(
        &mut self,
        prompt: impl Into<String>,
        options: RunOptions,
    ) -> Result<String, AgentError> {
        self.run(prompt, options).await.map(|outcome| outcome.answer)
    }

    /// Answers `prompt` in the current conversation.
    ///
    /// The answer is the text of the last model reply with the call blocks
    /// removed. When it is empty, which includes running out of rounds
    /// while the model only emits calls, the fallback answer is returned.
    ///
    /// Tool failures never abort the run, they are reported to the model
    /// instead. Only a missing conversation and model errors do.
    ///
    /// Calls must not overlap on the same agent, which `&mut self`
    /// enforces. Dropping the future aborts the run, tools already
    /// running are not cancelled.
    pub async fn run(
        &mut self,
        prompt: impl Into<String>,
        options: RunOptions,
    ) -> Result<RunOutcome, AgentError> {
        let Some(conversation) = self.conversation.as_mut() else {
            return Err(AgentError::ConversationNotSet);
        };

        let mut state = RoundState::new(prompt.into());
        while state.round < options.max_rounds {
            state.round += 1;
            let round = state.round;
            self.stage.send_replace(AgentStage::Generating { round });

            let role = if round == 1 {
                InputRole::User
            } else {
                InputRole::ToolResult
            };
            let on_engine_ready = options.on_engine_ready.clone();
            let reply = conversation
                .generate(
                    std::mem::take(&mut state.next_prompt),
                    options.temperature,
                    role,
                    move || {
                        if let Some(on_engine_ready) = on_engine_ready {
                            on_engine_ready();
                        }
                    },
                )
                .await;
            let reply = match reply {
                Ok(reply) => reply,
                Err(err) => {
                    self.stage.send_replace(AgentStage::Idle);
                    return Err(AgentError::Model(err));
                }
            };

            let parsed = self.parser.parse(&reply);
            state.answer = parsed.clean_text;
            let candidates = state.select_candidates(
                parsed.calls,
                conversation.tools(),
                options.dedupe,
            );
            if candidates.is_empty() {
                break;
            }
            if round == options.max_rounds {
                debug!(
                    "round limit reached, not executing {} calls",
                    candidates.len()
                );
                break;
            }

            self.stage.send_replace(AgentStage::Dispatching {
                round,
                calls: candidates.len(),
            });
            let outputs = execute_calls(
                conversation.tools(),
                &candidates,
                self.validate_arguments,
            )
            .await;

            let mut results = vec![];
            for (call, output) in candidates.into_iter().zip(outputs) {
                if output.started {
                    state.executed_calls.push(call);
                }
                if !output.text.trim().is_empty() {
                    results.push(output.text);
                }
            }
            state.next_prompt = results.join("\n\n");
            if state.next_prompt.is_empty() {
                debug!("all tools returned nothing, giving up");
                state.answer.clear();
                break;
            }
        }

        self.stage.send_replace(AgentStage::Done);
        let is_fallback = state.answer.trim().is_empty();
        let answer = if is_fallback {
            self.fallback_answer.clone()
        } else {
            state.answer
        };
        Ok(RunOutcome {
            answer,
            is_fallback,
            rounds: state.round,
            executed_calls: state.executed_calls,
        })
    }
}

struct CallOutput {
    text: String,
    /// Whether the handler was started at all.
    started: bool,
}

/// Runs `calls` concurrently and returns one output per call, in call
/// order. Failures become a line describing them.
async fn execute_calls(
    registry: &Registry,
    calls: &[FunctionCall],
    validate_arguments: bool,
) -> Vec<CallOutput> {
    let mut outputs = Vec::with_capacity(calls.len());
    let mut tasks = vec![];
    for (idx, call) in calls.iter().enumerate() {
        match prepare_call(registry, call, validate_arguments) {
            Ok(fut) => {
                let span = debug_span!("tool", name = %call.name);
                tasks.push((idx, tokio::spawn(fut.instrument(span))));
                outputs.push(CallOutput {
                    text: String::new(),
                    started: true,
                });
            }
            Err(err) => {
                warn!("rejected call to `{}`: {err}", call.name);
                outputs.push(CallOutput {
                    text: failure_text(&call.name, &err),
                    started: false,
                });
            }
        }
    }

    let (indices, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    for (idx, result) in indices.into_iter().zip(join_all(handles).await) {
        let name = &calls[idx].name;
        outputs[idx].text = match result {
            Ok(Ok(output)) => {
                trace!("tool `{name}` returned: {output:?}");
                output
            }
            Ok(Err(err)) => {
                warn!("tool `{name}` failed: {err}");
                failure_text(name, &err)
            }
            Err(err) => {
                error!("tool `{name}` did not finish: {err}");
                let reason = if err.is_panic() {
                    "the tool panicked"
                } else {
                    "the tool was cancelled"
                };
                failure_text(name, &reason)
            }
        };
    }
    outputs
}

fn failure_text(name: &str, reason: &dyn Display) -> String {
    format!("Tool `{name}` failed: {reason}")
}

fn prepare_call(
    registry: &Registry,
    call: &FunctionCall,
    validate_arguments: bool,
) -> Result<BoxedToolFuture, ToolError> {
    let Some(spec) = registry.lookup(&call.name) else {
        return Err(ToolError::execution_error().with_reason("unknown tool"));
    };
    if validate_arguments {
        let arguments = Value::Object(call.arguments.clone());
        if let Err(err) = spec.parameters().validate(&arguments) {
            return Err(ToolError::invalid_input().with_reason(err.to_string()));
        }
    }
    Ok(spec.execute(call.arguments.clone()))
}
