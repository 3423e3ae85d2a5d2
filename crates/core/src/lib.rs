//! Core logic of tool calling over plain text: the tool registry, the
//! prompt that teaches the model the call syntax, the parser that reads
//! calls back, and the agent loop tying them together.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
pub mod markup;
mod model_client;
pub mod parser;
pub mod prompt;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, AgentError, AgentStage, DEFAULT_FALLBACK_ANSWER,
    DEFAULT_SYSTEM_PROMPT, RunOptions, RunOutcome,
};
pub use markup::Markup;
pub use model_client::RetryPolicy;
pub use parser::{FunctionCall, ParsedOutput, Parser};
pub use tool::{Tool, ToolExample, ToolSpec};
