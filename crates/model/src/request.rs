/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    /// The input messages, oldest first.
    pub messages: Vec<ModelMessage>,
    /// Sampling temperature. `0.0` asks for greedy decoding.
    pub temperature: f32,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant text.
    Assistant(String),
    /// Aggregated output of the tools called in the previous turn.
    ///
    /// Providers without a dedicated role for this should send it as a
    /// user message.
    ToolResult(String),
}

impl ModelMessage {
    /// Returns the text content of the message.
    #[inline]
    pub fn content(&self) -> &str {
        match self {
            ModelMessage::System(content)
            | ModelMessage::User(content)
            | ModelMessage::Assistant(content)
            | ModelMessage::ToolResult(content) => content,
        }
    }
}
