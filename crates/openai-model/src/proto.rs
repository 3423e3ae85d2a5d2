use serde::{Deserialize, Serialize};
use tagcall_model::{ModelMessage, ModelRequest};

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Message {
    role: Role,
    content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    stream: bool,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &ModelRequest,
    config: &OpenAIConfig,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        temperature: req.temperature,
        stream: true,
    }
}

#[inline]
fn create_message(msg: &ModelMessage) -> Message {
    // Tool results go out as user turns: the calls were plain text in the
    // assistant reply, so there is no tool call id to refer to.
    let role = match msg {
        ModelMessage::System(_) => Role::System,
        ModelMessage::User(_) | ModelMessage::ToolResult(_) => Role::User,
        ModelMessage::Assistant(_) => Role::Assistant,
    };
    Message {
        role,
        content: msg.content().to_owned(),
    }
}
