//! Conversation-related types.

use std::fmt::{self, Debug};
use std::sync::Arc;

use tagcall_model::{ModelMessage, ModelProviderError, ModelRequest};
use tokio::sync::watch;

use crate::model_client::ModelClient;
use crate::tool::Registry;

/// Identifies a message within a conversation.
pub type MessageId = u64;

/// The author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The system instructions.
    System,
    /// The user.
    User,
    /// The model.
    Assistant,
    /// Aggregated tool output fed back to the model.
    ToolResult,
}

/// The role of a message sent to the model to get a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputRole {
    /// A user prompt.
    User,
    /// Tool results of the previous round.
    ToolResult,
}

impl From<InputRole> for Role {
    #[inline]
    fn from(role: InputRole) -> Self {
        match role {
            InputRole::User => Role::User,
            InputRole::ToolResult => Role::ToolResult,
        }
    }
}

/// One turn in the conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    streaming: bool,
}

impl Message {
    /// Returns the identifier, unique within its conversation.
    #[inline]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the author of this message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the content received so far.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns `true` while the model is still writing this message.
    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn to_model_message(&self) -> ModelMessage {
        let content = self.content.clone();
        match self.role {
            Role::System => ModelMessage::System(content),
            Role::User => ModelMessage::User(content),
            Role::Assistant => ModelMessage::Assistant(content),
            Role::ToolResult => ModelMessage::ToolResult(content),
        }
    }
}

/// The message history of one chat, backed by a model.
///
/// The history only grows. Observers get notified of every change,
/// including each streamed delta, through [`Conversation::subscribe`].
///
/// Only one [`generate`](Conversation::generate) call can be in flight at
/// a time, which `&mut self` enforces.
pub struct Conversation {
    client: ModelClient,
    tools: Registry,
    history: Arc<watch::Sender<Vec<Message>>>,
    next_id: MessageId,
}

impl Conversation {
    pub(crate) fn new(
        client: ModelClient,
        system_prompt: String,
        tools: Registry,
    ) -> Self {
        let (history, _) = watch::channel(vec![]);
        let mut conversation = Self {
            client,
            tools,
            history: Arc::new(history),
            next_id: 1,
        };
        conversation.push(Role::System, system_prompt);
        conversation
    }

    /// Returns the tools the system prompt was compiled from. Calls are
    /// dispatched against these, not against later registrations.
    #[inline]
    pub fn tools(&self) -> &Registry {
        &self.tools
    }

    /// Returns a receiver observing the message history.
    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.history.subscribe()
    }

    /// Returns a snapshot of the message history.
    #[inline]
    pub fn messages(&self) -> Vec<Message> {
        self.history.borrow().clone()
    }

    /// Returns the system prompt this conversation was created with.
    pub fn system_prompt(&self) -> String {
        self.history
            .borrow()
            .first()
            .map(|msg| msg.content.clone())
            .unwrap_or_default()
    }

    /// Appends `prompt` with `role` and lets the model reply to the whole
    /// history.
    ///
    /// `on_ready` is invoked once the engine is ready to stream the reply.
    /// Returns the full text of the reply once it is complete.
    pub async fn generate(
        &mut self,
        prompt: impl Into<String>,
        temperature: f32,
        role: InputRole,
        on_ready: impl FnOnce() + Send + 'static,
    ) -> Result<String, Box<dyn ModelProviderError>> {
        self.push(role.into(), prompt.into());
        let req = ModelRequest {
            messages: self
                .history
                .borrow()
                .iter()
                .map(Message::to_model_message)
                .collect(),
            temperature,
        };

        let reply_id = self.take_id();
        let on_ready = {
            let history = Arc::clone(&self.history);
            move || {
                history.send_modify(|messages| {
                    messages.push(Message {
                        id: reply_id,
                        role: Role::Assistant,
                        content: String::new(),
                        streaming: true,
                    })
                });
                on_ready();
            }
        };
        let on_delta = {
            let history = Arc::clone(&self.history);
            move |delta: String| {
                history.send_modify(|messages| {
                    if let Some(msg) = find_mut(messages, reply_id) {
                        msg.content.push_str(&delta);
                    }
                });
            }
        };

        let result = self.client.send_request(req, on_ready, on_delta).await;
        self.history.send_modify(|messages| {
            if let Some(msg) = find_mut(messages, reply_id) {
                msg.streaming = false;
                if let Ok(resp) = &result {
                    trace!("reply {reply_id} finished: {:?}", resp.finish_reason);
                    msg.content.clone_from(&resp.transcript);
                }
            }
        });
        result.map(|resp| resp.transcript)
    }

    fn take_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, role: Role, content: String) {
        let id = self.take_id();
        self.history.send_modify(|messages| {
            messages.push(Message {
                id,
                role,
                content,
                streaming: false,
            })
        });
    }
}

impl Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("tools", &self.tools.len())
            .field("messages", &*self.history.borrow())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

fn find_mut(messages: &mut [Message], id: MessageId) -> Option<&mut Message> {
    messages.iter_mut().rev().find(|msg| msg.id == id)
}
