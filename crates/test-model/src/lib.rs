//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tagcall_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub fn message(&self) -> &'static str {
        self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    delay: Duration,
    event_idx: usize,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            let event = if this.event_idx < this.events.len() {
                let PresetEvent::MessageDelta(msg) =
                    &this.events[this.event_idx];
                Some(ModelResponseEvent::MessageDelta(msg.clone()))
            } else if this.event_idx == this.events.len() {
                Some(ModelResponseEvent::Completed(ModelFinishReason::Stop))
            } else {
                // In case this method is called after completion.
                None
            };
            if event.is_some() {
                this.event_idx += 1;
            }
            return Poll::Ready(Ok(event));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Clone, Debug)]
enum ConversationStep {
    Input,
    AssistantResponse(PresetResponse),
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. The added steps will be
/// selected according to the history messages in your request: a request
/// carrying `n` messages is answered by step `n`. If there are no enough
/// steps in the script, an error will be returned.
///
/// Every request the provider receives is recorded and can be inspected
/// with [`TestModelProvider::requests`].
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<usize, u64>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    /// Adds a step answered by the caller: a system prompt, a user input
    /// or a tool result.
    #[inline]
    pub fn add_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::Input);
    }

    /// Adds an input step followed by an assistant step streaming `text`.
    #[inline]
    pub fn add_exchange(&mut self, text: &str) {
        self.add_input_step();
        self.add_assistant_response_step(PresetResponse::with_text(text));
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn respond(&self, req: &ModelRequest) -> Result<TestModelResponse, Error> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }

        let step_idx = req.messages.len();
        let Some(step) = self.conversation_script.get(step_idx) else {
            return Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            });
        };
        let preset = match step {
            ConversationStep::Input => {
                return Err(Error {
                    message: "not an assistant response step",
                    kind: ErrorKind::Moderated,
                });
            }
            ConversationStep::AssistantResponse(preset) => preset,
        };

        if let Some(failures) = preset.failures {
            let attempt = match self.attempts.lock() {
                Ok(mut attempts) => {
                    let attempt = attempts.entry(step_idx).or_default();
                    *attempt += 1;
                    *attempt
                }
                Err(_) => u64::MAX,
            };
            if failures == 0 || attempt <= failures {
                return Err(Error {
                    message: "scripted failure",
                    kind: ErrorKind::RateLimitExceeded,
                });
            }
        }

        Ok(TestModelResponse {
            events: preset.events.clone(),
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            event_idx: 0,
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.respond(req))
    }
}
