//! A text generation engine backed by an OpenAI-compatible
//! chat-completions server.
//!
//! Any server speaking the streaming `/chat/completions` protocol works,
//! including local ones such as llama.cpp, Ollama or vLLM. Tool results
//! are sent as user turns, so models without native function calling can
//! take part in the textual tool protocol.

#[macro_use]
extern crate tracing;

mod config;
mod proto;
mod response;
mod sse;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use futures_util::{StreamExt, TryStreamExt};
use mime::Mime;
use reqwest::{Client, Response, StatusCode, header};
use tagcall_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};

pub use config::{ConfigError, OpenAIConfig, OpenAIConfigBuilder};
use response::OpenAIResponse;
use sse::Sse;

/// Error type for [`OpenAIProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = match err.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => ErrorKind::RateLimitExceeded,
            _ => ErrorKind::Other,
        };
        Self::new(format!("{err}"), kind)
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// OpenAI-compatible model provider.
#[derive(Clone, Debug)]
pub struct OpenAIProvider {
    client: Client,
    config: Arc<OpenAIConfig>,
}

impl OpenAIProvider {
    /// Creates a new `OpenAIProvider` with the given configuration.
    #[inline]
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl ModelProvider for OpenAIProvider {
    type Error = Error;
    type Response = OpenAIResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let openai_req = proto::create_request(req, &self.config);
        let mut builder = self
            .client
            .post(self.config.completions_url())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .json(&openai_req);
        if let Some(api_key) = &self.config.api_key {
            builder =
                builder.header(header::AUTHORIZATION, format!("Bearer {api_key}"));
        }
        let resp_fut = builder.send();
        debug!(model = %self.config.model, "sending chat completion request");

        async move {
            let resp = resp_fut
                .await
                .and_then(Response::error_for_status)
                .map_err(Error::from_reqwest)?;

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| m.subtype().as_str() == "event-stream")
                .unwrap_or(false);
            if !is_event_stream {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::Other,
                ));
            }

            // Here we got a successful response.
            let chunks = resp
                .bytes_stream()
                .map_err(|err| sse::Error::Transport(format!("{err}")))
                .boxed();
            Ok(OpenAIResponse::from_sse(Sse::new(chunks)))
        }
    }
}
