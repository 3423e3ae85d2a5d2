use tagcall_model::ModelProviderError;

use crate::tool::RegistryError;

/// Error returned by [`Agent`](super::Agent) operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// No conversation has been created yet.
    #[error("conversation has not been created")]
    ConversationNotSet,
    /// No model provider is configured.
    #[error("no model provider is configured")]
    ModelNotConfigured,
    /// The model failed, after any retry.
    #[error("model error: {0}")]
    Model(Box<dyn ModelProviderError>),
    /// A tool could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
