use std::fmt::Debug;

const DEFAULT_BASE_URL: &str = "http://localhost:8080/v1";

/// Error returned when a configuration is incomplete.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No model has been selected.
    #[error("no model has been selected")]
    MissingModel,
}

/// Builder for [`OpenAIConfig`].
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct OpenAIConfigBuilder {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

impl OpenAIConfigBuilder {
    /// Creates a builder with the given API key.
    ///
    /// Local servers usually don't check the key, use
    /// [`OpenAIConfigBuilder::default`] for them.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// Sets the model to use.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Builds the configuration.
    ///
    /// Fails if no model was selected, since the engine cannot serve any
    /// request without one.
    pub fn build(self) -> Result<OpenAIConfig, ConfigError> {
        let model = self
            .model
            .filter(|model| !model.trim().is_empty())
            .ok_or(ConfigError::MissingModel)?;
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        Ok(OpenAIConfig {
            api_key: self.api_key,
            model,
            base_url,
        })
    }
}

impl Debug for OpenAIConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIConfigBuilder")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Configuration for the OpenAI-compatible provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OpenAIConfig {
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) base_url: String,
}

impl OpenAIConfig {
    /// Returns the selected model identifier.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub(crate) fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl Debug for OpenAIConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}
