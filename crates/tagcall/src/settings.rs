use std::env;
use std::str::FromStr;

use tagcall_core::{DEFAULT_SYSTEM_PROMPT, RunOptions};
use tagcall_openai_model::{ConfigError, OpenAIConfig, OpenAIConfigBuilder};

/// Error returned when a setting has an unusable value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?} for `{name}`: {reason}")]
pub struct SettingsError {
    name: &'static str,
    value: String,
    reason: &'static str,
}

impl SettingsError {
    /// Returns the name of the offending variable.
    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }
}

/// User preferences for a session.
///
/// Every field can be overridden by an environment variable:
///
/// | Variable                 | Field           | Default                          |
/// |--------------------------|-----------------|----------------------------------|
/// | `TAGCALL_SYSTEM_PROMPT`  | `system_prompt` | `You are a helpful AI Assistant` |
/// | `TAGCALL_MAX_ROUNDS`     | `max_rounds`    | `5`                              |
/// | `TAGCALL_TEMPERATURE`    | `temperature`   | `0`                              |
/// | `TAGCALL_DEDUPE`         | `dedupe`        | `true`                           |
/// | `TAGCALL_BASE_URL`       | `base_url`      | the engine's default             |
/// | `TAGCALL_MODEL`          | `model`         | none, required by the engine     |
/// | `TAGCALL_API_KEY`        | `api_key`       | none                             |
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Heads the system prompt, before the tool instructions.
    pub system_prompt: String,
    /// Maximum number of model replies per prompt.
    pub max_rounds: u32,
    /// Sampling temperature, between 0 and 2.
    pub temperature: f32,
    /// Whether calls repeated within one prompt are skipped.
    pub dedupe: bool,
    /// Base URL of the OpenAI-compatible server.
    pub base_url: Option<String>,
    /// Model identifier served by the engine.
    pub model: Option<String>,
    /// API key, if the server wants one.
    pub api_key: Option<String>,
}

impl Settings {
    /// Loads settings from the process environment.
    #[inline]
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads settings from `lookup`, which maps a variable name to its
    /// value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };
        let mut settings = Settings::default();

        if let Some(prompt) = lookup("TAGCALL_SYSTEM_PROMPT") {
            settings.system_prompt = prompt;
        }
        if let Some(value) = lookup("TAGCALL_MAX_ROUNDS") {
            settings.max_rounds = parse("TAGCALL_MAX_ROUNDS", &value)?;
        }
        if let Some(value) = lookup("TAGCALL_TEMPERATURE") {
            let temperature: f32 = parse("TAGCALL_TEMPERATURE", &value)?;
            if !(0.0..=2.0).contains(&temperature) {
                return Err(SettingsError {
                    name: "TAGCALL_TEMPERATURE",
                    value,
                    reason: "must be between 0 and 2",
                });
            }
            settings.temperature = temperature;
        }
        if let Some(value) = lookup("TAGCALL_DEDUPE") {
            settings.dedupe = parse_flag("TAGCALL_DEDUPE", &value)?;
        }
        settings.base_url = lookup("TAGCALL_BASE_URL");
        settings.model = lookup("TAGCALL_MODEL");
        settings.api_key = lookup("TAGCALL_API_KEY");
        Ok(settings)
    }

    /// Returns the options for running one prompt.
    #[inline]
    pub fn run_options(&self) -> RunOptions {
        RunOptions::default()
            .with_max_rounds(self.max_rounds)
            .with_temperature(self.temperature)
            .with_dedupe(self.dedupe)
    }

    /// Builds the configuration of the OpenAI-compatible engine.
    pub fn openai_config(&self) -> Result<OpenAIConfig, ConfigError> {
        let mut builder = match &self.api_key {
            Some(api_key) => OpenAIConfigBuilder::with_api_key(api_key),
            None => OpenAIConfigBuilder::default(),
        };
        if let Some(model) = &self.model {
            builder = builder.with_model(model);
        }
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        builder.build()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_rounds: 5,
            temperature: 0.0,
            dedupe: true,
            base_url: None,
            model: None,
            api_key: None,
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError {
        name,
        value: value.to_owned(),
        reason: "not a number",
    })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError {
            name,
            value: value.to_owned(),
            reason: "expected true or false",
        }),
    }
}
