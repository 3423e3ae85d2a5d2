//! Delimiter grammars for tool invocations embedded in model output.
//!
//! A [`Markup`] is the contract between the prompt compiler, which
//! teaches it to the model, and the parser, which reads it back. Swapping
//! grammars only means handing another value to the agent builder.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::parser::FunctionCall;

static JSON_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""name"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex")
});
static TAGGED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<name>(.*?)</name>").expect("valid regex")
});
static TAGGED_ARGUMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<arguments>(.*?)</arguments>").expect("valid regex")
});

/// How the body between the delimiters is laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadFormat {
    /// `{"name": "...", "arguments": {...}}`
    Json,
    /// `<name>...</name><arguments>{...}</arguments>`
    TaggedFields,
}

/// A versioned invocation grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Markup {
    /// Identifies the grammar in logs.
    pub version: &'static str,
    /// Token opening an invocation block.
    pub open: &'static str,
    /// Token closing an invocation block.
    pub close: &'static str,
    /// Layout of the block body.
    pub format: PayloadFormat,
}

impl Markup {
    /// `<tool_call>{"name": "getWeather", "arguments": {...}}</tool_call>`,
    /// the layout many small instruction-tuned models were trained on.
    pub const JSON_TOOL_CALL: Markup = Markup {
        version: "json-tool-call/1",
        open: "<tool_call>",
        close: "</tool_call>",
        format: PayloadFormat::Json,
    };

    /// `<function_call><name>getWeather</name><arguments>{...}</arguments></function_call>`
    pub const XML_FUNCTION_CALL: Markup = Markup {
        version: "xml-function-call/1",
        open: "<function_call>",
        close: "</function_call>",
        format: PayloadFormat::TaggedFields,
    };

    /// Renders an invocation of `name` with `arguments`.
    ///
    /// Every `<` inside the payload is escaped, so no delimiter can show
    /// up before the closing token.
    pub fn encode(&self, name: &str, arguments: &Map<String, Value>) -> String {
        let arguments_json = escape_json(&Value::Object(arguments.clone()));
        match self.format {
            PayloadFormat::Json => {
                let name_json = escape_json(&Value::String(name.to_owned()));
                format!(
                    r#"{}{{"name": {name_json}, "arguments": {arguments_json}}}{}"#,
                    self.open, self.close
                )
            }
            PayloadFormat::TaggedFields => format!(
                "{}<name>{}</name><arguments>{arguments_json}</arguments>{}",
                self.open,
                escape_text(name),
                self.close
            ),
        }
    }

    /// Returns the generic invocation template shown to the model.
    pub fn template(&self) -> String {
        match self.format {
            PayloadFormat::Json => format!(
                r#"{}{{"name": "<tool name>", "arguments": {{<arguments as a JSON object>}}}}{}"#,
                self.open, self.close
            ),
            PayloadFormat::TaggedFields => format!(
                "{}<name>tool name</name><arguments>{{arguments as a JSON object}}</arguments>{}",
                self.open, self.close
            ),
        }
    }

    /// Returns whether `rest`, the text after an opening token, could be
    /// the start of a body in this grammar. Prose following a stray
    /// opening token is not.
    pub(crate) fn may_start_body(&self, rest: &str) -> bool {
        let rest = rest.trim_start();
        if rest.is_empty() || rest.starts_with("```") {
            return true;
        }
        match self.format {
            PayloadFormat::Json => rest.starts_with('{'),
            PayloadFormat::TaggedFields => {
                rest.starts_with("<name>") || "<name>".starts_with(rest)
            }
        }
    }

    /// Decodes the body found between the delimiters.
    ///
    /// Decoding is tolerant: an unreadable argument payload yields a call
    /// with empty arguments. `None` means not even a tool name could be
    /// recovered.
    pub fn decode(&self, body: &str) -> Option<FunctionCall> {
        let (name, arguments) = match self.format {
            PayloadFormat::Json => decode_json(body)?,
            PayloadFormat::TaggedFields => decode_tagged(body)?,
        };
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(FunctionCall {
            name: name.to_owned(),
            arguments,
        })
    }
}

impl Default for Markup {
    #[inline]
    fn default() -> Self {
        Markup::JSON_TOOL_CALL
    }
}

fn decode_json(body: &str) -> Option<(String, Map<String, Value>)> {
    let body = strip_code_fence(body.trim());
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut payload)) => {
            let name = match payload.remove("name") {
                Some(Value::String(name)) => name,
                _ => return None,
            };
            let arguments = payload
                .remove("arguments")
                .or_else(|| payload.remove("parameters"))
                .map(into_arguments)
                .unwrap_or_default();
            Some((name, arguments))
        }
        Ok(_) => None,
        Err(err) => {
            trace!("malformed call payload: {err}");
            let captures = JSON_NAME.captures(body)?;
            let raw = captures.get(1)?.as_str();
            let name = serde_json::from_str::<String>(&format!("\"{raw}\""))
                .unwrap_or_else(|_| raw.to_owned());
            Some((name, Map::new()))
        }
    }
}

fn decode_tagged(body: &str) -> Option<(String, Map<String, Value>)> {
    let name = unescape_text(TAGGED_NAME.captures(body)?.get(1)?.as_str());
    let arguments = TAGGED_ARGUMENTS
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|m| parse_arguments(m.as_str()))
        .unwrap_or_default();
    Some((name, arguments))
}

fn parse_arguments(raw: &str) -> Map<String, Value> {
    let raw = strip_code_fence(raw.trim());
    if raw.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => into_arguments(value),
        Err(err) => {
            trace!("malformed call arguments: {err}");
            Map::new()
        }
    }
}

fn into_arguments(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        // Some models double-encode the arguments as a JSON string.
        Value::String(raw) => parse_arguments(&raw),
        _ => Map::new(),
    }
}

// `<` only occurs inside JSON strings, where `\u003c` decodes to the
// same character.
fn escape_json(value: &Value) -> String {
    value.to_string().replace('<', "\\u003c")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;")
}

fn unescape_text(text: &str) -> String {
    text.replace("&lt;", "<").replace("&amp;", "&")
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
