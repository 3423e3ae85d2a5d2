use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failure` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
        }
    }

    /// Creates a `PresetResponse` that streams `text` in small pieces,
    /// splitting after every whitespace character.
    pub fn with_text(text: &str) -> Self {
        let mut events = vec![];
        let mut piece = String::new();
        for ch in text.chars() {
            piece.push(ch);
            if ch.is_whitespace() {
                events.push(PresetEvent::MessageDelta(std::mem::take(
                    &mut piece,
                )));
            }
        }
        if !piece.is_empty() {
            events.push(PresetEvent::MessageDelta(piece));
        }
        Self::with_events(events)
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Returns the full text this response streams.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(delta) => delta.as_str(),
            })
            .collect()
    }
}
