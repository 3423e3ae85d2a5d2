use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::parser::FunctionCall;

/// Options of a single [`Agent::run`](super::Agent::run).
#[derive(Clone)]
pub struct RunOptions {
    pub(crate) max_rounds: u32,
    pub(crate) temperature: f32,
    pub(crate) dedupe: bool,
    pub(crate) on_engine_ready: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RunOptions {
    /// Sets the maximum number of model replies. Calls made in the last
    /// allowed round are not executed. Defaults to 5.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Sets the sampling temperature. Defaults to 0.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Enables skipping calls identical to one issued in an earlier round
    /// of the same run. Disabled by default, which lets the model retry a
    /// call at the risk of looping until the round limit.
    #[inline]
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Sets a callback invoked in every round once the engine is ready to
    /// stream its reply.
    #[inline]
    pub fn on_engine_ready(
        mut self,
        on_engine_ready: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_engine_ready = Some(Arc::new(on_engine_ready));
        self
    }

    /// Returns the maximum number of rounds.
    #[inline]
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Returns the sampling temperature.
    #[inline]
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Returns whether duplicated calls are skipped.
    #[inline]
    pub fn dedupe(&self) -> bool {
        self.dedupe
    }
}

impl Default for RunOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_rounds: 5,
            temperature: 0.0,
            dedupe: false,
            on_engine_ready: None,
        }
    }
}

impl Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("max_rounds", &self.max_rounds)
            .field("temperature", &self.temperature)
            .field("dedupe", &self.dedupe)
            .finish_non_exhaustive()
    }
}

/// What a run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    /// The final answer. Never empty: the agent's fallback answer is used
    /// when the model produced no text.
    pub answer: String,
    /// Whether `answer` is the fallback answer.
    pub is_fallback: bool,
    /// Number of model replies consumed.
    pub rounds: u32,
    /// Tool calls whose handler was started, in the order they were
    /// issued. Calls rejected by argument validation are not included.
    pub executed_calls: Vec<FunctionCall>,
}
