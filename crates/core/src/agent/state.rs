use crate::parser::FunctionCall;
use crate::tool::Registry;

/// What the agent is doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AgentStage {
    /// No prompt is being processed.
    #[default]
    Idle,
    /// Waiting for the model to reply in the given round.
    Generating {
        /// The 1-based round number.
        round: u32,
    },
    /// Running the tools the model called in the given round.
    Dispatching {
        /// The 1-based round number.
        round: u32,
        /// How many tools are running.
        calls: usize,
    },
    /// The last prompt has been answered.
    Done,
}

/// Bookkeeping of one `run`, dropped when it returns.
#[derive(Debug, Default)]
pub(crate) struct RoundState {
    pub round: u32,
    pub next_prompt: String,
    pub answer: String,
    pub executed_calls: Vec<FunctionCall>,
    call_log: Vec<FunctionCall>,
}

impl RoundState {
    #[inline]
    pub fn new(prompt: String) -> Self {
        Self {
            next_prompt: prompt,
            ..Default::default()
        }
    }

    /// Picks the calls worth executing: known tools only and, when `dedupe`
    /// is set, none issued in an earlier round.
    ///
    /// Every parsed call lands in the log, executed or not.
    pub fn select_candidates(
        &mut self,
        calls: Vec<FunctionCall>,
        registry: &Registry,
        dedupe: bool,
    ) -> Vec<FunctionCall> {
        let mut candidates = vec![];
        for call in &calls {
            if !registry.contains(&call.name) {
                debug!("ignoring call to unknown tool `{}`", call.name);
                continue;
            }
            if dedupe && self.call_log.contains(call) {
                debug!("skipping duplicated call to `{}`", call.name);
                continue;
            }
            candidates.push(call.clone());
        }
        if dedupe {
            self.call_log.extend(calls);
        }
        candidates
    }
}
