//! Token usage accounting, accumulated across turns within a run.

use serde::{Deserialize, Serialize};

/// Prompt/completion/total token counters for one response or one whole run.
///
/// The wire protocol names the first two `input_tokens` and `output_tokens`;
/// both spellings deserialize into the canonical fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, alias = "input_tokens")]
    pub prompt_tokens: u64,
    #[serde(default, alias = "output_tokens")]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Component-wise addition; missing wire fields default to 0 at decode.
    pub fn add(&mut self, incoming: &Usage) {
        self.prompt_tokens += incoming.prompt_tokens;
        self.completion_tokens += incoming.completion_tokens;
        self.total_tokens += incoming.total_tokens;
    }

    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}
