use tg_sampler::SamplingParams;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::grammar::Grammar;

pub const DEFAULT_CONTEXT_LENGTH: usize = 2048;
pub const DEFAULT_THREAD_COUNT: usize = 4;
pub const DEFAULT_BATCH_CAPACITY: usize = 512;
pub const DEFAULT_MAX_TOKENS: usize = 256;

/// Configuration fixed for the lifetime of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum sequence length the context's cache can hold.
    pub context_length: usize,
    /// Threads the engine may use inside one evaluation step.
    /// A value of 0 is normalized to the default at session start.
    pub threads: usize,
    /// Capacity of the batch staging buffer.
    pub batch_capacity: usize,
    /// Sampling policy, fixed at session start.
    pub sampling: SamplingParams,
    /// Whether the end-of-sequence token's text (when the tokenizer maps
    /// it to visible text) is appended and delivered to the sink. The
    /// reference behavior delivers it, so this defaults to true.
    pub emit_eos_text: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_length: DEFAULT_CONTEXT_LENGTH,
            threads: DEFAULT_THREAD_COUNT,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            sampling: SamplingParams::default(),
            emit_eos_text: true,
        }
    }
}

impl SessionConfig {
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_context_length(mut self, context_length: usize) -> Self {
        self.context_length = context_length;
        self
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    /// Upper bound on generated tokens; the loop always terminates within
    /// this budget.
    pub max_tokens: usize,
    /// Optional formal grammar restricting the candidate token set.
    pub grammar: Option<Grammar>,
    /// Optional cancellation flag checked once per generated token.
    pub cancel: Option<CancelToken>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl GenerateParams {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            grammar: None,
            cancel: None,
        }
    }

    /// Parse and attach a grammar. Fails before any engine work if the
    /// grammar text is malformed.
    pub fn with_grammar(mut self, text: &str) -> Result<Self> {
        self.grammar = Some(Grammar::parse(text)?);
        Ok(self)
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
