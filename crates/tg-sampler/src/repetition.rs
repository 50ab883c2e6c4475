use std::collections::VecDeque;

use crate::sampler::{Sampler, TokenLogit};

/// Applies a repetition penalty to tokens that have appeared recently.
///
/// For tokens found in the acceptance history:
/// - Positive logits are divided by `penalty`.
/// - Negative logits are multiplied by `penalty`.
///
/// This discourages the model from repeating the same tokens. History is
/// fed through `accept` by the generation loop and bounded by `window`;
/// `reset` clears it between independent prompts.
pub struct RepetitionPenaltySampler {
    penalty: f32,
    recent: VecDeque<u32>,
    window: usize,
}

impl RepetitionPenaltySampler {
    /// Create a new repetition penalty sampler.
    ///
    /// - `penalty`: the penalty factor (1.0 = no penalty).
    /// - `window`: maximum number of recent tokens to track.
    pub fn new(penalty: f32, window: usize) -> Self {
        Self {
            penalty,
            recent: VecDeque::with_capacity(window),
            window,
        }
    }
}

impl Sampler for RepetitionPenaltySampler {
    fn name(&self) -> &str {
        "repetition_penalty"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        for token in logits.iter_mut() {
            if self.recent.contains(&token.token_id) {
                if token.logit > 0.0 {
                    token.logit /= self.penalty;
                } else {
                    token.logit *= self.penalty;
                }
            }
        }
    }

    fn accept(&mut self, token: u32) {
        self.recent.push_back(token);
        if self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    fn reset(&mut self) {
        self.recent.clear();
    }
}
