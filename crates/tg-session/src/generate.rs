//! The autoregressive generation loop.
//!
//! One call runs: prompt tokenization, chunked prompt evaluation, then
//! sample / emit / decode one token at a time until end-of-sequence, the
//! token budget, cancellation, or an evaluation failure ends the loop.
//! Evaluation failures never discard text already produced.

use tracing::{debug, info, warn};

use tg_engine::{EngineError, InferenceEngine};

use crate::config::GenerateParams;
use crate::error::Result;
use crate::grammar::TokenFilter;
use crate::session::Session;
use crate::sink::{discard, StreamSink};

/// Why a generation call stopped.
#[derive(Debug)]
pub enum StopReason {
    /// The model emitted the end-of-sequence token.
    Eos,
    /// The token budget ran out.
    MaxTokens,
    /// The cancellation token fired.
    Cancelled,
    /// The prompt encoded to zero tokens; nothing was evaluated.
    EmptyPrompt,
    /// An evaluation step failed; the accumulated text up to that point
    /// is preserved in the result.
    Decode(EngineError),
}

impl StopReason {
    /// Whether the loop ended on an evaluation failure.
    pub fn is_error(&self) -> bool {
        matches!(self, StopReason::Decode(_))
    }
}

/// Result of one generation call.
#[derive(Debug)]
pub struct Generated {
    /// Concatenation of every fragment delivered to the sink.
    pub text: String,
    /// Number of tokens sampled, including the end-of-sequence token.
    pub tokens_generated: usize,
    pub stop: StopReason,
}

impl Generated {
    fn stopped(text: String, tokens_generated: usize, stop: StopReason) -> Self {
        Self {
            text,
            tokens_generated,
            stop,
        }
    }
}

impl<'m, E: InferenceEngine> Session<'m, E> {
    /// Generate a completion for `prompt`, delivering each decoded text
    /// fragment to `sink` as it is produced.
    ///
    /// Blocks the calling thread for the whole loop. Fragments are
    /// delivered synchronously and strictly in generation order; the
    /// returned text is exactly their concatenation.
    pub fn generate(
        &mut self,
        prompt: &str,
        params: &GenerateParams,
        sink: &mut dyn StreamSink,
    ) -> Result<Generated> {
        let engine = &self.model.engine;
        let weights = &self.model.weights;
        let eos = self.model.eos;

        let tokens = engine.encode(weights, prompt, true);
        if tokens.is_empty() {
            debug!("prompt encoded to zero tokens");
            return Ok(Generated::stopped(String::new(), 0, StopReason::EmptyPrompt));
        }
        info!(n_prompt = tokens.len(), "prompt tokenized");

        // Fresh history for every request.
        self.sampler.reset();
        let mut filter = match &params.grammar {
            Some(grammar) => Some(TokenFilter::new(grammar, engine, weights, eos)?),
            None => None,
        };

        // Prompt fill: all tokens staged without logits, chunked to the
        // batch capacity; only the final position produces logits.
        self.batch.clear();
        let mut pos: u32 = 0;
        for &token in &tokens {
            if self.batch.is_full() {
                if let Err(e) = engine.evaluate(weights, &mut self.context, &self.batch) {
                    warn!(error = %e, "prompt evaluation failed");
                    return Ok(Generated::stopped(String::new(), 0, StopReason::Decode(e)));
                }
                self.batch.clear();
            }
            self.batch.push(token, pos, 0, false)?;
            pos += 1;
        }
        self.batch.mark_last_for_logits();
        if let Err(e) = engine.evaluate(weights, &mut self.context, &self.batch) {
            warn!(error = %e, "prompt evaluation failed");
            return Ok(Generated::stopped(String::new(), 0, StopReason::Decode(e)));
        }

        let mut logits_index = self.batch.len() - 1;
        let mut text = String::new();
        let mut n_generated = 0usize;

        while n_generated < params.max_tokens {
            if params.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                info!(n_generated, "generation cancelled");
                return Ok(Generated::stopped(text, n_generated, StopReason::Cancelled));
            }

            let mut logits = match engine.logits(weights, &self.context, logits_index) {
                Ok(logits) => logits,
                Err(e) => {
                    warn!(error = %e, n_generated, "failed to read logits");
                    return Ok(Generated::stopped(text, n_generated, StopReason::Decode(e)));
                }
            };
            if let Some(filter) = &filter {
                filter.mask(&mut logits);
            }

            let token = self.sampler.sample(&logits);
            self.sampler.accept(token);
            if let Some(filter) = filter.as_mut() {
                filter.advance(token);
            }
            n_generated += 1;

            let piece = engine.token_text(weights, token)?;
            let is_eos = token == eos;
            if !piece.is_empty() && (!is_eos || self.config.emit_eos_text) {
                text.push_str(&piece);
                sink.on_fragment(&piece);
            }

            // The end-of-sequence check comes after delivery, matching
            // the fragment ordering callers observe.
            if is_eos {
                info!(n_generated, "end of sequence");
                return Ok(Generated::stopped(text, n_generated, StopReason::Eos));
            }

            self.batch.clear();
            self.batch.push(token, pos, 0, true)?;
            pos += 1;
            if let Err(e) = engine.evaluate(weights, &mut self.context, &self.batch) {
                warn!(error = %e, n_generated, "decode failed, returning partial output");
                return Ok(Generated::stopped(text, n_generated, StopReason::Decode(e)));
            }
            logits_index = 0;
        }

        info!(n_generated, "token budget exhausted");
        Ok(Generated::stopped(text, n_generated, StopReason::MaxTokens))
    }

    /// Generate without streaming: run the loop and return only the
    /// accumulated result.
    pub fn generate_text(&mut self, prompt: &str, params: &GenerateParams) -> Result<Generated> {
        self.generate(prompt, params, &mut discard())
    }
}
