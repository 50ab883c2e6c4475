use crate::params::SamplingParams;
use crate::repetition::RepetitionPenaltySampler;
use crate::select::{DistSampler, GreedySampler};
use crate::temperature::TemperatureSampler;
use crate::top_k::TopKSampler;
use crate::top_p::TopPSampler;

/// A token ID paired with its logit value.
#[derive(Debug, Clone)]
pub struct TokenLogit {
    pub token_id: u32,
    pub logit: f32,
}

/// Trait for samplers that modify or select from a set of token logits.
pub trait Sampler: Send {
    /// Returns the name of this sampler.
    fn name(&self) -> &str;

    /// Modify logits in-place (filtering, scaling, selecting).
    fn apply(&mut self, logits: &mut Vec<TokenLogit>);

    /// Record a token the generation loop committed to, so history-aware
    /// stages see it exactly once. Default implementation does nothing.
    fn accept(&mut self, _token: u32) {}

    /// Clear any internal history. Default implementation does nothing.
    fn reset(&mut self) {}
}

/// Composes multiple samplers into a pipeline.
/// The last sampler in the chain should be a selector (greedy or random).
pub struct SamplerChain {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerChain {
    /// Create a new empty sampler chain.
    pub fn new() -> Self {
        Self {
            samplers: Vec::new(),
        }
    }

    /// Add a sampler to the end of the chain. Returns self for builder-style usage.
    pub fn with(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.push(sampler);
        self
    }

    /// Assemble the standard pipeline for a parameter set:
    /// repetition penalty, temperature, top-k, top-p, then a selector.
    ///
    /// A temperature of 0 or below selects greedy decoding, which makes the
    /// chain fully deterministic. Otherwise the selector draws from the
    /// softmax distribution using a `StdRng` seeded once at construction
    /// (from `params.seed`, or entropy when unset).
    pub fn for_params(params: &SamplingParams) -> Self {
        let mut chain = Self::new();
        if params.repeat_penalty != 1.0 && params.repeat_window > 0 {
            chain = chain.with(Box::new(RepetitionPenaltySampler::new(
                params.repeat_penalty,
                params.repeat_window,
            )));
        }
        if params.temperature <= 0.0 {
            return chain.with(Box::new(GreedySampler));
        }
        chain
            .with(Box::new(TemperatureSampler::new(params.temperature)))
            .with(Box::new(TopKSampler::new(params.top_k)))
            .with(Box::new(TopPSampler::new(params.top_p)))
            .with(Box::new(match params.seed {
                Some(seed) => DistSampler::seeded(seed),
                None => DistSampler::from_entropy(),
            }))
    }

    /// Run all samplers in order on raw logits, return the selected token ID.
    ///
    /// 1. Converts the `&[f32]` logits into `Vec<TokenLogit>` (token_id = index).
    /// 2. Applies each sampler in sequence.
    /// 3. Returns the first token's id (the selected one).
    pub fn sample(&mut self, logits: &[f32]) -> u32 {
        let mut token_logits: Vec<TokenLogit> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect();

        for sampler in &mut self.samplers {
            sampler.apply(&mut token_logits);
        }

        token_logits.first().map(|t| t.token_id).unwrap_or(0)
    }

    /// Feed the committed token into every history-aware stage.
    pub fn accept(&mut self, token: u32) {
        for sampler in &mut self.samplers {
            sampler.accept(token);
        }
    }

    /// Clear history in every stage. Called before each new generation
    /// request so no state carries across independent prompts.
    pub fn reset(&mut self) {
        for sampler in &mut self.samplers {
            sampler.reset();
        }
    }
}

impl Default for SamplerChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chain_picks_argfirst() {
        let mut chain = SamplerChain::new();
        assert_eq!(chain.sample(&[0.1, 0.2]), 0);
    }

    #[test]
    fn test_greedy_chain_picks_argmax() {
        let mut chain = SamplerChain::for_params(&SamplingParams::greedy());
        assert_eq!(chain.sample(&[0.0, 3.0, 1.0]), 1);
        assert_eq!(chain.sample(&[5.0, 3.0, 1.0]), 0);
    }

    #[test]
    fn test_seeded_chain_is_reproducible() {
        let params = SamplingParams {
            seed: Some(42),
            ..SamplingParams::default()
        };
        let logits = [1.0, 0.9, 0.8, 0.2];
        let mut a = SamplerChain::for_params(&params);
        let mut b = SamplerChain::for_params(&params);
        let picks_a: Vec<u32> = (0..16).map(|_| a.sample(&logits)).collect();
        let picks_b: Vec<u32> = (0..16).map(|_| b.sample(&logits)).collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn test_accept_feeds_repetition_history() {
        let params = SamplingParams {
            temperature: 0.0,
            repeat_penalty: 2.0,
            repeat_window: 8,
            ..SamplingParams::default()
        };
        let mut chain = SamplerChain::for_params(&params);
        let logits = [1.0, 0.9];
        assert_eq!(chain.sample(&logits), 0);
        // Penalizing token 0 makes token 1 win.
        chain.accept(0);
        assert_eq!(chain.sample(&logits), 1);
        // Reset clears history; token 0 wins again.
        chain.reset();
        assert_eq!(chain.sample(&logits), 0);
    }
}
