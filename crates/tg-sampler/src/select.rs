use crate::sampler::{Sampler, TokenLogit};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Greedy selector: keeps the single token with the highest logit.
pub struct GreedySampler;

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        // Sort descending by logit value.
        logits.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(std::cmp::Ordering::Equal));

        // Keep only the top 1.
        logits.truncate(1);
    }
}

/// Distribution selector: converts logits to probabilities via softmax,
/// then draws one token from the resulting distribution.
///
/// The RNG is seeded exactly once at construction and advances across
/// draws, so a fixed seed gives a reproducible token sequence for a
/// whole generation run.
pub struct DistSampler {
    rng: StdRng,
}

impl DistSampler {
    /// Create a selector with a fixed seed for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create a selector seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Sampler for DistSampler {
    fn name(&self) -> &str {
        "dist"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        // Compute softmax probabilities.
        let max_logit = logits
            .iter()
            .map(|t| t.logit)
            .fold(f32::NEG_INFINITY, f32::max);

        let exps: Vec<f32> = logits.iter().map(|t| (t.logit - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();
        let probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

        // Sample from the weighted distribution.
        let dist = match WeightedIndex::new(&probs) {
            Ok(d) => d,
            Err(_) => {
                // Fallback: keep only the first token if weights are invalid.
                logits.truncate(1);
                return;
            }
        };

        let selected = logits[dist.sample(&mut self.rng)].clone();
        logits.clear();
        logits.push(selected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logits(values: &[f32]) -> Vec<TokenLogit> {
        values
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect()
    }

    #[test]
    fn test_greedy_selects_argmax() {
        let mut s = GreedySampler;
        let mut l = logits(&[0.2, 0.9, 0.5]);
        s.apply(&mut l);
        assert_eq!(l.len(), 1);
        assert_eq!(l[0].token_id, 1);
    }

    #[test]
    fn test_dist_selects_one() {
        let mut s = DistSampler::seeded(7);
        let mut l = logits(&[1.0, 1.0, 1.0]);
        s.apply(&mut l);
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn test_dist_same_seed_same_draws() {
        let mut a = DistSampler::seeded(7);
        let mut b = DistSampler::seeded(7);
        for _ in 0..32 {
            let mut la = logits(&[1.0, 0.5, 0.25, 0.1]);
            let mut lb = logits(&[1.0, 0.5, 0.25, 0.1]);
            a.apply(&mut la);
            b.apply(&mut lb);
            assert_eq!(la[0].token_id, lb[0].token_id);
        }
    }

    #[test]
    fn test_dist_overwhelming_peak_wins() {
        let mut s = DistSampler::seeded(0);
        let mut l = logits(&[-10.0, 40.0, -10.0]);
        s.apply(&mut l);
        assert_eq!(l[0].token_id, 1);
    }
}
