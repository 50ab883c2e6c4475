/// Sampling hyperparameters, fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    /// Logit divisor; 0 or below selects greedy decoding.
    pub temperature: f32,
    /// Nucleus threshold.
    pub top_p: f32,
    /// Candidate cutoff; 0 disables the top-k stage.
    pub top_k: usize,
    /// Repetition penalty factor; 1.0 disables the stage.
    pub repeat_penalty: f32,
    /// How many recent tokens the repetition penalty tracks.
    pub repeat_window: usize,
    /// RNG seed for the random selector. `None` seeds from entropy;
    /// supply a value for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
            repeat_window: 64,
            seed: None,
        }
    }
}

impl SamplingParams {
    /// Greedy decoding: always pick the highest-probability token.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Self::default()
        }
    }
}
