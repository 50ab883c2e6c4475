use std::path::Path;

use crate::batch::Batch;
use crate::error::Result;
use crate::TokenId;

/// Parameters for loading model weights.
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Number of layers to offload to an accelerator; 0 keeps everything on CPU.
    pub gpu_layers: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self { gpu_layers: 0 }
    }
}

/// Parameters for allocating an evaluation context.
#[derive(Debug, Clone)]
pub struct ContextParams {
    /// Maximum sequence length the context's cache can hold.
    pub context_length: usize,
    /// Maximum number of tokens submitted in one evaluation call.
    pub batch_size: usize,
    /// Threads the engine may use inside one evaluation step.
    pub threads: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            context_length: 2048,
            batch_size: 512,
            threads: 4,
        }
    }
}

/// Trait for engines that can evaluate token batches against a loaded model.
///
/// Implementations own the tensor math, the model file format, and the
/// vocabulary. Callers never see logits for positions that were not flagged
/// for output in the submitted batch.
///
/// `Model` and `Context` release their native resources on `Drop`; a context
/// must not outlive the model it was created from, which callers express by
/// borrowing the model for the context's lifetime.
pub trait InferenceEngine {
    /// Loaded weights plus vocabulary. Immutable once loaded.
    type Model;
    /// Running attention/key-value cache and position state for one session.
    type Context;

    /// Load model weights from a file path.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model>;

    /// Allocate a fresh evaluation context for a model.
    fn create_context(&self, model: &Self::Model, params: &ContextParams) -> Result<Self::Context>;

    /// Evaluate one batch, advancing the context's cache.
    ///
    /// Rejects the batch with `EngineError::Decode` if it does not fit the
    /// remaining context window or its positions are not contiguous with the
    /// tokens already evaluated.
    fn evaluate(&self, model: &Self::Model, context: &mut Self::Context, batch: &Batch)
        -> Result<()>;

    /// Logits over the vocabulary at a batch position flagged for output
    /// in the most recently evaluated batch.
    fn logits(&self, model: &Self::Model, context: &Self::Context, position: usize)
        -> Result<Vec<f32>>;

    /// Convert text to token ids, optionally prepending the begin-of-sequence
    /// marker.
    fn encode(&self, model: &Self::Model, text: &str, add_bos: bool) -> Vec<TokenId>;

    /// Convert one token id to its UTF-8 text.
    ///
    /// Control tokens decode to an empty string. An out-of-range id is
    /// `EngineError::InvalidToken`.
    fn token_text(&self, model: &Self::Model, token: TokenId) -> Result<String>;

    /// The designated end-of-sequence token id.
    fn eos_token(&self, model: &Self::Model) -> TokenId;

    /// Number of entries in the vocabulary.
    fn vocab_size(&self, model: &Self::Model) -> usize;

    /// Build/version/capability summary for diagnostics.
    fn system_info(&self) -> String;
}
