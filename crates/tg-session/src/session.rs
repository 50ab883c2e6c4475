use std::path::Path;

use tracing::{debug, info};

use tg_engine::{Batch, ContextParams, InferenceEngine, ModelParams, TokenId};
use tg_sampler::SamplerChain;

use crate::config::{SessionConfig, DEFAULT_THREAD_COUNT};
use crate::error::{Result, SessionError};

/// A loaded model: owns the engine and the engine's weights handle.
///
/// Dropping the model releases the weights. The borrow handed out by
/// `start_session` guarantees no session (context, sampler, batch)
/// outlives the model, and the `&mut` receiver guarantees at most one
/// live session per model.
pub struct Model<E: InferenceEngine> {
    pub(crate) engine: E,
    pub(crate) weights: E::Model,
    pub(crate) eos: TokenId,
}

impl<E: InferenceEngine> std::fmt::Debug for Model<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").finish_non_exhaustive()
    }
}

impl<E: InferenceEngine> Model<E> {
    /// Load model weights from a file path.
    pub fn load(engine: E, path: impl AsRef<Path>, params: &ModelParams) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), gpu_layers = params.gpu_layers, "loading model");
        let weights = engine.load_model(path, params)?;
        let eos = engine.eos_token(&weights);
        info!(vocab_size = engine.vocab_size(&weights), "model loaded");
        Ok(Self {
            engine,
            weights,
            eos,
        })
    }

    /// Allocate a context, sampler, and batch buffer for one generation
    /// session.
    ///
    /// Nothing is left half-initialized on failure: the pieces built so
    /// far are released before the error is returned.
    pub fn start_session(&mut self, config: SessionConfig) -> Result<Session<'_, E>> {
        let mut config = config;
        if config.context_length == 0 {
            return Err(SessionError::Config(
                "context length must be positive".to_string(),
            ));
        }
        if config.batch_capacity == 0 {
            return Err(SessionError::Config(
                "batch capacity must be positive".to_string(),
            ));
        }
        if config.threads == 0 {
            debug!(default = DEFAULT_THREAD_COUNT, "thread count not set, using default");
            config.threads = DEFAULT_THREAD_COUNT;
        }

        let ctx_params = ContextParams {
            context_length: config.context_length,
            batch_size: config.batch_capacity,
            threads: config.threads,
        };
        let context = self.engine.create_context(&self.weights, &ctx_params)?;
        let sampler = SamplerChain::for_params(&config.sampling);
        let batch = Batch::with_capacity(config.batch_capacity);
        info!(
            context_length = config.context_length,
            threads = config.threads,
            "session started"
        );

        let model: &Self = self;
        Ok(Session {
            model,
            context,
            sampler,
            batch,
            config,
        })
    }

    /// Diagnostic: number of tokens the prompt encodes to (including the
    /// begin-of-sequence marker).
    pub fn count_tokens(&self, text: &str) -> usize {
        self.engine.encode(&self.weights, text, true).len()
    }

    /// Diagnostic: engine build/version/capability summary.
    pub fn system_info(&self) -> String {
        self.engine.system_info()
    }

    /// The designated end-of-sequence token id.
    pub fn eos_token(&self) -> TokenId {
        self.eos
    }
}

/// One generation session: context, sampler, and batch buffer over a
/// borrowed model.
///
/// Dropping the session releases its members before the model borrow
/// ends, so teardown ordering cannot be gotten wrong. `end` is the
/// explicit spelling of that drop.
pub struct Session<'m, E: InferenceEngine> {
    pub(crate) model: &'m Model<E>,
    pub(crate) context: E::Context,
    pub(crate) sampler: SamplerChain,
    pub(crate) batch: Batch,
    pub(crate) config: SessionConfig,
}

impl<'m, E: InferenceEngine> std::fmt::Debug for Session<'m, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl<'m, E: InferenceEngine> Session<'m, E> {
    /// Release the session's context, sampler, and batch buffer.
    pub fn end(self) {
        info!("session ended");
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
