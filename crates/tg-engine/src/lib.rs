pub mod batch;
pub mod engine;
pub mod error;
pub mod scripted;

pub use batch::{Batch, BatchEntry};
pub use engine::{ContextParams, InferenceEngine, ModelParams};
pub use error::{EngineError, Result};

/// Token id in a model's vocabulary.
pub type TokenId = u32;
