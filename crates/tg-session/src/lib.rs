//! Session lifecycle and streaming generation.
//!
//! A [`Model`] owns an [`InferenceEngine`] plus loaded weights; a
//! [`Session`] borrows the model and owns the context, sampler chain,
//! and batch buffer for one conversation. [`Session::generate`] runs the
//! blocking prompt-fill / sample / decode loop and delivers each decoded
//! fragment to a [`StreamSink`] as it is produced.

pub mod cancel;
pub mod config;
pub mod error;
pub mod generate;
pub mod grammar;
pub mod session;
pub mod sink;

pub use cancel::CancelToken;
pub use config::{
    GenerateParams, SessionConfig, DEFAULT_BATCH_CAPACITY, DEFAULT_CONTEXT_LENGTH,
    DEFAULT_MAX_TOKENS, DEFAULT_THREAD_COUNT,
};
pub use error::{Result, SessionError};
pub use generate::{Generated, StopReason};
pub use grammar::Grammar;
pub use session::{Model, Session};
pub use sink::{discard, StreamSink};

pub use tg_engine::{Batch, ContextParams, EngineError, InferenceEngine, ModelParams, TokenId};
pub use tg_sampler::SamplingParams;
