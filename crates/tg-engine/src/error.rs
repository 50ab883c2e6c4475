use std::path::PathBuf;
use thiserror::Error;

use crate::TokenId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("failed to initialize context: {0}")]
    ContextInit(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    InvalidToken { id: TokenId, vocab_size: usize },
    #[error("batch is full (capacity {capacity})")]
    BatchFull { capacity: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
