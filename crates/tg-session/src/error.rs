use thiserror::Error;

use tg_engine::EngineError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("invalid grammar: {0}")]
    Grammar(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
