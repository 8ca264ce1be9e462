//! Error types for PetalSonic Bridge

use crate::backend::BackendError;
use crate::middleware::MiddlewareError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PetalSonicError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Acoustic backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Audio middleware error: {0}")]
    Middleware(#[from] MiddlewareError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Bake error: {0}")]
    Bake(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PetalSonicError>;
