//! Error types for chirp

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChirpError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    #[error("Task pool exhausted ({capacity} tasks in use)")]
    TaskPoolExhausted { capacity: usize },

    #[error("Stream buffer underrun")]
    Underrun,

    #[error("Stream I/O failure: {0}")]
    StreamIo(String),

    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("Out of memory: could not reserve {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl ChirpError {
    /// Returns true for failures that only affect a single task.
    ///
    /// Everything else is a configuration or lifecycle misuse and fails the
    /// calling operation.
    pub fn is_task_local(&self) -> bool {
        matches!(
            self,
            Self::Underrun | Self::StreamIo(_) | Self::Decode(_) | Self::TaskPoolExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ChirpError>;
