//! Common error types for LZTS components
//!
//! # Design Principles (KISS)
//! - Each component defines its own error enum with thiserror
//! - PipelineError wraps them for the async viewer pipeline and binaries
//! - Per-frame problems are counted and logged, never returned from here

use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::config::ConfigError;
use crate::data_source_emulator::EmulatorError;
use crate::recorder::DataFileError;

/// Errors that stop a pipeline or tool run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Data file could not be read or written
    #[error("Data file error: {0}")]
    DataFile(#[from] DataFileError),

    /// Calibration of a lane failed
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Synthetic data source failed
    #[error("Emulator error: {0}")]
    Emulator(#[from] EmulatorError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send failed (receiver dropped)
    #[error("Channel send failed: receiver dropped")]
    ChannelSend,

    /// Channel receive failed (sender dropped)
    #[error("Channel receive failed: sender dropped")]
    ChannelRecv,

    /// Background task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Create a task error
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;
