//! Error types for volume and slice operations

use crate::types::DataType;
use thiserror::Error;

/// Main error type for reslicing operations
#[derive(Error, Debug)]
pub enum ResliceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid data type")]
    InvalidDataType,

    #[error("Type mismatch: volume stores {expected}, value is {found}")]
    TypeMismatch { expected: DataType, found: DataType },

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Degenerate vector: {0}")]
    DegenerateVector(String),

    #[error("Volume was released while a slice still referenced it")]
    VolumeReleased,

    #[error("Slice belongs to volume {expected}, got volume {found}")]
    VolumeMismatch { expected: u64, found: u64 },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Specialized Result type for reslicing operations
pub type Result<T> = std::result::Result<T, ResliceError>;

impl From<serde_json::Error> for ResliceError {
    fn from(err: serde_json::Error) -> Self {
        ResliceError::Serialization(err.to_string())
    }
}
