//! Central error types for ggufize.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid file magic: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("invalid type: {0}")]
    InvalidType(u32),

    #[error("improper type for '{0}'")]
    ImproperType(String),

    #[error("invalid tensor name: {0:?}")]
    InvalidTensorName(String),

    #[error("unknown architecture")]
    UnknownArchitecture,

    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("unknown tensor format")]
    UnknownTensorFormat,

    #[error("truncated input")]
    Truncated,

    #[error("invalid tensor data: {0}")]
    InvalidTensorData(String),
}
