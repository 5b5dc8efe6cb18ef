//! Error types for container loading and GPU upload.

use crate::backend::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while loading a model or uploading it to the GPU.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The container file could not be opened.
    #[error("Failed to open {path:?}: {source}")]
    Argument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file does not start with the `MSHL` prolog.
    #[error("Invalid container prolog: {found:#010x}")]
    Format { found: u32 },
    /// The container version is not supported.
    #[error("Unsupported container version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    /// The input ended before the named section was complete.
    #[error("Unexpected end of input while reading {section}")]
    Truncated { section: &'static str },
    /// A table entry or byte range is inconsistent with the rest of the container.
    #[error("Corrupt container: {0}")]
    Corrupt(String),
    /// A vertex element uses a format the loader cannot interpret.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("GPU upload failed: {0}")]
    Gpu(#[from] BackendError),
}

pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
