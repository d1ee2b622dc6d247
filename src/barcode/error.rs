use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while producing or reading barcode images
#[derive(Debug, Error)]
pub enum BarcodeError {
    #[error("Unsupported barcode format: {0}")]
    UnsupportedFormat(String),

    #[error("Cannot encode payload: {0}")]
    Encoding(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Failed to write image to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type BarcodeResult<T> = std::result::Result<T, BarcodeError>;
