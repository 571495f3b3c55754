//! Error types shared by the hasher, feature extractor, decoder, trainer
//! and model I/O.

use thiserror::Error;

/// Everything that can go wrong inside the tagging engine.
#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("malformed input at byte offset {offset}")]
    MalformedInput { offset: u64 },

    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("model file is not a valid weight vector ({len_bytes} bytes is not a multiple of 4, or not a power-of-two element count)")]
    ModelFormat { len_bytes: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("sentence count overflow (> 0x100000 sentences)")]
    Overflow,
}

pub type Result<T> = std::result::Result<T, TaggerError>;
