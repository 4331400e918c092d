//! Error types shared by the copy engine.
//!
//! Chunk-level failures ([`ChunkError`]) are data: they are stored in a
//! [`crate::reader::ChunkResult`] and never abort a copy. Everything in [`Error`] is fatal.

/// Fatal errors of a chunked copy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cannot read source {path:?}: {reason}")]
    SourceUnavailable {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("failed writing destination {path:?}")]
    DestinationWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lost {lost_bytes} bytes ({lost_bytes_percent:.2}%), more than the allowed {max_loss_percent:.2}%")]
    ExcessiveLoss {
        lost_bytes: u64,
        lost_bytes_percent: f64,
        max_loss_percent: f64,
    },
}

/// Reason a single chunk could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("cannot open source for reading: {0}")]
    Open(std::io::Error),

    #[error("cannot seek to offset {offset}: {error}")]
    Seek { offset: u64, error: std::io::Error },

    #[error("read failed: {0}")]
    Read(std::io::Error),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("read task aborted before completing")]
    Aborted,
}
