use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Failures raised while processing a run.
///
/// Only [`PipelineError::NotFound`] is fatal. Every other variant is caught at
/// the per-file boundary, logged with the offending path and recorded in
/// [`RunStatistics`](crate::pipeline::RunStatistics).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inference timed out after {}s", .0.as_secs())]
    InferenceTimeout(Duration),

    #[error("inference request failed: {0}")]
    Inference(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("metadata error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid tag value: {0}")]
    InvalidTag(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts the whole run instead of a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::InvalidTag(_))
    }
}

/// Failures decoding or re-encoding a metadata block.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{0} files cannot carry EXIF metadata")]
    Unsupported(&'static str),

    #[error("unrecognized image format: {0}")]
    UnknownFormat(String),

    #[error("failed to parse {format} container: {message}")]
    Container {
        format: &'static str,
        message: String,
    },

    #[error("invalid TIFF data: {0}")]
    InvalidTiff(String),

    #[error("EXIF block too large for a JPEG segment ({0} bytes)")]
    SegmentTooLarge(usize),
}
