//! Error types for the recognition pipeline and its collaborators

use thiserror::Error;

/// Errors raised while turning a video or frame sequence into a label
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Could not open video: {0}")]
    VideoOpen(String),

    #[error("Video decode failed: {0}")]
    Decode(String),

    #[error("Landmark extraction failed: {0}")]
    Extraction(#[from] ExtractorError),

    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),

    #[error("Tensor shape ({rows}, {cols}) does not match model input ({expected_rows}, {expected_cols})")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("Frame sequence has {got} frames, at most {max} allowed")]
    TooManyFrames { got: usize, max: usize },

    #[error("Extraction exceeded {0}s budget")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Landmark extractor errors
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("Frame encode error: {0}")]
    Encode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Landmark service returned {status}: {body}")]
    Service { status: u16, body: String },
}

/// Classifier errors
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Classifier returned {got} scores for {expected} labels")]
    ScoreCount { got: usize, expected: usize },

    #[error("Classifier returned no predictions")]
    Empty,
}

/// Configuration errors
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: &str, message: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}
