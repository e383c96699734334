//! Error types for sing-gen-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid configuration (unsupported task, batch size, device count,
    /// decode-option/variant mismatch, ...).
    #[error("config: {0}")]
    Config(String),

    /// A conditioning slot required by the loaded model was not supplied.
    #[error("missing required conditioning: '{0}'")]
    MissingConditioning(&'static str),

    /// Malformed conditioning batch (unknown field, missing text, wrong
    /// batch dimension).
    #[error("batch: {0}")]
    Batch(String),

    /// Failure inside the acoustic model or vocoder. Collaborator errors
    /// pass through unmodified.
    #[error("model: {0}")]
    Model(String),

    /// Failure inside the score preprocessor, or no preprocessor configured.
    #[error("preprocess: {0}")]
    Preprocess(String),

    /// Audio writing error (WAV encode).
    #[error("audio: {0}")]
    Audio(String),

    /// Diagnostic plot rendering error (bad attention rank, PNG encode).
    #[error("plot: {0}")]
    Plot(String),

    /// Pretrained model/vocoder tag resolution error.
    #[error("pretrained: {0}")]
    Pretrained(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for Error {
    fn from(error: hound::Error) -> Self {
        Error::Audio(error.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(error: image::ImageError) -> Self {
        Error::Plot(error.to_string())
    }
}

impl From<hf_hub::api::sync::ApiError> for Error {
    fn from(error: hf_hub::api::sync::ApiError) -> Self {
        Error::Pretrained(error.to_string())
    }
}
