use thiserror::Error;

/// All errors produced by voxscreen-core.
#[derive(Debug, Error)]
pub enum VoxscreenError {
    #[error("malformed inbound frame: {0}")]
    MalformedFrame(String),

    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("recognizer connect failed: {0}")]
    RecognizerConnect(String),

    #[error("recognizer connect timed out after {0:?}")]
    RecognizerTimeout(std::time::Duration),

    #[error("recognizer link closed")]
    RecognizerClosed,

    #[error("reply provider error: {0}")]
    ReplyProvider(String),

    #[error("reply provider timed out after {0:?}")]
    ReplyTimeout(std::time::Duration),

    #[error("playback queue closed")]
    PlaybackClosed,

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxscreenError>;
