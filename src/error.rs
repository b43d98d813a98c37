use thiserror::Error;

/// A frame could not be turned into an input tensor. The frame is skipped.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("frame has zero size ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("unsupported channel count {0}, expected 3 or 4")]
    UnsupportedChannels(u32),
    #[error("frame buffer size mismatch: got {got}, expected {expected}")]
    BufferSizeMismatch { got: usize, expected: usize },
    #[error("resize failed: {0}")]
    Resize(String),
}

/// A single model call failed. The previous pose stays current.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },
    #[error("inference backend error: {0}")]
    Backend(String),
    #[error("pose model panicked: {0}")]
    Panicked(String),
}

/// Failures that keep the pipeline from starting at all.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera error: {0}")]
    Camera(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
