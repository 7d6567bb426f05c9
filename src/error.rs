/// Error taxonomy of the composition pipeline.
///
/// None of these are fatal to the process. Transport and decode errors stay inside the
/// overlay that hit them and show up in its status; plugin-load and index errors are
/// returned from registry calls before any state is touched.
use thiserror::Error;

/// Subscription setup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid topic name '{0}'")]
    InvalidTopic(String),
    #[error("topic '{topic}' carries {advertised}, expected {expected}")]
    TypeMismatch {
        topic: String,
        advertised: String,
        expected: String,
    },
    #[error("unknown image transport '{0}'")]
    UnknownTransport(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// A payload could not be decoded by the plugin bound to it.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginLoadError {
    #[error("unknown plugin class '{0}'")]
    UnknownClass(String),
    #[error("failed to instantiate plugin '{class}': {reason}")]
    Instantiate { class: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("overlay position {position} out of range (registry holds {len})")]
pub struct IndexError {
    pub position: usize,
    pub len: usize,
}

/// Base-image payload could not be turned into a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("raw image truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unsupported pixel encoding '{0}'")]
    UnknownEncoding(String),
    #[error("row step {step} is smaller than {min} bytes")]
    StepTooSmall { step: u32, min: u32 },
    #[error("image of {width}x{height} pixels is too large")]
    TooLarge { width: u32, height: u32 },
    #[error("image has zero width or height")]
    Empty,
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("frequency must be a positive number of hertz, got {0}")]
    InvalidFrequency(f32),
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
