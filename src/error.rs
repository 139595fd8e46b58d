//! Error types for the skin renderer

use crate::orchestrator::RenderStage;
use thiserror::Error;

/// Result type alias for renderer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering a skin
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request parameters or undecodable skin bytes
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The decoded bitmap does not match the skin atlas layout
    #[error("Invalid skin dimensions: {width}x{height}")]
    InvalidSkinDimensions { width: u32, height: u32 },

    /// The off-screen render did not complete
    #[error("Render failed at {stage}: {cause}")]
    RenderFailed { stage: RenderStage, cause: String },

    /// No browser handle could be obtained, even after re-initialization
    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The texture host has no skin for the requested hash
    #[error("Skin not found: {0}")]
    NotFound(String),

    /// Texture host transport error
    #[cfg(feature = "fetch")]
    #[error("Texture host error: {0}")]
    TextureHost(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a `RenderFailed` error for the given stage from any displayable cause.
    pub fn render_failed(stage: RenderStage, cause: impl std::fmt::Display) -> Self {
        Error::RenderFailed {
            stage,
            cause: cause.to_string(),
        }
    }

    /// Whether the caller is at fault (reported as a client error, never retried).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::InvalidSkinDimensions { .. } | Error::NotFound(_)
        )
    }

    /// HTTP status code the external HTTP layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) | Error::InvalidSkinDimensions { .. } => 400,
            Error::NotFound(_) => 404,
            Error::BrowserUnavailable(_) => 503,
            _ => 500,
        }
    }
}

#[cfg(feature = "fetch")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::TextureHost(err.to_string())
    }
}
