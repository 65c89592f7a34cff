// src/core/errors.rs

use thiserror::Error;

/// Every failure the scan pipeline can produce.
///
/// Per-target variants (`Transport`, `Protocol`, `Render`, `Analysis`, `Image`)
/// are stringified into `ScanResult::error` and never abort the batch. The
/// startup-level variants (`Config`, `NoTargets`, `BrowserInit`) are the only
/// ones that make a whole run fail.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Network, DNS or TLS failure while talking to the target.
    #[error("transport error: {0}")]
    Transport(String),

    /// The target answered, but in a way the prober refuses to follow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Browsing engine or page failure.
    #[error("render error: {0}")]
    Render(String),

    /// A signature analyzer failed on a result.
    #[error("analyzer '{analyzer}' failed: {reason}")]
    Analysis { analyzer: &'static str, reason: String },

    /// Malformed CIDR or range input.
    #[error("invalid input '{input}': {reason}")]
    Input { input: String, reason: String },

    /// The shared cancellation signal fired.
    #[error("scan cancelled")]
    Cancelled,

    /// Captured bytes could not be decoded into an image.
    #[error("image error: {0}")]
    Image(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no targets left to scan")]
    NoTargets,

    #[error("failed to start browser: {0}")]
    BrowserInit(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    /// Whether a stage-local retry policy may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Transport(_) | ScanError::Render(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}
