use thiserror::Error;

pub type Result<T, E = SightlineError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum SightlineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("camera access error: {0}")]
    CameraAccess(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("backend error [{code}]: {message}")]
    Backend { message: String, code: String },
    #[error("invalid backend response: {0}")]
    Decode(String),
    #[error("history load error: {0}")]
    HistoryLoad(String),
    #[error("overlay error: {0}")]
    Overlay(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SightlineError {
    /// Short category name used when the error is surfaced as a notification.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::CameraAccess(_) => "camera",
            Self::Capture(_) => "capture",
            Self::Network(_) => "network",
            Self::Backend { .. } => "backend",
            Self::Decode(_) => "decode",
            Self::HistoryLoad(_) => "history",
            Self::Overlay(_) => "overlay",
            Self::Session(_) => "session",
            Self::Ops(_) => "ops",
            Self::Other(_) => "other",
        }
    }
}
