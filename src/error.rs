use thiserror::Error;

/// Failure taxonomy at the controller boundary. Nothing here is fatal to the
/// process: errors degrade a single chat or call and are reflected into
/// observable state (per-chat `load_error`, Failed delivery, toast).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to load chat: {0}")]
    Load(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("microphone permission denied")]
    PermissionDenied,

    /// Returned by `MediaEngine` implementations when the audio path cannot
    /// be established or driven.
    #[error("media engine: {0}")]
    Media(String),

    #[error("api request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("api returned {status}: {body}")]
    ApiStatus { status: u16, body: String },
}

impl CoreError {
    /// User-facing message; keeps URLs and wire details out of toasts.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::PermissionDenied => "Microphone access is required for calls".into(),
            CoreError::Api(_) | CoreError::ApiStatus { .. } => "Network request failed".into(),
            other => other.to_string(),
        }
    }
}
