use std::time::Duration;

/// Errors surfaced by a dictation session.
///
/// `PermissionDenied`, `DeviceUnavailable`, `CredentialMissing` and
/// `Transport` abort the session and release all resources; they are
/// recoverable by starting a new session. Commit and refinement timeouts
/// degrade silently and never reach the caller as errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no usable input device: {0}")]
    DeviceUnavailable(String),

    #[error("no API key configured for {provider}")]
    CredentialMissing { provider: &'static str },

    #[error("network error: {0}")]
    Transport(String),

    #[error("provider commit not acknowledged within {0:?}")]
    CommitTimeout(Duration),

    #[error("no speech detected")]
    EmptyTranscript,

    #[error("a dictation session is already active")]
    AlreadyActive,
}
