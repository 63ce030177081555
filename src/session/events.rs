use serde::Serialize;

/// Dictation session lifecycle states.
///
/// `Idle → Connecting → Recording → Stopping → Idle`, with `Error` as a
/// short-lived exit taken from any state before returning to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Recording,
    Stopping,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Notifications published on the controller's broadcast channel.
///
/// Observers subscribe instead of reading ambient state; a `StateChanged`
/// supersedes any transient `Status` message shown for the previous state.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Short transient user-facing message ("connecting", "network error",
    /// "no speech detected", ...).
    Status(String),
    /// Live amplitude (RMS, 0.0..=1.0) for visualization.
    Level(f32),
    /// Elapsed whole seconds while recording.
    Tick(u64),
    /// The final text left the session.
    Delivered { text: String, inserted: bool },
}
