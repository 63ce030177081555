use std::time::Duration;

use crate::audio::CaptureConstraints;
use crate::provider::{ProviderConfig, ProviderKind};

/// Configuration for one dictation session, consumed read-only at start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Which streaming STT backend to use
    pub provider: ProviderKind,

    /// Provider connection settings (model, language, timeouts)
    pub provider_config: ProviderConfig,

    /// Microphone constraints (always mono 16kHz for provider compatibility)
    pub constraints: CaptureConstraints,

    /// Delay between hiding the UI and delivering text, so window focus can
    /// return to the target application before the insert happens
    pub settle_delay: Duration,

    /// Budget for draining remaining provider events after a commit request
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Deepgram,
            provider_config: ProviderConfig::default(),
            constraints: CaptureConstraints::default(),
            settle_delay: Duration::from_millis(250),
            drain_timeout: Duration::from_secs(5),
        }
    }
}
