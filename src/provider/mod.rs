//! Streaming speech-to-text provider adapters.
//!
//! Two structurally different wire protocols are normalized behind one
//! capability set, selected once at session start:
//! - Deepgram-style: raw little-endian PCM frames over the socket, periodic
//!   keepalive, `speech_final` result markers.
//! - ElevenLabs-style: base64-framed JSON envelopes with server-side
//!   voice-activity commit plus an explicit commit handshake on stop.
//!
//! `connect` opens the socket and returns a command handle implementing
//! [`SpeechStream`] together with the inbound event stream.

pub mod deepgram;
pub mod elevenlabs;
pub mod messages;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SessionError;

/// Which streaming transcription backend a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Deepgram,
    Elevenlabs,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Deepgram => "deepgram",
            ProviderKind::Elevenlabs => "elevenlabs",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deepgram" => Ok(ProviderKind::Deepgram),
            "elevenlabs" => Ok(ProviderKind::Elevenlabs),
            other => anyhow::bail!("unknown STT provider: {}", other),
        }
    }
}

/// Events emitted by a provider connection, in arrival order.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Socket is open and the provider is ready for audio.
    Opened,
    /// A transcript fragment. `is_final` means the provider guarantees the
    /// fragment will not be revised further.
    Transcript { text: String, is_final: bool },
    /// Transport-level failure (surfaced before `Closed` on abnormal close).
    TransportError(String),
    /// The socket closed.
    Closed { code: u16, reason: String },
}

/// Provider connection settings, consumed read-only at session start.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub model: String,
    pub language: String,
    pub sample_rate: u32,
    /// Keepalive cadence while open (Deepgram-style)
    pub keepalive_interval: Duration,
    /// Bounded wait for the commit acknowledgment on stop (ElevenLabs-style)
    pub commit_timeout: Duration,
    /// Override the wss endpoint (used by tests against a local server)
    pub endpoint: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            sample_rate: 16_000,
            keepalive_interval: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(5),
            endpoint: None,
        }
    }
}

/// Capability set shared by both provider variants.
///
/// Handles are cheap command frontends over the socket writer task, so all
/// methods take `&self`; the inbound side is the event receiver returned by
/// [`connect`].
#[async_trait::async_trait]
pub trait SpeechStream: Send + Sync {
    /// Feed one buffer of 16-bit PCM samples.
    async fn feed(&self, samples: &[i16]) -> Result<(), SessionError>;

    /// Ask the provider to finalize and flush buffered audio.
    ///
    /// Best-effort: implementations bound any acknowledgment wait and never
    /// block indefinitely.
    async fn request_commit(&self) -> Result<(), SessionError>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// Open a provider connection of the selected kind.
///
/// Errors here (bad credential, unreachable host) abort session start
/// before RECORDING is ever entered.
pub async fn connect(
    kind: ProviderKind,
    config: &ProviderConfig,
    api_key: &str,
) -> Result<(Box<dyn SpeechStream>, mpsc::Receiver<ProviderEvent>), SessionError> {
    match kind {
        ProviderKind::Deepgram => {
            let (stream, events) = deepgram::connect(config, api_key).await?;
            Ok((Box::new(stream), events))
        }
        ProviderKind::Elevenlabs => {
            let (stream, events) = elevenlabs::connect(config, api_key).await?;
            Ok((Box::new(stream), events))
        }
    }
}

/// Serialize PCM samples as little-endian bytes for the wire.
pub(crate) fn pcm_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
