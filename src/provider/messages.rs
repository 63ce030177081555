use base64::Engine;
use serde::{Deserialize, Serialize};

// ============================================================================
// Deepgram wire format
// ============================================================================

/// Control frames sent to Deepgram: a periodic no-op while open, and a
/// close request on stop. Audio itself travels as raw binary frames.
pub const KEEPALIVE_FRAME: &str = r#"{"type":"KeepAlive"}"#;
pub const CLOSE_STREAM_FRAME: &str = r#"{"type":"CloseStream"}"#;

/// Inbound Deepgram message (`type` is "Metadata" or "Results").
#[derive(Debug, Deserialize)]
pub struct DeepgramMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<DeepgramChannel>,
    /// True only when the provider guarantees the fragment is complete.
    /// Distinct from interim stability markers, which are never final.
    #[serde(default)]
    pub speech_final: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeepgramChannel {
    #[serde(default)]
    pub alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
pub struct DeepgramAlternative {
    #[serde(default)]
    pub transcript: String,
}

impl DeepgramMessage {
    /// Best transcript for a Results message, if any.
    pub fn transcript(&self) -> Option<&str> {
        self.channel
            .as_ref()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.as_str())
    }
}

// ============================================================================
// ElevenLabs wire format
// ============================================================================

/// Outbound audio envelope. Every chunk carries base64 PCM and a commit
/// flag; the stop path sends one zero-length chunk with `commit: true`.
#[derive(Debug, Serialize)]
pub struct InputAudioChunk {
    pub message_type: &'static str,
    pub audio_chunk: String,
    pub commit: bool,
}

impl InputAudioChunk {
    pub fn new(pcm_bytes: &[u8], commit: bool) -> Self {
        Self {
            message_type: "input_audio_chunk",
            audio_chunk: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
            commit,
        }
    }

    pub fn empty_commit() -> Self {
        Self::new(&[], true)
    }
}

/// Outbound explicit commit request.
#[derive(Debug, Serialize)]
pub struct CommitRequest {
    pub message_type: &'static str,
}

impl CommitRequest {
    pub fn new() -> Self {
        Self {
            message_type: "commit",
        }
    }
}

impl Default for CommitRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound ElevenLabs envelope (`message_type` is "partial_transcript",
/// "committed_transcript" or "error").
#[derive(Debug, Deserialize)]
pub struct ElevenLabsMessage {
    pub message_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ElevenLabsMessage {
    /// The transcript payload, wherever the server put it.
    pub fn transcript(&self) -> &str {
        self.text
            .as_deref()
            .or(self.transcript.as_deref())
            .unwrap_or("")
    }
}
