//! ElevenLabs-style streaming adapter: base64-framed JSON envelopes with
//! server-side voice-activity commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::error::SessionError;

use super::messages::{CommitRequest, ElevenLabsMessage, InputAudioChunk};
use super::{pcm_le_bytes, ProviderConfig, ProviderEvent, SpeechStream};

const DEFAULT_ENDPOINT: &str = "wss://api.elevenlabs.io/v1/speech-to-text/realtime";

const ABNORMAL_CLOSE_CODES: [u16; 3] = [1002, 1008, 1011];

enum Command {
    Envelope(String),
    Shutdown,
}

/// Command handle over an open ElevenLabs socket.
///
/// The server auto-commits on voice activity; `request_commit` additionally
/// forces finalization on stop and waits (bounded) for the committed
/// transcript before the caller closes.
pub struct ElevenLabsStream {
    cmd_tx: mpsc::Sender<Command>,
    committed: Arc<Notify>,
    commit_outstanding: Arc<AtomicBool>,
    commit_timeout: Duration,
}

pub(super) async fn connect(
    config: &ProviderConfig,
    api_key: &str,
) -> Result<(ElevenLabsStream, mpsc::Receiver<ProviderEvent>), SessionError> {
    let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
    let url = format!(
        "{}?model_id={}&language={}&commit_strategy=vad&audio_format=pcm_{}",
        endpoint, config.model, config.language, config.sample_rate
    );

    let mut request = url
        .into_client_request()
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let key = HeaderValue::from_str(api_key)
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    request.headers_mut().insert("xi-api-key", key);

    info!("Connecting to ElevenLabs ({} @ {}Hz)", config.model, config.sample_rate);
    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(64);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
    let committed = Arc::new(Notify::new());

    // Writer task: owns the outbound half of the socket.
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            let result = match cmd {
                Command::Envelope(json) => sink.send(Message::Text(json)).await,
                Command::Shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Reader task: envelopes become provider events, in order.
    let committed_signal = Arc::clone(&committed);
    tokio::spawn(async move {
        let _ = event_tx.send(ProviderEvent::Opened).await;
        let mut close_emitted = false;

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let parsed = match serde_json::from_str::<ElevenLabsMessage>(&text) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("Failed to parse ElevenLabs message: {}", e);
                            continue;
                        }
                    };
                    match parsed.message_type.as_str() {
                        "partial_transcript" => {
                            let transcript = parsed.transcript().to_string();
                            if transcript.is_empty() {
                                continue;
                            }
                            let event = ProviderEvent::Transcript {
                                text: transcript,
                                is_final: false,
                            };
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        "committed_transcript" => {
                            let transcript = parsed.transcript().to_string();
                            if !transcript.is_empty() {
                                let event = ProviderEvent::Transcript {
                                    text: transcript,
                                    is_final: true,
                                };
                                if event_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            // Wake a pending commit wait even when the
                            // committed text was empty.
                            committed_signal.notify_one();
                        }
                        "error" => {
                            let cause = parsed
                                .error
                                .clone()
                                .unwrap_or_else(|| parsed.transcript().to_string());
                            let _ = event_tx.send(ProviderEvent::TransportError(cause)).await;
                        }
                        other => warn!("Ignoring ElevenLabs {} message", other),
                    }
                }
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    if ABNORMAL_CLOSE_CODES.contains(&code) {
                        let _ = event_tx
                            .send(ProviderEvent::TransportError(format!(
                                "abnormal close {}: {}",
                                code, reason
                            )))
                            .await;
                    }
                    let _ = event_tx.send(ProviderEvent::Closed { code, reason }).await;
                    close_emitted = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = event_tx
                        .send(ProviderEvent::TransportError(e.to_string()))
                        .await;
                    let _ = event_tx
                        .send(ProviderEvent::Closed {
                            code: 1006,
                            reason: "connection lost".into(),
                        })
                        .await;
                    close_emitted = true;
                    break;
                }
            }
        }

        if !close_emitted {
            let _ = event_tx
                .send(ProviderEvent::Closed {
                    code: 1006,
                    reason: "stream ended".into(),
                })
                .await;
        }
    });

    Ok((
        ElevenLabsStream {
            cmd_tx,
            committed,
            commit_outstanding: Arc::new(AtomicBool::new(false)),
            commit_timeout: config.commit_timeout,
        },
        event_rx,
    ))
}

impl ElevenLabsStream {
    async fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<(), SessionError> {
        let json =
            serde_json::to_string(value).map_err(|e| SessionError::Transport(e.to_string()))?;
        self.cmd_tx
            .send(Command::Envelope(json))
            .await
            .map_err(|_| SessionError::Transport("connection closed".into()))
    }
}

#[async_trait::async_trait]
impl SpeechStream for ElevenLabsStream {
    async fn feed(&self, samples: &[i16]) -> Result<(), SessionError> {
        let chunk = InputAudioChunk::new(&pcm_le_bytes(samples), false);
        self.send_json(&chunk).await
    }

    async fn request_commit(&self) -> Result<(), SessionError> {
        self.commit_outstanding.store(true, Ordering::SeqCst);
        let acknowledged = self.committed.notified();

        // A zero-length chunk with the commit flag forces finalization of
        // whatever the server still buffers, then the explicit request.
        self.send_json(&InputAudioChunk::empty_commit()).await?;
        self.send_json(&CommitRequest::new()).await?;

        // Best-effort: close proceeds even when no acknowledgment arrives.
        if tokio::time::timeout(self.commit_timeout, acknowledged)
            .await
            .is_err()
        {
            warn!(
                "{}, closing anyway",
                SessionError::CommitTimeout(self.commit_timeout)
            );
        }
        self.commit_outstanding.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}
