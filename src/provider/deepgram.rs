//! Deepgram-style streaming adapter: raw PCM out, JSON results in.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::SessionError;

use super::messages::{DeepgramMessage, CLOSE_STREAM_FRAME, KEEPALIVE_FRAME};
use super::{pcm_le_bytes, ProviderConfig, ProviderEvent, SpeechStream};

const DEFAULT_ENDPOINT: &str = "wss://api.deepgram.com/v1/listen";

/// Close codes the upstream uses for protocol errors, rejected credentials
/// and server faults. Surfaced as transport errors before `Closed`.
const ABNORMAL_CLOSE_CODES: [u16; 3] = [1002, 1008, 1011];

enum Command {
    Audio(Vec<u8>),
    Control(String),
    Shutdown,
}

/// Command handle over an open Deepgram socket.
///
/// A keepalive task sends a no-op control frame on a fixed cadence while the
/// connection is open; the upstream service closes idle sockets after ~10s
/// of silence.
pub struct DeepgramStream {
    cmd_tx: mpsc::Sender<Command>,
    keepalive: JoinHandle<()>,
}

pub(super) async fn connect(
    config: &ProviderConfig,
    api_key: &str,
) -> Result<(DeepgramStream, mpsc::Receiver<ProviderEvent>), SessionError> {
    let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
    let url = format!(
        "{}?model={}&language={}&smart_format=true&interim_results=true\
         &encoding=linear16&sample_rate={}&channels=1",
        endpoint, config.model, config.language, config.sample_rate
    );

    let mut request = url
        .into_client_request()
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let auth = HeaderValue::from_str(&format!("Token {}", api_key))
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, auth);

    info!("Connecting to Deepgram ({} @ {}Hz)", config.model, config.sample_rate);
    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(64);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);

    // Writer task: owns the outbound half of the socket.
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            let result = match cmd {
                Command::Audio(bytes) => sink.send(Message::Binary(bytes)).await,
                Command::Control(text) => sink.send(Message::Text(text)).await,
                Command::Shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                // The reader task surfaces the failure.
                break;
            }
        }
    });

    // Reader task: inbound messages become provider events, in order.
    tokio::spawn(async move {
        let _ = event_tx.send(ProviderEvent::Opened).await;
        let mut close_emitted = false;

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<DeepgramMessage>(&text) {
                    Ok(parsed) if parsed.kind == "Results" => {
                        let transcript = parsed.transcript().unwrap_or("").to_string();
                        if transcript.is_empty() {
                            continue;
                        }
                        // A fragment is final only on speech_final; interim
                        // stability markers never count.
                        let event = ProviderEvent::Transcript {
                            text: transcript,
                            is_final: parsed.speech_final,
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(parsed) => debug!("Ignoring Deepgram {} message", parsed.kind),
                    Err(e) => warn!("Failed to parse Deepgram message: {}", e),
                },
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

    // Keepalive task: prevents the idle-timeout disconnect while open.
    let keepalive_tx = cmd_tx.clone();
    let interval = config.keepalive_interval;
    let keepalive = tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // the first tick fires immediately; skip it
        loop {
            tick.tick().await;
            if keepalive_tx
                .send(Command::Control(KEEPALIVE_FRAME.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    Ok((DeepgramStream { cmd_tx, keepalive }, event_rx))
}

#[async_trait::async_trait]
impl SpeechStream for DeepgramStream {
    async fn feed(&self, samples: &[i16]) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::Audio(pcm_le_bytes(samples)))
            .await
            .map_err(|_| SessionError::Transport("connection closed".into()))
    }

    async fn request_commit(&self) -> Result<(), SessionError> {
        // CloseStream flushes buffered audio; remaining results arrive on
        // the event stream until the server closes.
        self.keepalive.abort();
        self.cmd_tx
            .send(Command::Control(CLOSE_STREAM_FRAME.to_string()))
            .await
            .map_err(|_| SessionError::Transport("connection closed".into()))
    }

    async fn close(&self) {
        self.keepalive.abort();
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

impl Drop for DeepgramStream {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}
