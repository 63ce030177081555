use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audio::{rms_level, AudioCapture, CpalCapture};
use crate::config::Credentials;
use crate::delivery::{DeliveryOutcome, TextDelivery};
use crate::error::SessionError;
use crate::provider::{self, ProviderConfig, ProviderEvent, ProviderKind, SpeechStream};
use crate::refine::Refine;

use super::config::SessionConfig;
use super::events::{SessionEvent, SessionState};
use super::transcript::TranscriptAssembler;

/// Factory producing a fresh capture backend per session.
pub type CaptureFactory = Box<dyn Fn() -> Box<dyn AudioCapture> + Send + Sync>;

type ConnectResult = Result<(Box<dyn SpeechStream>, mpsc::Receiver<ProviderEvent>), SessionError>;

/// Factory opening a provider connection per session.
pub type ProviderFactory = Box<
    dyn Fn(ProviderKind, ProviderConfig, String) -> futures::future::BoxFuture<'static, ConnectResult>
        + Send
        + Sync,
>;

/// The dictation session orchestrator.
///
/// Owns every collaborator for one capture-to-delivery cycle and enforces
/// the lifecycle `Idle → Connecting → Recording → Stopping → Idle` (with an
/// `Error` exit back to `Idle` from any state). At most one session is
/// active at a time, and the previous session's microphone and socket are
/// fully torn down before a new one may open — both guaranteed structurally
/// by ownership, not by ad-hoc checks.
///
/// Observers subscribe to a broadcast of [`SessionEvent`]s; there is no
/// ambient shared state.
pub struct SessionController {
    config: SessionConfig,
    credentials: Credentials,
    refiner: Arc<dyn Refine>,
    delivery: Arc<dyn TextDelivery>,
    capture_factory: CaptureFactory,
    provider_factory: ProviderFactory,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    active: Option<ActiveSession>,
}

struct ActiveSession {
    id: Uuid,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SessionController {
    /// Create a controller with the default backends: cpal microphone
    /// capture and real provider sockets.
    pub fn new(
        config: SessionConfig,
        credentials: Credentials,
        refiner: Arc<dyn Refine>,
        delivery: Arc<dyn TextDelivery>,
    ) -> Self {
        let capture_factory: CaptureFactory = Box::new(|| Box::new(CpalCapture::new()));
        let provider_factory: ProviderFactory = Box::new(|kind, config, key| {
            Box::pin(async move { provider::connect(kind, &config, &key).await })
        });
        Self::with_backends(
            config,
            credentials,
            refiner,
            delivery,
            capture_factory,
            provider_factory,
        )
    }

    /// Create a controller with injected capture and provider backends.
    pub fn with_backends(
        config: SessionConfig,
        credentials: Credentials,
        refiner: Arc<dyn Refine>,
        delivery: Arc<dyn TextDelivery>,
        capture_factory: CaptureFactory,
        provider_factory: ProviderFactory,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            credentials,
            refiner,
            delivery,
            capture_factory,
            provider_factory,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            events,
            active: None,
        }
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new dictation session.
    ///
    /// Rejected with [`SessionError::AlreadyActive`] unless the controller
    /// is idle. Acquires the microphone and opens the provider connection;
    /// any failure on that path releases everything and returns the
    /// controller to idle.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if let Some(active) = &self.active {
            if active.handle.is_finished() {
                // Previous session already wound down on its own.
                self.active = None;
            } else {
                return Err(SessionError::AlreadyActive);
            }
        }

        let id = Uuid::new_v4();
        info!(session_id = %id, provider = %self.config.provider, "Starting dictation session");
        self.set_state(SessionState::Connecting);
        self.emit_status("connecting");

        let key = match self.credentials.for_provider(self.config.provider) {
            Some(k) => k.to_string(),
            None => {
                let e = SessionError::CredentialMissing {
                    provider: self.config.provider.as_str(),
                };
                self.fail_start(&e);
                return Err(e);
            }
        };

        let mut capture = (self.capture_factory)();
        let frames = match capture.start(&self.config.constraints).await {
            Ok(rx) => rx,
            Err(e) => {
                self.fail_start(&e);
                return Err(e);
            }
        };

        let connect = (self.provider_factory)(
            self.config.provider,
            self.config.provider_config.clone(),
            key,
        );
        let (stream, provider_events) = match connect.await {
            Ok(pair) => pair,
            Err(e) => {
                capture.stop().await;
                self.fail_start(&e);
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = SessionRun {
            id,
            config: self.config.clone(),
            capture,
            frames,
            stream,
            provider_events,
            refiner: Arc::clone(&self.refiner),
            delivery: Arc::clone(&self.delivery),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            stop_rx,
        };
        let handle = tokio::spawn(ctx.run());
        self.active = Some(ActiveSession { id, stop_tx, handle });
        Ok(())
    }

    /// Request a stop and wait for the session to wind down.
    ///
    /// A no-op when no session is active or a stop is already in flight,
    /// so duplicate stop requests have no observable effect.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        info!(session_id = %active.id, "Stop requested");
        let _ = active.stop_tx.send(true);
        if let Err(e) = active.handle.await {
            error!(session_id = %active.id, "Session task panicked: {}", e);
            self.set_state(SessionState::Idle);
        }
    }

    fn fail_start(&mut self, cause: &SessionError) {
        warn!("Session start failed: {}", cause);
        self.set_state(SessionState::Error);
        self.emit_status(&cause.to_string());
        self.set_state(SessionState::Idle);
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    fn emit_status(&self, message: &str) {
        let _ = self.events.send(SessionEvent::Status(message.to_string()));
    }
}

/// Everything one running session owns. Dropped (and therefore fully
/// released) when the run loop returns.
struct SessionRun {
    id: Uuid,
    config: SessionConfig,
    capture: Box<dyn AudioCapture>,
    frames: mpsc::Receiver<crate::audio::AudioFrame>,
    stream: Box<dyn SpeechStream>,
    provider_events: mpsc::Receiver<ProviderEvent>,
    refiner: Arc<dyn Refine>,
    delivery: Arc<dyn TextDelivery>,
    events: broadcast::Sender<SessionEvent>,
    state: Arc<Mutex<SessionState>>,
    stop_rx: watch::Receiver<bool>,
}

enum RunOutcome {
    /// User-requested stop: commit, drain and deliver.
    Stopped,
    /// Transport or capture failure: no commit possible.
    Failed,
}

/// One resolved wakeup of the session's event loop.
enum Step {
    StopRequested,
    Audio(Option<crate::audio::AudioFrame>),
    Provider(Option<ProviderEvent>),
    Tick,
}

impl SessionRun {
    async fn run(mut self) {
        let started_at = Utc::now();
        let mut assembler = TranscriptAssembler::new();
        // True only strictly after the provider confirms open; false again
        // from the moment stop is requested or an error occurs.
        let mut ready = false;
        let mut elapsed_secs: u64 = 0;

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.tick().await; // the first tick fires immediately; skip it

        let outcome = loop {
            // Resolve the next wakeup first so the handlers below are free
            // to borrow the rest of the session.
            let step = tokio::select! {
                _ = self.stop_rx.changed() => Step::StopRequested,
                frame = self.frames.recv() => Step::Audio(frame),
                event = self.provider_events.recv() => Step::Provider(event),
                _ = tick.tick() => Step::Tick,
            };

            match step {
                Step::StopRequested => break RunOutcome::Stopped,

                Step::Audio(Some(frame)) => {
                    let _ = self
                        .events
                        .send(SessionEvent::Level(rms_level(&frame.samples)));
                    // Frames arriving before the provider confirms open are
                    // dropped.
                    if ready {
                        if let Err(e) = self.stream.feed(&frame.samples).await {
                            warn!(session_id = %self.id, "Audio feed failed: {}", e);
                            self.status("network error");
                            break RunOutcome::Failed;
                        }
                    }
                }
                Step::Audio(None) => {
                    warn!(session_id = %self.id, "Capture ended unexpectedly");
                    self.status("microphone unavailable");
                    break RunOutcome::Failed;
                }

                Step::Provider(Some(ProviderEvent::Opened)) => {
                    info!(session_id = %self.id, "Provider ready, recording");
                    ready = true;
                    self.set_state(SessionState::Recording);
                }
                Step::Provider(Some(ProviderEvent::Transcript { text, is_final })) => {
                    assembler.push(&text, is_final);
                }
                Step::Provider(Some(ProviderEvent::TransportError(cause))) => {
                    warn!(session_id = %self.id, "Provider transport error: {}", cause);
                    self.status("network error");
                    break RunOutcome::Failed;
                }
                Step::Provider(Some(ProviderEvent::Closed { code, reason })) => {
                    warn!(
                        session_id = %self.id,
                        "Provider closed unexpectedly ({} {})", code, reason
                    );
                    self.status("network error");
                    break RunOutcome::Failed;
                }
                Step::Provider(None) => {
                    warn!(session_id = %self.id, "Provider event stream ended");
                    self.status("network error");
                    break RunOutcome::Failed;
                }

                Step::Tick => {
                    if ready {
                        elapsed_secs += 1;
                        let _ = self.events.send(SessionEvent::Tick(elapsed_secs));
                    }
                }
            }
        };

        // From here on every path releases the microphone, tears down the
        // socket and returns to Idle.
        self.capture.stop().await;
        self.frames.close();

        let failed = matches!(outcome, RunOutcome::Failed);
        if failed && assembler.is_empty() {
            // Nothing captured before the failure: plain error exit, no
            // partial delivery.
            self.set_state(SessionState::Error);
            self.stream.close().await;
            self.set_state(SessionState::Idle);
            info!(session_id = %self.id, "Session aborted");
            return;
        }

        self.set_state(SessionState::Stopping);

        if !failed {
            // Flush whatever the provider still buffers, then collect the
            // late results within a bounded drain window.
            match self.stream.request_commit().await {
                Ok(()) => {
                    drain_events(
                        &mut self.provider_events,
                        &mut assembler,
                        self.config.drain_timeout,
                    )
                    .await;
                }
                Err(e) => warn!(session_id = %self.id, "Commit request failed: {}", e),
            }
        }
        self.stream.close().await;

        match assembler.assemble() {
            None => {
                info!(session_id = %self.id, "No speech detected");
                self.status(&SessionError::EmptyTranscript.to_string());
            }
            Some(raw) => {
                let refined = self.refiner.refine(&raw).await;

                // Let window focus return to the target application before
                // the insert fires.
                tokio::time::sleep(self.config.settle_delay).await;

                match self.delivery.deliver(&refined).await {
                    Ok(outcome) => {
                        let inserted = outcome == DeliveryOutcome::Inserted;
                        info!(session_id = %self.id, inserted, "Transcript delivered");
                        let _ = self.events.send(SessionEvent::Delivered {
                            text: refined,
                            inserted,
                        });
                    }
                    Err(e) => {
                        warn!(session_id = %self.id, "Delivery failed: {}", e);
                        self.status("delivery failed");
                    }
                }
            }
        }

        let duration = Utc::now().signed_duration_since(started_at);
        info!(
            session_id = %self.id,
            duration_secs = duration.num_seconds(),
            "Session finished"
        );
        self.set_state(SessionState::Idle);
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    fn status(&self, message: &str) {
        let _ = self.events.send(SessionEvent::Status(message.to_string()));
    }
}

/// Collect remaining provider events after a commit request, bounded by
/// `budget` so the stop path never blocks indefinitely.
async fn drain_events(
    events: &mut mpsc::Receiver<ProviderEvent>,
    assembler: &mut TranscriptAssembler,
    budget: Duration,
) {
    let start = std::time::Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= budget {
            warn!("Drain window exhausted after {:?}", budget);
            break;
        }
        match tokio::time::timeout(budget - elapsed, events.recv()).await {
            Ok(Some(ProviderEvent::Transcript { text, is_final })) => {
                assembler.push(&text, is_final);
            }
            Ok(Some(ProviderEvent::Closed { .. })) | Ok(None) => break,
            Ok(Some(_)) => {}
            Err(_) => {
                warn!("Drain window exhausted after {:?}", budget);
                break;
            }
        }
    }
}
