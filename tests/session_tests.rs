// Integration tests for the session state machine, run against mock
// capture, provider, refinement and delivery collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use sotto::audio::{AudioCapture, AudioFrame, CaptureConstraints};
use sotto::provider::{ProviderConfig, ProviderEvent, ProviderKind, SpeechStream};
use sotto::refine::Refine;
use sotto::session::{
    CaptureFactory, ProviderFactory, SessionConfig, SessionController, SessionEvent, SessionState,
};
use sotto::{Credentials, DeliveryOutcome, SessionError, TextDelivery};

// ============================================================================
// Mock collaborators
// ============================================================================

/// Capture backend that produces silence frames until stopped.
struct MockCapture {
    stopped: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl AudioCapture for MockCapture {
    async fn start(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, SessionError> {
        let (tx, rx) = mpsc::channel(32);
        let stopped = Arc::clone(&self.stopped);
        let samples = constraints.samples_per_buffer();
        let rate = constraints.sample_rate;
        tokio::spawn(async move {
            let mut elapsed = 0u64;
            loop {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                let frame = AudioFrame {
                    samples: vec![0i16; samples],
                    sample_rate: rate,
                    channels: 1,
                    timestamp_ms: elapsed,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                elapsed += 5;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "mock-capture"
    }
}

/// Capture backend whose device cannot be opened.
struct DeniedCapture;

#[async_trait::async_trait]
impl AudioCapture for DeniedCapture {
    async fn start(
        &mut self,
        _constraints: &CaptureConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, SessionError> {
        Err(SessionError::PermissionDenied)
    }

    async fn stop(&mut self) {}

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "denied-capture"
    }
}

/// Provider stream that records calls; `request_commit` emits a normal
/// close so the session's drain window ends immediately.
struct MockStream {
    event_tx: mpsc::Sender<ProviderEvent>,
    feeds: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl SpeechStream for MockStream {
    async fn feed(&self, _samples: &[i16]) -> Result<(), SessionError> {
        self.feeds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request_commit(&self) -> Result<(), SessionError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .event_tx
            .send(ProviderEvent::Closed {
                code: 1000,
                reason: "client requested close".into(),
            })
            .await;
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Refiner that counts invocations and tags its output.
struct TaggingRefiner {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Refine for TaggingRefiner {
    async fn refine(&self, raw: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        raw.to_string()
    }
}

/// Delivery that records everything it receives.
struct RecordingDelivery {
    delivered: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl TextDelivery for RecordingDelivery {
    async fn deliver(&self, text: &str) -> anyhow::Result<DeliveryOutcome> {
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(DeliveryOutcome::Inserted)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    controller: SessionController,
    provider_tx: mpsc::Sender<ProviderEvent>,
    capture_stopped: Arc<AtomicBool>,
    feeds: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    refine_calls: Arc<AtomicUsize>,
    delivered: Arc<Mutex<Vec<String>>>,
}

fn test_config() -> SessionConfig {
    SessionConfig {
        provider: ProviderKind::Deepgram,
        provider_config: ProviderConfig::default(),
        constraints: CaptureConstraints::default(),
        settle_delay: Duration::from_millis(1),
        drain_timeout: Duration::from_millis(200),
    }
}

fn credentials() -> Credentials {
    Credentials {
        deepgram: Some("test-key".into()),
        elevenlabs: Some("test-key".into()),
        refine: None,
    }
}

fn harness() -> Harness {
    harness_with(test_config(), credentials(), false)
}

fn harness_with(config: SessionConfig, creds: Credentials, deny_capture: bool) -> Harness {
    let capture_stopped = Arc::new(AtomicBool::new(false));
    let feeds = Arc::new(AtomicUsize::new(0));
    let commits = Arc::new(AtomicUsize::new(0));
    let refine_calls = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(Mutex::new(Vec::new()));

    let (provider_tx, provider_rx) = mpsc::channel::<ProviderEvent>(64);
    let provider_rx = Arc::new(Mutex::new(Some(provider_rx)));

    let capture_factory: CaptureFactory = if deny_capture {
        Box::new(|| Box::new(DeniedCapture))
    } else {
        let stopped = Arc::clone(&capture_stopped);
        Box::new(move || {
            Box::new(MockCapture {
                stopped: Arc::clone(&stopped),
            })
        })
    };

    let stream_tx = provider_tx.clone();
    let feeds_handle = Arc::clone(&feeds);
    let commits_handle = Arc::clone(&commits);
    let provider_factory: ProviderFactory = Box::new(move |_kind, _config, _key| {
        let rx = provider_rx.lock().unwrap().take();
        let stream = MockStream {
            event_tx: stream_tx.clone(),
            feeds: Arc::clone(&feeds_handle),
            commits: Arc::clone(&commits_handle),
            closes: Arc::new(AtomicUsize::new(0)),
        };
        Box::pin(async move {
            let rx = rx.ok_or_else(|| {
                SessionError::Transport("mock provider supports a single connect".into())
            })?;
            Ok((Box::new(stream) as Box<dyn SpeechStream>, rx))
        })
    });

    let controller = SessionController::with_backends(
        config,
        creds,
        Arc::new(TaggingRefiner {
            calls: Arc::clone(&refine_calls),
        }),
        Arc::new(RecordingDelivery {
            delivered: Arc::clone(&delivered),
        }),
        capture_factory,
        provider_factory,
    );

    Harness {
        controller,
        provider_tx,
        capture_stopped,
        feeds,
        commits,
        refine_calls,
        delivered,
    }
}

async fn wait_for_state(rx: &mut broadcast::Receiver<SessionEvent>, target: SessionState) {
    timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::StateChanged(state)) if state == target => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed while waiting for {target}: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {target}"));
}

async fn send(h: &Harness, event: ProviderEvent) {
    h.provider_tx.send(event).await.expect("session still running");
    // Let the session's event loop process it.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_cycle_delivers_assembled_transcript() {
    let mut h = harness();
    let mut events = h.controller.subscribe();

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Connecting);

    send(&h, ProviderEvent::Opened).await;
    wait_for_state(&mut events, SessionState::Recording).await;

    send(
        &h,
        ProviderEvent::Transcript {
            text: "hello".into(),
            is_final: true,
        },
    )
    .await;
    send(
        &h,
        ProviderEvent::Transcript {
            text: "world".into(),
            is_final: true,
        },
    )
    .await;
    send(
        &h,
        ProviderEvent::Transcript {
            text: "world there".into(),
            is_final: false,
        },
    )
    .await;

    h.controller.stop().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(*h.delivered.lock().unwrap(), vec!["hello world there"]);
    assert_eq!(h.commits.load(Ordering::SeqCst), 1);
    assert_eq!(h.refine_calls.load(Ordering::SeqCst), 1);
    assert!(h.capture_stopped.load(Ordering::SeqCst), "microphone released");
}

#[tokio::test]
async fn test_audio_fed_only_while_recording() {
    let mut h = harness();
    let mut events = h.controller.subscribe();

    h.controller.start().await.unwrap();
    // Connecting: frames flow but must not reach the provider yet.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(h.feeds.load(Ordering::SeqCst), 0);

    send(&h, ProviderEvent::Opened).await;
    wait_for_state(&mut events, SessionState::Recording).await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(h.feeds.load(Ordering::SeqCst) > 0);

    h.controller.stop().await;
}

#[tokio::test]
async fn test_stop_while_connecting_aborts_cleanly() {
    let mut h = harness();

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Connecting);

    // No open confirmation ever arrives.
    h.controller.stop().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.delivered.lock().unwrap().is_empty());
    assert_eq!(h.refine_calls.load(Ordering::SeqCst), 0);
    assert!(h.capture_stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_second_stop_is_noop() {
    let mut h = harness();
    let mut events = h.controller.subscribe();

    h.controller.start().await.unwrap();
    send(&h, ProviderEvent::Opened).await;
    wait_for_state(&mut events, SessionState::Recording).await;
    send(
        &h,
        ProviderEvent::Transcript {
            text: "only once".into(),
            is_final: true,
        },
    )
    .await;

    h.controller.stop().await;
    h.controller.stop().await;

    assert_eq!(h.delivered.lock().unwrap().len(), 1);
    assert_eq!(h.commits.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let mut h = harness();

    h.controller.start().await.unwrap();
    let second = h.controller.start().await;
    assert!(matches!(second, Err(SessionError::AlreadyActive)));

    h.controller.stop().await;
}

#[tokio::test]
async fn test_empty_session_reports_no_speech() {
    let mut h = harness();
    let mut events = h.controller.subscribe();

    h.controller.start().await.unwrap();
    send(&h, ProviderEvent::Opened).await;
    wait_for_state(&mut events, SessionState::Recording).await;

    h.controller.stop().await;

    assert!(h.delivered.lock().unwrap().is_empty());
    assert_eq!(h.refine_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.state(), SessionState::Idle);

    // The "no speech detected" status was broadcast.
    let mut saw_status = false;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Status(message)) if message == "no speech detected" => {
                saw_status = true;
            }
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(saw_status);
}

#[tokio::test]
async fn test_transport_error_without_content_aborts() {
    let mut h = harness();
    let mut events = h.controller.subscribe();

    h.controller.start().await.unwrap();
    send(&h, ProviderEvent::Opened).await;
    wait_for_state(&mut events, SessionState::Recording).await;

    send(&h, ProviderEvent::TransportError("policy violation".into())).await;
    wait_for_state(&mut events, SessionState::Idle).await;

    assert!(h.delivered.lock().unwrap().is_empty());
    assert_eq!(h.refine_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.commits.load(Ordering::SeqCst), 0, "no commit on a dead socket");
    assert!(h.capture_stopped.load(Ordering::SeqCst), "microphone released");
}

#[tokio::test]
async fn test_transport_error_with_interim_still_delivers() {
    let mut h = harness();
    let mut events = h.controller.subscribe();

    h.controller.start().await.unwrap();
    send(&h, ProviderEvent::Opened).await;
    wait_for_state(&mut events, SessionState::Recording).await;

    send(
        &h,
        ProviderEvent::Transcript {
            text: "hello wor".into(),
            is_final: false,
        },
    )
    .await;
    send(&h, ProviderEvent::TransportError("server error".into())).await;
    wait_for_state(&mut events, SessionState::Idle).await;

    // Whatever was captured before the failure is still delivered.
    assert_eq!(*h.delivered.lock().unwrap(), vec!["hello wor"]);
    assert!(h.capture_stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_interim_only_session_delivers_interim() {
    let mut h = harness();
    let mut events = h.controller.subscribe();

    h.controller.start().await.unwrap();
    send(&h, ProviderEvent::Opened).await;
    wait_for_state(&mut events, SessionState::Recording).await;

    send(
        &h,
        ProviderEvent::Transcript {
            text: "testing one two".into(),
            is_final: false,
        },
    )
    .await;

    h.controller.stop().await;

    assert_eq!(*h.delivered.lock().unwrap(), vec!["testing one two"]);
}

#[tokio::test]
async fn test_missing_credential_rejects_start() {
    let mut h = harness_with(test_config(), Credentials::default(), false);

    let result = h.controller.start().await;
    assert!(matches!(
        result,
        Err(SessionError::CredentialMissing { provider: "deepgram" })
    ));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_capture_permission_denied_rejects_start() {
    let mut h = harness_with(test_config(), credentials(), true);

    let result = h.controller.start().await;
    assert!(matches!(result, Err(SessionError::PermissionDenied)));
    assert_eq!(h.controller.state(), SessionState::Idle);
}
