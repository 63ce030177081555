use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::error::SessionError;

use super::level::rms_level;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Constraints requested when acquiring the microphone.
///
/// Echo cancellation and noise suppression are forwarded to the OS input
/// processing where the backend supports it; sample rate and channel count
/// are enforced by the pipeline itself (providers expect 16 kHz mono).
#[derive(Debug, Clone)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Target sample rate (will decimate if the device runs faster)
    pub sample_rate: u32,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: 16_000, // 16kHz for streaming STT
            buffer_duration_ms: 100,
        }
    }
}

impl CaptureConstraints {
    /// Samples per emitted buffer at the target rate.
    pub fn samples_per_buffer(&self) -> usize {
        (self.sample_rate as u64 * self.buffer_duration_ms / 1000) as usize
    }
}

/// Microphone capture backend trait
///
/// Implementations:
/// - `CpalCapture`: real microphone input via cpal (all desktop platforms)
/// - test doubles that replay canned frames
#[async_trait::async_trait]
pub trait AudioCapture: Send {
    /// Start capturing audio under the given constraints.
    ///
    /// Returns a channel receiver that will receive fixed-size audio frames.
    async fn start(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, SessionError>;

    /// Stop capturing and release the device.
    ///
    /// Idempotent: safe to call multiple times, and called on every session
    /// exit path.
    async fn stop(&mut self);

    /// Check if the backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Decimate an interleaved sample buffer down to `target_rate`.
///
/// Takes every Nth sample; cannot upsample. Matches what the streaming
/// providers expect well enough for speech.
pub fn downsample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if source_rate <= target_rate {
        return samples.to_vec();
    }
    let ratio = (source_rate / target_rate).max(1) as usize;
    samples.iter().step_by(ratio).copied().collect()
}

/// Convert interleaved stereo samples to mono by summing channels.
pub fn downmix_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    let mut mono = Vec::with_capacity(samples.len() / ch);
    for chunk in samples.chunks_exact(ch) {
        let sum: i32 = chunk.iter().map(|s| *s as i32).sum();
        mono.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }
    mono
}

/// Microphone capture backend backed by cpal.
///
/// The cpal stream is not `Send`, so the device is owned by a dedicated
/// thread; frames cross into the async world over an mpsc channel. A live
/// amplitude feed is published on a watch channel for visualization.
pub struct CpalCapture {
    capturing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    level_tx: watch::Sender<f32>,
    level_rx: watch::Receiver<f32>,
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalCapture {
    pub fn new() -> Self {
        let (level_tx, level_rx) = watch::channel(0.0_f32);
        Self {
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            level_tx,
            level_rx,
        }
    }

    /// Live amplitude feed (RMS, 0.0..=1.0), updated on every buffer.
    pub fn level_feed(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }
}

#[async_trait::async_trait]
impl AudioCapture for CpalCapture {
    async fn start(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, SessionError> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyActive);
        }

        info!(
            "Starting microphone capture ({}Hz mono, {}ms buffers, aec={}, ns={})",
            constraints.sample_rate,
            constraints.buffer_duration_ms,
            constraints.echo_cancellation,
            constraints.noise_suppression
        );

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(32);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<(), SessionError>>();

        let constraints = constraints.clone();
        let capturing = Arc::clone(&self.capturing);
        let level_tx = self.level_tx.clone();

        std::thread::Builder::new()
            .name("sotto-capture".into())
            .spawn(move || {
                run_capture_thread(constraints, frame_tx, stop_rx, ready_tx, capturing, level_tx);
            })
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;

        // Wait for the device to open (or fail) before reporting success.
        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                Ok(frame_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::DeviceUnavailable(
                "capture thread exited before opening the device".into(),
            )),
        }
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The capture thread drops the stream when it sees the signal
            // (or when the sender side is gone).
            let _ = tx.send(());
            info!("Microphone capture stopped");
        }
        self.capturing.store(false, Ordering::SeqCst);
        let _ = self.level_tx.send(0.0);
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn run_capture_thread(
    constraints: CaptureConstraints,
    frame_tx: mpsc::Sender<AudioFrame>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: tokio::sync::oneshot::Sender<Result<(), SessionError>>,
    capturing: Arc<AtomicBool>,
    level_tx: watch::Sender<f32>,
) {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(
                "no default input device".into(),
            )));
            return;
        }
    };

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            // A present-but-unopenable device is how denied microphone
            // permission shows up on most platforms.
            let _ = ready_tx.send(Err(SessionError::PermissionDenied));
            error!("Failed to query input config: {}", e);
            return;
        }
    };

    let source_rate = supported.sample_rate().0;
    let source_channels = supported.channels();
    let chunk_len = constraints.samples_per_buffer().max(1);
    let target_rate = constraints.sample_rate;
    let started = Instant::now();

    // Accumulates target-format samples until a full buffer is ready.
    let mut pending: Vec<i16> = Vec::with_capacity(chunk_len * 2);

    let tx = frame_tx.clone();
    let cap_flag = Arc::clone(&capturing);
    let mut on_samples = move |samples: Vec<i16>| {
        let mono = downmix_mono(&samples, source_channels);
        let resampled = downsample(&mono, source_rate, target_rate);
        let _ = level_tx.send(rms_level(&resampled));
        pending.extend_from_slice(&resampled);
        while pending.len() >= chunk_len {
            let rest = pending.split_off(chunk_len);
            let chunk = std::mem::replace(&mut pending, rest);
            let frame = AudioFrame {
                samples: chunk,
                sample_rate: target_rate,
                channels: 1,
                timestamp_ms: started.elapsed().as_millis() as u64,
            };
            match tx.try_send(frame) {
                Ok(()) => {}
                // The session is not draining fast enough; dropping the
                // buffer beats blocking the device callback.
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver gone: session is tearing down.
                    cap_flag.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    };

    let err_fn = |e| warn!("Input stream error: {}", e);
    let stream_config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| on_samples(data.to_vec()),
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _| {
                on_samples(data.iter().map(|s| (*s as i32 - 32768) as i16).collect())
            },
            err_fn,
            None,
        ),
        _ => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                on_samples(
                    data.iter()
                        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect(),
                )
            },
            err_fn,
            None,
        ),
    };

    let stream = match stream {
        Ok(s) => s,
        Err(cpal::BuildStreamError::DeviceNotAvailable) => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(
                "input device disappeared".into(),
            )));
            return;
        }
        Err(e) => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(e.to_string())));
        return;
    }

    capturing.store(true, Ordering::SeqCst);
    let _ = ready_tx.send(Ok(()));

    // Park until the session asks us to stop; dropping the stream releases
    // the device.
    let _ = stop_rx.recv();
    drop(stream);
    capturing.store(false, Ordering::SeqCst);
    info!("Capture thread exited, device released");
}
