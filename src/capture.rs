//! Microphone capture.
//!
//! Opens one input device and streams 20 ms mono frames at 48 kHz, the
//! shape the Opus encoder wants. The cpal stream is `!Send`, so the device
//! lives on a dedicated thread for the whole session; the handle only flips
//! atomics.
//!
//! ```text
//!  device ──► downmix ──► resample ──► 960-sample frames ──► mpsc
//!              (mono)     (48 kHz)          (20 ms)
//! ```
//!
//! The enable gate sits in front of everything: a disabled capture keeps
//! the device open but stops producing frames, so the service's VAD sees
//! silence and the turn never opens.

use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capture and track sample rate.
pub const SAMPLE_RATE: u32 = 48_000;
/// Samples per 20 ms frame at 48 kHz mono: one Opus frame.
pub const FRAME_SAMPLES: usize = 960;

/// Handle to a running capture stream.
pub struct AudioCapture {
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    device_name: String,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl AudioCapture {
    /// Open the named (or default) input device and start streaming frames.
    /// Capture starts enabled.
    pub fn open(device: Option<&str>, frames: mpsc::Sender<Vec<i16>>) -> Result<Self> {
        let enabled = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let requested = device.map(str::to_owned);
        let thread_enabled = Arc::clone(&enabled);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("tolk-capture".into())
            .spawn(move || run_capture(requested, frames, thread_enabled, thread_stop, ready_tx))
            .map_err(|e| Error::DeviceUnavailable(format!("spawning capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(device_name)) => {
                tracing::info!(device = %device_name, "microphone capture started");
                Ok(Self {
                    enabled,
                    stop,
                    device_name,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "capture thread exited before startup".into(),
                ))
            }
        }
    }

    /// Gate outgoing audio without touching the device.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
        tracing::debug!(enabled = on, "microphone gate");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Name of the device actually opened.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop the stream and join the capture thread. Idempotent.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            tracing::debug!(device = %self.device_name, "microphone capture closed");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Names of all input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host
        .input_devices()
        .map_err(|e| classify_backend_error(&e.to_string()))?
    {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

// ── Capture thread ────────────────────────────────────────────────

fn run_capture(
    requested: Option<String>,
    frames: mpsc::Sender<Vec<i16>>,
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    ready: std::sync::mpsc::Sender<Result<String>>,
) {
    let (stream, name) = match build_stream(requested.as_deref(), frames, enabled) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(classify_backend_error(&e.to_string())));
        return;
    }
    let _ = ready.send(Ok(name));

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(50));
    }
    // Stream drops here, ending the callbacks
}

fn build_stream(
    requested: Option<&str>,
    frames: mpsc::Sender<Vec<i16>>,
    enabled: Arc<AtomicBool>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = match requested {
        Some(name) => host
            .input_devices()
            .map_err(|e| classify_backend_error(&e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| Error::DeviceUnavailable(format!("input device not found: {name}")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no default input device".into()))?,
    };
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = device
        .default_input_config()
        .map_err(|e| classify_backend_error(&e.to_string()))?;

    let channels = config.channels() as usize;
    let src_rate = config.sample_rate();
    tracing::debug!(
        device = %name,
        src_rate,
        channels,
        format = ?config.sample_format(),
        "opening capture stream"
    );

    let err_fn = |e| tracing::warn!(error = %e, "capture stream error");

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let mut pipeline = FramePipeline::new(src_rate);
            device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !enabled.load(Ordering::Relaxed) {
                        return;
                    }
                    pipeline.push(&downmix_f32(data, channels), &frames);
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let mut pipeline = FramePipeline::new(src_rate);
            device.build_input_stream(
                &config.into(),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if !enabled.load(Ordering::Relaxed) {
                        return;
                    }
                    pipeline.push(&downmix_i16(data, channels), &frames);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| classify_backend_error(&e.to_string()))?;

    Ok((stream, name))
}

/// cpal reports permission problems as backend strings, not variants.
fn classify_backend_error(reason: &str) -> Error {
    let lower = reason.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        Error::PermissionDenied(reason.to_string())
    } else {
        Error::DeviceUnavailable(reason.to_string())
    }
}

// ── Frame assembly ────────────────────────────────────────────────

/// Mono resample and 20 ms chunking, run inside the audio callback.
///
/// Linear interpolation between adjacent source samples, in both
/// directions: 44.1 kHz devices are upsampled, 96 kHz devices downsampled.
/// One source sample is held back across calls for continuity.
struct FramePipeline {
    step: f64,
    pos: f64,
    history: Vec<i16>,
    pending: Vec<i16>,
}

impl FramePipeline {
    fn new(src_rate: u32) -> Self {
        Self {
            step: f64::from(src_rate) / f64::from(SAMPLE_RATE),
            pos: 0.0,
            history: Vec::new(),
            pending: Vec::with_capacity(FRAME_SAMPLES),
        }
    }

    fn push(&mut self, mono: &[i16], frames: &mpsc::Sender<Vec<i16>>) {
        self.history.extend_from_slice(mono);
        while (self.pos as usize) + 1 < self.history.len() {
            let idx = self.pos as usize;
            let frac = self.pos - idx as f64;
            let a = f64::from(self.history[idx]);
            let b = f64::from(self.history[idx + 1]);
            self.pending.push((a + (b - a) * frac) as i16);
            self.pos += self.step;

            if self.pending.len() == FRAME_SAMPLES {
                let frame =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(FRAME_SAMPLES));
                // Audio thread never blocks: drop the frame if the encoder
                // is behind
                let _ = frames.try_send(frame);
            }
        }
        let consumed = (self.pos as usize).min(self.history.len().saturating_sub(1));
        self.history.drain(..consumed);
        self.pos -= consumed as f64;
    }
}

/// Average interleaved f32 channels into mono i16.
fn downmix_f32(data: &[f32], channels: usize) -> Vec<i16> {
    if channels == 0 {
        return Vec::new();
    }
    data.chunks(channels)
        .map(|frame| {
            let avg = frame.iter().sum::<f32>() / frame.len() as f32;
            (avg.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
        })
        .collect()
}

/// Average interleaved i16 channels into mono.
fn downmix_i16(data: &[i16], channels: usize) -> Vec<i16> {
    if channels == 0 {
        return Vec::new();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| i32::from(*s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────
