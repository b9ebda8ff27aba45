//! Audio source seam: decoded PCM frames delivered via callback.
//!
//! Capture implementations deliver frames on their own thread (the capture
//! context). The session and engines never block that thread.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One decoded PCM frame from a capture device or file.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// 16-bit PCM samples, mono.
    pub samples: Vec<i16>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000 / self.sample_rate as u64) as u32
    }
}

/// Callback invoked once per captured frame, on the capture context.
pub type FrameCallback = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Trait for audio capture sources.
///
/// `stop` is idempotent and safe to call even when `start` failed — the
/// session relies on that during error unwinding.
pub trait AudioSource: Send {
    /// Begins capture; `on_frame` is invoked on the capture context until
    /// `stop` is called or the source is exhausted.
    fn start(&mut self, on_frame: FrameCallback) -> Result<()>;

    /// Stops capture. Idempotent.
    fn stop(&mut self);

    /// Name for logging.
    fn name(&self) -> &'static str {
        "audio"
    }
}

/// Convert 16-bit PCM to f32 normalized to [-1.0, 1.0].
pub fn samples_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Linear resampling between arbitrary rates.
///
/// Quality is sufficient for speech models; capture rates are close enough
/// to 16kHz that a polyphase filter buys nothing audible here.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos.floor() as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}

/// Root-mean-square level of a frame, 0.0 to 1.0.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let f = s as f64 / 32768.0;
            f * f
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Shared view into a [`MockAudioSource`] for driving tests.
#[derive(Clone)]
pub struct MockAudioHandle {
    callback: Arc<Mutex<Option<FrameCallback>>>,
    started: Arc<AtomicBool>,
    stop_count: Arc<AtomicUsize>,
}

impl MockAudioHandle {
    /// Delivers one frame as if the capture thread produced it.
    /// No-op when the source is not started.
    pub fn emit(&self, frame: AudioFrame) {
        let callback = self.callback.lock().ok().and_then(|g| g.clone());
        if let Some(cb) = callback {
            cb(frame);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

/// Mock audio source for testing: frames are pushed by the test through a
/// [`MockAudioHandle`] rather than produced by hardware.
pub struct MockAudioSource {
    handle: MockAudioHandle,
    should_fail_start: bool,
}

impl MockAudioSource {
    pub fn new() -> Self {
        Self {
            handle: MockAudioHandle {
                callback: Arc::new(Mutex::new(None)),
                started: Arc::new(AtomicBool::new(false)),
                stop_count: Arc::new(AtomicUsize::new(0)),
            },
            should_fail_start: false,
        }
    }

    /// Configures the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Handle for emitting frames and inspecting lifecycle state.
    pub fn handle(&self) -> MockAudioHandle {
        self.handle.clone()
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.should_fail_start {
            return Err(crate::error::SottoError::AudioCapture {
                message: "mock audio start failure".to_string(),
            });
        }
        if let Ok(mut guard) = self.handle.callback.lock() {
            *guard = Some(on_frame);
        }
        self.handle.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut guard) = self.handle.callback.lock() {
            *guard = None;
        }
        self.handle.started.store(false, Ordering::SeqCst);
        self.handle.stop_count.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
