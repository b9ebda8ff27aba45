//! Microphone capture using CPAL (Cross-Platform Audio Library).
//!
//! Frames are delivered straight from the device callback — the capture
//! context in the session's concurrency model. Down-mixing to mono happens
//! here; rate conversion is left to the consumer so the device can run at
//! its native rate.

use crate::audio::source::{AudioFrame, AudioSource, FrameCallback};
use crate::error::{Result, SottoError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers while
/// probing audio backends. The messages are harmless but confusing.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for desktop PipeWire/PulseAudio environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for voice input.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List available input devices, preferred ones marked "\[recommended\]".
///
/// Obviously unusable devices (surround channels, HDMI) are filtered out.
pub fn list_devices() -> Result<Vec<String>> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| SottoError::AudioCapture {
            message: format!("Failed to enumerate input devices: {}", e),
        })?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                if should_filter_device(&name) {
                    continue;
                }
                if is_preferred_device(&name) {
                    names.push(format!("{} [recommended]", name));
                } else {
                    names.push(name);
                }
            }
        }
        Ok(names)
    })
}

/// Best default input device, preferring PipeWire/PulseAudio so the
/// desktop's device selection is respected.
fn get_best_default_device() -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| SottoError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched under the Mutex in `CpalAudioSource`;
/// its methods are called synchronously from one thread at a time.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture source.
///
/// Captures at the device's native rate and channel count, down-mixes to
/// mono i16, and invokes the frame callback from the CPAL data callback.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
}

impl CpalAudioSource {
    /// Creates a capture source for the named device, or the best default.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = with_suppressed_stderr(|| {
            let host = cpal::default_host();

            if let Some(name) = device_name {
                let devices = host.input_devices().map_err(|e| SottoError::AudioCapture {
                    message: format!("Failed to enumerate devices: {}", e),
                })?;

                for dev in devices {
                    if let Ok(dev_name) = dev.name()
                        && dev_name == name
                    {
                        return Ok(dev);
                    }
                }
                Err(SottoError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
            } else {
                get_best_default_device()
            }
        })?;

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
        })
    }

    fn build_stream(&self, on_frame: FrameCallback) -> Result<cpal::Stream> {
        let supported = self
            .device
            .default_input_config()
            .map_err(|e| SottoError::AudioCapture {
                message: format!("Failed to query input config: {}", e),
            })?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let err_fn = |e| eprintln!("sotto: audio stream error: {}", e);

        let stream = match sample_format {
            cpal::SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        let mono = downmix_i16(data, channels);
                        on_frame(AudioFrame::new(mono, sample_rate));
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| SottoError::AudioCapture {
                    message: format!("Failed to build i16 input stream: {}", e),
                })?,
            cpal::SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let mono = downmix_f32(data, channels);
                        on_frame(AudioFrame::new(mono, sample_rate));
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| SottoError::AudioCapture {
                    message: format!("Failed to build f32 input stream: {}", e),
                })?,
            other => {
                return Err(SottoError::AudioCapture {
                    message: format!("Unsupported sample format: {:?}", other),
                });
            }
        };

        Ok(stream)
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        let stream = self.build_stream(on_frame)?;
        stream.play().map_err(|e| SottoError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        if let Ok(mut guard) = self.stream.lock() {
            *guard = Some(SendableStream(stream));
        }
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the stream stops capture; safe when start never ran.
        if let Ok(mut guard) = self.stream.lock() {
            *guard = None;
        }
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

/// Down-mix interleaved i16 samples to mono by channel averaging.
fn downmix_i16(data: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Down-mix interleaved f32 samples to mono i16.
fn downmix_f32(data: &[f32], channels: usize) -> Vec<i16> {
    let to_i16 = |f: f32| (f.clamp(-1.0, 1.0) * 32767.0) as i16;
    if channels <= 1 {
        return data.iter().map(|&f| to_i16(f)).collect();
    }
    data.chunks_exact(channels)
        .map(|chunk| {
            let sum: f32 = chunk.iter().sum();
            to_i16(sum / channels as f32)
        })
        .collect()
}
