//! Audio input: the source trait, microphone capture, and file replay.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod source;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::{CpalAudioSource, list_devices};
pub use source::{
    AudioFrame, AudioSource, FrameCallback, MockAudioHandle, MockAudioSource, resample_linear,
    rms_level, samples_to_f32,
};
pub use wav::WavAudioSource;
