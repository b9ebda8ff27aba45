//! WAV file input, mainly for offline runs and reproducing reports.

use crate::audio::source::{AudioFrame, AudioSource, FrameCallback};
use crate::error::{Result, SottoError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Frame size delivered to the callback, in samples per channel.
const CHUNK_SAMPLES: usize = 1600; // 100 ms at 16 kHz

/// Audio source that replays a WAV file as a stream of frames.
///
/// The file is decoded up front; frames are delivered from a worker thread
/// as fast as the consumer accepts them. The source is finite: once the
/// file is exhausted the thread exits and no further frames arrive.
pub struct WavAudioSource {
    path: PathBuf,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WavAudioSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn decode(path: &Path) -> Result<(Vec<i16>, u32)> {
        let mut reader = hound::WavReader::open(path).map_err(|e| SottoError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        let spec = reader.spec();
        let channels = spec.channels as usize;

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let shift = spec.bits_per_sample.saturating_sub(16);
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect::<std::result::Result<_, _>>()
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16))
                .collect::<std::result::Result<_, _>>(),
        }
        .map_err(|e| SottoError::AudioCapture {
            message: format!("Failed to decode {}: {}", path.display(), e),
        })?;

        let mono = if channels <= 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|chunk| {
                    let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        Ok((mono, spec.sample_rate))
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        let (samples, sample_rate) = Self::decode(&self.path)?;
        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);

        self.worker = Some(std::thread::spawn(move || {
            for chunk in samples.chunks(CHUNK_SAMPLES) {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                on_frame(AudioFrame::new(chunk.to_vec(), sample_rate));
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}

impl Drop for WavAudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn write_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn replays_mono_file_completely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..4000).map(|i| (i % 100) as i16).collect();
        write_wav(&path, &samples, 16_000, 1);

        let collected: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let mut source = WavAudioSource::new(&path);
        source
            .start(Arc::new(move |frame: AudioFrame| {
                assert_eq!(frame.sample_rate, 16_000);
                sink.lock().unwrap().extend_from_slice(&frame.samples);
            }))
            .unwrap();
        source.stop();

        // stop() joins, but the worker may have been interrupted mid-file;
        // re-run without stopping early to check full delivery.
        let collected2: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));
        let sink2 = Arc::clone(&collected2);
        let mut source2 = WavAudioSource::new(&path);
        source2
            .start(Arc::new(move |frame: AudioFrame| {
                sink2.lock().unwrap().extend_from_slice(&frame.samples);
            }))
            .unwrap();
        if let Some(handle) = source2.worker.take() {
            handle.join().unwrap();
        }
        assert_eq!(*collected2.lock().unwrap(), samples);
    }

    #[test]
    fn downmixes_stereo_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // interleaved L/R pairs averaging to 150 and -250
        write_wav(&path, &[100, 200, -200, -300], 16_000, 2);

        let (mono, rate) = WavAudioSource::decode(&path).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(mono, vec![150, -250]);
    }

    #[test]
    fn missing_file_reports_capture_error() {
        let mut source = WavAudioSource::new("/nonexistent/file.wav");
        let err = source.start(Arc::new(|_| {})).unwrap_err();
        assert_eq!(err.cause_code(), "audio.capture");
    }
}
