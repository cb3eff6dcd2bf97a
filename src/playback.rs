use crate::pcm::AudioBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to write audio data: {0}")]
    WriteError(String),

    #[error("Failed to stop audio playback: {0}")]
    StopError(String),

    #[error("Audio device error: {0}")]
    DeviceError(String),
}

/// A playback unit scheduled against the session's playback cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: u64,
    /// Start offset in seconds from the session epoch.
    pub start: f64,
    /// Playback length in seconds.
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Tracks the monotonically advancing playback cursor and the set of
/// currently scheduled sources for one session.
///
/// Sources never overlap: each starts no earlier than the end of the
/// previous one. All mutation happens synchronously from the session's
/// dispatch context.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    next_id: u64,
    active: Vec<ScheduledSource>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a buffer of the given duration at `max(cursor, now)` and
    /// advance the cursor past it.
    pub fn schedule(&mut self, duration: f64, now: f64) -> ScheduledSource {
        let start = self.cursor.max(now);
        let source = ScheduledSource {
            id: self.next_id,
            start,
            duration,
        };
        self.next_id += 1;
        self.cursor = start + duration;
        self.active.push(source);
        source
    }

    /// Remove a source that finished playing naturally. Returns `true`
    /// when the active set is now empty.
    pub fn finish(&mut self, id: u64) -> bool {
        self.active.retain(|source| source.id != id);
        self.active.is_empty()
    }

    /// Force-stop every scheduled source, returning the ones that were
    /// still active. The cursor is reset for the next session.
    pub fn stop_all(&mut self) -> Vec<ScheduledSource> {
        self.cursor = 0.0;
        std::mem::take(&mut self.active)
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active(&self) -> &[ScheduledSource] {
        &self.active
    }
}

/// Audio output abstraction so the session runtime can be exercised
/// without a physical device.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Queue a decoded buffer for playback.
    async fn write(&self, buffer: &AudioBuffer) -> Result<(), PlaybackError>;

    /// Drop any queued audio without stopping the device.
    async fn clear(&self) -> Result<(), PlaybackError>;

    /// Stop playback and release the device.
    async fn stop(&self) -> Result<(), PlaybackError>;
}

enum AudioCommand {
    Play(Vec<f32>),
    Clear,
    Stop,
}

/// cpal-backed sink. Samples are queued at the session's output rate and
/// linearly interpolated to the device's native rate in the stream
/// callback.
pub struct CpalSink {
    audio_sender: Sender<AudioCommand>,
    is_stopped: Arc<AtomicBool>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(input_sample_rate: u32) -> Result<Self, PlaybackError> {
        let (audio_sender, audio_receiver) = channel();
        let is_stopped = Arc::new(AtomicBool::new(false));

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            PlaybackError::DeviceError("No output device found".to_string())
        })?;
        log::debug!("Playback: using output device: {:?}", device.name());

        let supported_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::DeviceError(e.to_string()))?;
        log::debug!("Playback: output config: {:?}", supported_config);

        let output_sample_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels() as usize;

        let samples_queue = Arc::new(Mutex::new(Vec::<f32>::new()));
        let samples_queue_clone = Arc::clone(&samples_queue);

        let audio_thread = thread::spawn(move || {
            let stream = match device.build_output_stream(
                &supported_config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = samples_queue_clone.lock().unwrap();

                    let output_frames = data.len() / output_channels;
                    let input_samples_needed = (output_frames as f32
                        * input_sample_rate as f32
                        / output_sample_rate as f32)
                        .ceil() as usize;

                    let mut input_sample_idx: f32 = 0.0;
                    let input_sample_step =
                        input_sample_rate as f32 / output_sample_rate as f32;

                    for frame in data.chunks_mut(output_channels) {
                        // Linear interpolation between adjacent queued samples;
                        // silence once the queue runs dry.
                        let sample = if !queue.is_empty() {
                            let idx_floor = input_sample_idx.floor() as usize;
                            let idx_ceil = idx_floor + 1;
                            let fract = input_sample_idx.fract();

                            let sample1 = queue.get(idx_floor).copied().unwrap_or(0.0);
                            let sample2 = queue.get(idx_ceil).copied().unwrap_or(0.0);

                            sample1 * (1.0 - fract) + sample2 * fract
                        } else {
                            0.0
                        };

                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }

                        input_sample_idx += input_sample_step;
                    }

                    if input_samples_needed <= queue.len() {
                        queue.drain(0..input_samples_needed);
                    } else {
                        queue.clear();
                    }
                },
                move |err| {
                    log::error!("Playback: stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Playback: failed to create audio stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Playback: failed to start audio stream: {}", e);
                return;
            }

            while let Ok(command) = audio_receiver.recv() {
                match command {
                    AudioCommand::Play(samples) => {
                        let mut queue = samples_queue.lock().unwrap();
                        queue.extend_from_slice(&samples);
                        log::debug!("Playback: queued {} samples", samples.len());
                    }
                    AudioCommand::Clear => {
                        samples_queue.lock().unwrap().clear();
                        log::debug!("Playback: cleared queue");
                    }
                    AudioCommand::Stop => {
                        log::debug!("Playback: received stop command");
                        break;
                    }
                }
            }
            // Stream is dropped when the thread exits.
        });

        Ok(Self {
            audio_sender,
            is_stopped,
            audio_thread: Some(audio_thread),
        })
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if !self.is_stopped.load(Ordering::Acquire) {
            let _ = self.audio_sender.send(AudioCommand::Stop);
        }

        if let Some(thread) = self.audio_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Playback: failed to join audio thread: {:?}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl AudioSink for CpalSink {
    async fn write(&self, buffer: &AudioBuffer) -> Result<(), PlaybackError> {
        if self.is_stopped.load(Ordering::Acquire) {
            return Err(PlaybackError::WriteError("Sink is stopped".to_string()));
        }

        // Mix down to mono; inbound audio is mono in practice.
        let samples = if buffer.channels <= 1 {
            buffer.samples.clone()
        } else {
            buffer
                .samples
                .chunks_exact(buffer.channels as usize)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        self.audio_sender
            .send(AudioCommand::Play(samples))
            .map_err(|e| PlaybackError::WriteError(e.to_string()))
    }

    async fn clear(&self) -> Result<(), PlaybackError> {
        self.audio_sender
            .send(AudioCommand::Clear)
            .map_err(|e| PlaybackError::WriteError(e.to_string()))
    }

    async fn stop(&self) -> Result<(), PlaybackError> {
        self.is_stopped.store(true, Ordering::Release);
        self.audio_sender
            .send(AudioCommand::Stop)
            .map_err(|e| PlaybackError::StopError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_advances_cursor() {
        let mut scheduler = PlaybackScheduler::new();

        let first = scheduler.schedule(0.5, 0.0);
        assert_eq!(first.start, 0.0);
        assert_eq!(scheduler.cursor(), 0.5);

        let second = scheduler.schedule(0.25, 0.1);
        // Cursor is ahead of "now", so the second source queues behind the first.
        assert_eq!(second.start, 0.5);
        assert_eq!(scheduler.cursor(), 0.75);
    }

    #[test]
    fn test_schedule_catches_up_to_now() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(0.1, 0.0);

        // A long silent gap: the next source starts at "now", not at the
        // stale cursor position.
        let late = scheduler.schedule(0.2, 5.0);
        assert_eq!(late.start, 5.0);
        assert_eq!(scheduler.cursor(), 5.2);
    }

    #[test]
    fn test_sources_never_overlap() {
        let mut scheduler = PlaybackScheduler::new();
        let mut sources = Vec::new();
        for (duration, now) in [(0.3, 0.0), (0.2, 0.05), (0.5, 0.6), (0.1, 0.61)] {
            sources.push(scheduler.schedule(duration, now));
        }

        for pair in sources.windows(2) {
            assert!(
                pair[1].start >= pair[0].end(),
                "source {:?} overlaps {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn test_finish_reports_empty_set() {
        let mut scheduler = PlaybackScheduler::new();
        let a = scheduler.schedule(0.1, 0.0);
        let b = scheduler.schedule(0.1, 0.0);

        assert!(!scheduler.finish(a.id));
        assert!(scheduler.finish(b.id));
        assert!(scheduler.active().is_empty());
    }

    #[test]
    fn test_stop_all_drains_active_set() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(0.1, 0.0);
        scheduler.schedule(0.1, 0.0);

        let stopped = scheduler.stop_all();
        assert_eq!(stopped.len(), 2);
        assert!(scheduler.active().is_empty());
        assert_eq!(scheduler.cursor(), 0.0);
    }

    #[tokio::test]
    async fn test_cpal_sink_write_and_stop() {
        match CpalSink::new(crate::pcm::OUTPUT_SAMPLE_RATE) {
            Ok(sink) => {
                let buffer = AudioBuffer {
                    samples: vec![0.0; 2_400],
                    sample_rate: crate::pcm::OUTPUT_SAMPLE_RATE,
                    channels: 1,
                };
                sink.write(&buffer).await.unwrap();
                sink.clear().await.unwrap();
                sink.stop().await.unwrap();
                assert!(sink.write(&buffer).await.is_err());
            }
            Err(e) => {
                log::warn!(
                    "Audio device not available in test environment - this is expected: {}",
                    e
                );
            }
        }
    }
}
