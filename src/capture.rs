use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat};
use std::sync::mpsc::{channel as std_channel, Sender as StdSender};
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc;

/// Fixed number of 16 kHz samples per outbound frame.
pub const FRAME_SAMPLES: usize = 4096;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<BuildStreamError> for CaptureError {
    fn from(err: BuildStreamError) -> Self {
        match err {
            BuildStreamError::DeviceNotAvailable => {
                CaptureError::PermissionDenied(err.to_string())
            }
            other => CaptureError::Stream(other.to_string()),
        }
    }
}

/// Microphone capture delivering fixed-size 16 kHz mono frames.
///
/// The cpal stream lives on a dedicated thread (cpal streams are not
/// `Send`); frames cross into the async world over a bounded channel.
/// Dropping the handle releases the device.
pub struct MicCapture {
    stop_sender: Option<StdSender<()>>,
    capture_thread: Option<thread::JoinHandle<()>>,
}

impl MicCapture {
    /// Open the capture device and start streaming frames.
    ///
    /// `device_id` selects an input device by name; `None` uses the
    /// platform default.
    pub fn start(
        device_id: Option<String>,
        target_rate: u32,
    ) -> Result<(Self, mpsc::Receiver<Vec<f32>>), CaptureError> {
        let (frame_tx, frame_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (setup_tx, setup_rx) = std_channel();
        let (stop_tx, stop_rx) = std_channel();

        let capture_thread = thread::spawn(move || {
            let stream = match build_input_stream(device_id, target_rate, frame_tx) {
                Ok(stream) => {
                    let _ = setup_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = setup_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Capture: failed to start input stream: {}", e);
                return;
            }

            // Park until the handle asks us to stop or is dropped.
            let _ = stop_rx.recv();
            log::debug!("Capture: input thread exiting");
        });

        match setup_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = capture_thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(CaptureError::Stream(
                    "Capture thread exited before setup completed".to_string(),
                ));
            }
        }

        Ok((
            Self {
                stop_sender: Some(stop_tx),
                capture_thread: Some(capture_thread),
            },
            frame_rx,
        ))
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop_sender.take();
        if let Some(thread) = self.capture_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Capture: failed to join capture thread: {:?}", e);
            }
        }
    }
}

fn build_input_stream(
    device_id: Option<String>,
    target_rate: u32,
    frame_tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();

    let device = if let Some(id) = &device_id {
        host.input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == *id).unwrap_or(false))
            .ok_or_else(|| CaptureError::Device(format!("Device not found: {}", id)))?
    } else {
        host.default_input_device()
            .ok_or_else(|| CaptureError::Device("No default input device found".into()))?
    };
    log::debug!("Capture: using input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;
    log::debug!("Capture: input config: {:?}", supported_config);

    let device_rate = supported_config.sample_rate().0;
    let device_channels = supported_config.channels() as usize;
    let config = supported_config.config();

    let mut accumulator = FrameAccumulator::new(device_rate, target_rate, device_channels);

    match supported_config.sample_format() {
        SampleFormat::F32 => build_typed_stream::<f32>(&device, &config, frame_tx, accumulator),
        SampleFormat::I16 => build_typed_stream::<i16>(&device, &config, frame_tx, accumulator),
        SampleFormat::U16 => build_typed_stream::<u16>(&device, &config, frame_tx, accumulator),
        other => {
            // Fall back to f32 and let cpal convert if the backend allows it.
            log::warn!("Capture: unsupported sample format {:?}, trying f32", other);
            accumulator = FrameAccumulator::new(device_rate, target_rate, device_channels);
            build_typed_stream::<f32>(&device, &config, frame_tx, accumulator)
        }
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frame_tx: mpsc::Sender<Vec<f32>>,
    mut accumulator: FrameAccumulator,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            accumulator.push_interleaved(data);
            while let Some(frame) = accumulator.next_frame() {
                match frame_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        log::warn!("Capture: frame channel full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        // Receiver gone; the session is tearing down.
                    }
                }
            }
        },
        move |err| {
            log::error!("Capture: stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}

/// Converts interleaved device samples into fixed-size mono frames at the
/// target rate, using channel-0 extraction and linear interpolation.
struct FrameAccumulator {
    device_rate: u32,
    target_rate: u32,
    channels: usize,
    mono: Vec<f32>,
    resampled: Vec<f32>,
    // Fractional read position carried across callbacks so resampling
    // stays continuous at buffer boundaries.
    read_pos: f64,
}

impl FrameAccumulator {
    fn new(device_rate: u32, target_rate: u32, channels: usize) -> Self {
        Self {
            device_rate,
            target_rate,
            channels: channels.max(1),
            mono: Vec::new(),
            resampled: Vec::new(),
            read_pos: 0.0,
        }
    }

    fn push_interleaved<T>(&mut self, data: &[T])
    where
        T: cpal::SizedSample,
        f32: cpal::FromSample<T>,
    {
        use cpal::Sample;
        self.mono.extend(
            data.chunks(self.channels)
                .filter_map(|frame| frame.first())
                .map(|&s| f32::from_sample(s)),
        );

        if self.device_rate == self.target_rate {
            self.resampled.append(&mut self.mono);
            return;
        }

        let step = self.device_rate as f64 / self.target_rate as f64;
        while (self.read_pos.floor() as usize) + 1 < self.mono.len() {
            let idx = self.read_pos.floor() as usize;
            let fract = self.read_pos.fract() as f32;
            let sample = self.mono[idx] * (1.0 - fract) + self.mono[idx + 1] * fract;
            self.resampled.push(sample);
            self.read_pos += step;
        }

        // Drop consumed input, keeping one sample of context for the
        // interpolation window.
        let consumed = (self.read_pos.floor() as usize).saturating_sub(1);
        if consumed > 0 {
            self.mono.drain(0..consumed);
            self.read_pos -= consumed as f64;
        }
    }

    fn next_frame(&mut self) -> Option<Vec<f32>> {
        if self.resampled.len() >= FRAME_SAMPLES {
            Some(self.resampled.drain(0..FRAME_SAMPLES).collect())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_passthrough_at_target_rate() {
        let mut acc = FrameAccumulator::new(16_000, 16_000, 1);
        acc.push_interleaved(&vec![0.5f32; FRAME_SAMPLES + 10]);

        let frame = acc.next_frame().expect("one full frame");
        assert_eq!(frame.len(), FRAME_SAMPLES);
        assert!(frame.iter().all(|&s| (s - 0.5).abs() < f32::EPSILON));
        assert!(acc.next_frame().is_none());
    }

    #[test]
    fn test_accumulator_extracts_first_channel() {
        // Stereo input: left channel 0.25, right channel -0.75.
        let mut interleaved = Vec::new();
        for _ in 0..FRAME_SAMPLES {
            interleaved.push(0.25f32);
            interleaved.push(-0.75f32);
        }

        let mut acc = FrameAccumulator::new(16_000, 16_000, 2);
        acc.push_interleaved(&interleaved);

        let frame = acc.next_frame().expect("one full frame");
        assert!(frame.iter().all(|&s| (s - 0.25).abs() < f32::EPSILON));
    }

    #[test]
    fn test_accumulator_downsamples_to_target_rate() {
        // 48 kHz in, 16 kHz out: three input samples per output sample.
        let mut acc = FrameAccumulator::new(48_000, 16_000, 1);
        acc.push_interleaved(&vec![0.1f32; FRAME_SAMPLES * 3 + 16]);

        let frame = acc.next_frame().expect("one full frame");
        assert_eq!(frame.len(), FRAME_SAMPLES);
        assert!(frame.iter().all(|&s| (s - 0.1).abs() < 1e-5));
    }

    #[test]
    fn test_accumulator_converts_i16_samples() {
        let mut acc = FrameAccumulator::new(16_000, 16_000, 1);
        acc.push_interleaved(&vec![i16::MAX; 8]);
        // Not enough for a frame yet, but the samples are normalized.
        assert!(acc.next_frame().is_none());
        assert!(acc.resampled.iter().all(|&s| s > 0.99));
    }
}
