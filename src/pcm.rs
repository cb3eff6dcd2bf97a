use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

/// Sample rate of audio sent to the live session.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized audio received from the live session.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// MIME tag attached to every outbound capture frame.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

#[derive(Error, Debug)]
pub enum PcmError {
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("PCM payload of {len} bytes is not a multiple of the {frame}-byte frame size")]
    TruncatedFrame { len: usize, frame: usize },
    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),
}

/// One outbound capture frame: 16-bit little-endian PCM plus its MIME tag.
#[derive(Debug, Clone)]
pub struct PcmBlob {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

impl PcmBlob {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }
}

/// Decoded inbound audio, normalized to f32 samples in [-1, 1].
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Convert f32 samples to a 16-bit little-endian PCM blob.
///
/// Samples outside [-1, 1] are clamped. Infallible for any float input.
pub fn encode_frame(samples: &[f32]) -> PcmBlob {
    let mut data = Vec::with_capacity(samples.len() * 2);

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        data.extend_from_slice(&sample_i16.to_le_bytes());
    }

    PcmBlob {
        data,
        mime_type: INPUT_MIME_TYPE,
    }
}

/// Decode a base64 payload of 16-bit little-endian PCM into an [`AudioBuffer`].
///
/// Fails if the payload is not valid base64 or its byte length is not a
/// multiple of the sample frame size (2 bytes per channel).
pub fn decode_base64_pcm(
    payload: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, PcmError> {
    if sample_rate == 0 {
        return Err(PcmError::InvalidFormat("sample rate must be non-zero".into()));
    }
    if channels == 0 {
        return Err(PcmError::InvalidFormat("channel count must be non-zero".into()));
    }

    let bytes = BASE64.decode(payload)?;
    let frame_size = 2 * channels as usize;
    if bytes.len() % frame_size != 0 {
        return Err(PcmError::TruncatedFrame {
            len: bytes.len(),
            frame: frame_size,
        });
    }

    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        samples.push(sample as f32 / i16::MAX as f32);
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_packs_little_endian() {
        let blob = encode_frame(&[0.0, 1.0, -1.0]);
        assert_eq!(blob.mime_type, INPUT_MIME_TYPE);
        assert_eq!(blob.data.len(), 6);
        assert_eq!(&blob.data[0..2], &0i16.to_le_bytes());
        assert_eq!(&blob.data[2..4], &i16::MAX.to_le_bytes());
        assert_eq!(&blob.data[4..6], &(-i16::MAX).to_le_bytes());
    }

    #[test]
    fn test_encode_frame_clamps_out_of_range() {
        let blob = encode_frame(&[2.0, -3.5]);
        assert_eq!(&blob.data[0..2], &i16::MAX.to_le_bytes());
        assert_eq!(&blob.data[2..4], &(-i16::MAX).to_le_bytes());
    }

    #[test]
    fn test_round_trip_within_quantization_error() {
        let samples = vec![0.0f32, 0.25, -0.25, 0.9, -0.9, 1.5, -1.5];
        let blob = encode_frame(&samples);
        let decoded = decode_base64_pcm(&blob.to_base64(), INPUT_SAMPLE_RATE, 1).unwrap();

        assert_eq!(decoded.samples.len(), samples.len());
        for (original, decoded) in samples.iter().zip(decoded.samples.iter()) {
            let expected = original.clamp(-1.0, 1.0);
            assert!(
                (expected - decoded).abs() <= 1.0 / i16::MAX as f32,
                "expected {} got {}",
                expected,
                decoded
            );
        }
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        // Three bytes cannot hold a whole 16-bit mono frame.
        let payload = BASE64.encode([0u8, 1, 2]);
        let err = decode_base64_pcm(&payload, OUTPUT_SAMPLE_RATE, 1).unwrap_err();
        assert!(matches!(err, PcmError::TruncatedFrame { len: 3, frame: 2 }));
    }

    #[test]
    fn test_decode_rejects_partial_stereo_frame() {
        // Six bytes is three mono samples but one and a half stereo frames.
        let payload = BASE64.encode([0u8; 6]);
        assert!(decode_base64_pcm(&payload, OUTPUT_SAMPLE_RATE, 2).is_err());
        let payload = BASE64.encode([0u8; 8]);
        assert!(decode_base64_pcm(&payload, OUTPUT_SAMPLE_RATE, 2).is_ok());
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(
            decode_base64_pcm("not base64!!!", OUTPUT_SAMPLE_RATE, 1),
            Err(PcmError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_rejects_zero_rate_or_channels() {
        let payload = BASE64.encode([0u8; 4]);
        assert!(decode_base64_pcm(&payload, 0, 1).is_err());
        assert!(decode_base64_pcm(&payload, OUTPUT_SAMPLE_RATE, 0).is_err());
    }

    #[test]
    fn test_buffer_duration() {
        let payload = BASE64.encode(vec![0u8; 48_000]);
        let buffer = decode_base64_pcm(&payload, OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert_eq!(buffer.frames(), 24_000);
        assert!((buffer.duration_secs() - 1.0).abs() < f64::EPSILON);
    }
}
