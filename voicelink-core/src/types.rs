use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DecodeError;

/// Wire audio format: 24 kHz, mono, signed 16-bit little-endian PCM.
pub const SAMPLE_RATE_HZ: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const WIRE: AudioFormat = AudioFormat {
        sample_rate_hz: SAMPLE_RATE_HZ,
        channels: CHANNELS,
    };
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::WIRE
    }
}

/// A block of raw samples in the wire format.
///
/// Frames have no identity beyond their position in the stream; each one is
/// consumed exactly once by whichever queue it is handed to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PcmFrame {
    samples: Vec<i16>,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn silence(duration: Duration) -> Self {
        let n = (SAMPLE_RATE_HZ as u128 * duration.as_millis() / 1000) as usize;
        Self::new(vec![0; n * CHANNELS as usize])
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.frame_count() as u64 * 1_000_000 / SAMPLE_RATE_HZ as u64)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * BYTES_PER_SAMPLE);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(DecodeError::OddLength(bytes.len()));
        }
        let samples = bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(Self { samples })
    }

    /// Binary-to-text encoding used on the wire (standard base64).
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_le_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self, DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        Self::from_le_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_little_endian() {
        let f = PcmFrame::new(vec![1, -2, i16::MAX]);
        assert_eq!(f.to_le_bytes(), vec![0x01, 0x00, 0xfe, 0xff, 0xff, 0x7f]);
    }

    #[test]
    fn base64_payload_decodes_to_original_frame() {
        let f = PcmFrame::new(vec![0, 100, -100, i16::MIN, i16::MAX]);
        let text = f.to_base64();
        assert_eq!(PcmFrame::from_base64(&text).unwrap(), f);
    }

    #[test]
    fn odd_byte_count_is_rejected() {
        let err = PcmFrame::from_le_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, DecodeError::OddLength(3));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = PcmFrame::from_base64("not base64!!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn duration_follows_wire_rate() {
        let f = PcmFrame::silence(Duration::from_millis(20));
        assert_eq!(f.frame_count(), 480);
        assert_eq!(f.duration(), Duration::from_millis(20));
    }
}
