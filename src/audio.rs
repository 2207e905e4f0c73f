/// Audio normalization module
///
/// Converts incoming PCM chunks of any rate, width and channel count to the format every
/// detector expects (16kHz, 16-bit signed, mono). Conversion is per chunk and keeps no
/// state between calls.

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

/// Canonical detector sample (16-bit PCM)
pub type AudioSample = i16;

/// Target sample rate for detectors (16kHz)
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Target sample width in bytes
pub const TARGET_SAMPLE_WIDTH: u16 = 2;

/// Target channel count
pub const TARGET_CHANNELS: u16 = 1;

/// Lowest accepted input rate
pub const MIN_SAMPLE_RATE: u32 = 1_000;

/// Highest accepted input rate
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Sinc filter length used when resampling
const SINC_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Invalid sample rate: {0} Hz (must be 1000-384000)")]
    InvalidSampleRate(u32),

    #[error("Invalid channel count: {0} (must be > 0)")]
    InvalidChannelCount(u16),

    #[error("Unsupported sample width: {0} bytes (must be 1-4)")]
    UnsupportedSampleWidth(u16),

    #[error("Payload of {len} bytes is not a whole number of {frame_bytes}-byte frames")]
    MisalignedPayload { len: usize, frame_bytes: usize },

    #[error("Resampling failed: {0}")]
    ResamplingError(String),
}

/// PCM format of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
    /// Bytes per sample
    pub width: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(rate: u32, width: u16, channels: u16) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// Format detectors consume (16kHz, 16-bit, mono)
    pub fn detector_format() -> Self {
        Self::new(TARGET_SAMPLE_RATE, TARGET_SAMPLE_WIDTH, TARGET_CHANNELS)
    }

    /// Validate format parameters
    pub fn validate(&self) -> Result<(), AudioError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.rate) {
            return Err(AudioError::InvalidSampleRate(self.rate));
        }

        if self.channels == 0 {
            return Err(AudioError::InvalidChannelCount(self.channels));
        }

        if !(1..=4).contains(&self.width) {
            return Err(AudioError::UnsupportedSampleWidth(self.width));
        }

        Ok(())
    }

    /// Bytes per interleaved frame (one sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.channels as usize
    }
}

/// One chunk of raw PCM audio with its format
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub format: AudioFormat,
    /// Milliseconds since stream start, as sent by the client
    pub timestamp: Option<u64>,
    pub audio: Bytes,
}

impl AudioChunk {
    pub fn new(format: AudioFormat, audio: impl Into<Bytes>) -> Self {
        Self {
            format,
            timestamp: None,
            audio: audio.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Build a canonical-format chunk from 16-bit samples
    pub fn from_samples(samples: &[AudioSample]) -> Self {
        let audio: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(AudioFormat::detector_format(), audio)
    }
}

/// Stateless converter to the detector format
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioNormalizer;

impl AudioNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Format every converted chunk is in
    pub fn target_format(&self) -> AudioFormat {
        AudioFormat::detector_format()
    }

    /// Convert a chunk to 16kHz 16-bit mono samples
    pub fn convert(&self, chunk: &AudioChunk) -> Result<Vec<AudioSample>, AudioError> {
        let format = chunk.format;
        format.validate()?;

        let frame_bytes = format.frame_bytes();
        if chunk.audio.len() % frame_bytes != 0 {
            return Err(AudioError::MisalignedPayload {
                len: chunk.audio.len(),
                frame_bytes,
            });
        }

        if chunk.audio.is_empty() {
            return Ok(Vec::new());
        }

        if format == self.target_format() {
            trace!("Chunk already in detector format");
            return Ok(Self::decode_i16(&chunk.audio));
        }

        let samples = Self::decode(&chunk.audio, format.width);

        let mono = if format.channels > 1 {
            Self::downmix(&samples, format.channels as usize)
        } else {
            samples
        };

        let resampled = if format.rate != TARGET_SAMPLE_RATE {
            Self::resample(&mono, format.rate)?
        } else {
            mono
        };

        trace!(
            "Converted {} bytes ({}Hz, {} bytes, {} ch) -> {} samples",
            chunk.audio.len(),
            format.rate,
            format.width,
            format.channels,
            resampled.len()
        );

        Ok(Self::quantize(&resampled))
    }

    fn decode_i16(bytes: &[u8]) -> Vec<AudioSample> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Decode little-endian PCM into floats in [-1.0, 1.0)
    ///
    /// 8-bit audio is unsigned, wider widths are signed.
    fn decode(bytes: &[u8], width: u16) -> Vec<f32> {
        match width {
            1 => bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
            2 => bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect(),
            3 => bytes
                .chunks_exact(3)
                .map(|b| {
                    // Place the 24 bits high in an i32 so the shift sign-extends
                    let value = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                    value as f32 / 8_388_608.0
                })
                .collect(),
            _ => bytes
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
                .collect(),
        }
    }

    /// Average interleaved channels into one
    fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Resample mono audio to the target rate
    ///
    /// Returns exactly `round(len * ratio)` samples aligned with the input: the filter
    /// delay is dropped from the front and the tail is flushed out with silence.
    fn resample(samples: &[f32], input_rate: u32) -> Result<Vec<f32>, AudioError> {
        use rubato::{
            Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
            WindowFunction,
        };

        debug!("Resampling: {} Hz -> {} Hz", input_rate, TARGET_SAMPLE_RATE);

        let ratio = TARGET_SAMPLE_RATE as f64 / input_rate as f64;
        let expected = (samples.len() as f64 * ratio).round() as usize;

        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 64,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut resampler =
            SincFixedIn::<f32>::new(ratio, 1.0, params, samples.len().max(SINC_LEN), 1)
                .map_err(|e| AudioError::ResamplingError(e.to_string()))?;

        let delay = resampler.output_delay();
        let needed = delay + expected;

        let input_waves = vec![samples.to_vec()];
        let mut output = resampler
            .process_partial(Some(input_waves.as_slice()), None)
            .map_err(|e| AudioError::ResamplingError(e.to_string()))?
            .pop()
            .unwrap_or_default();

        // Each flush pushes a full chunk of silence, so a few always cover the delay
        for _ in 0..4 {
            if output.len() >= needed {
                break;
            }
            let tail = resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| AudioError::ResamplingError(e.to_string()))?;
            output.extend(tail.into_iter().next().unwrap_or_default());
        }

        let mut aligned: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
        aligned.resize(expected, 0.0);

        Ok(aligned)
    }

    /// Requantize floats to 16-bit PCM, clamping out-of-range values
    fn quantize(samples: &[f32]) -> Vec<AudioSample> {
        samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    fn chunk(rate: u32, width: u16, channels: u16, audio: Vec<u8>) -> AudioChunk {
        AudioChunk::new(AudioFormat::new(rate, width, channels), audio)
    }

    #[test]
    fn test_format_validation() {
        assert!(AudioFormat::new(16000, 2, 1).validate().is_ok());
        assert!(AudioFormat::new(16000, 2, 0).validate().is_err());
        assert!(AudioFormat::new(16000, 5, 1).validate().is_err());
    }

    #[test]
    fn test_passthrough_is_exact() {
        let samples = vec![0, 1, -1, i16::MAX, i16::MIN, 1234];
        let converted = AudioNormalizer::new()
            .convert(&AudioChunk::from_samples(&samples))
            .unwrap();

        assert_eq!(converted, samples);
    }

    #[test]
    fn test_stereo_downmix() {
        // left = 0.5, right = 0.25 (as i16)
        let left = (0.5 * 32768.0) as i16;
        let right = (0.25 * 32768.0) as i16;
        let audio: Vec<u8> = (0..4)
            .flat_map(|_| [left.to_le_bytes(), right.to_le_bytes()].concat())
            .collect();

        let converted = AudioNormalizer::new()
            .convert(&chunk(16000, 2, 2, audio))
            .unwrap();

        assert_eq!(converted.len(), 4);
        for sample in converted {
            assert_relative_eq!(sample as f32 / i16::MAX as f32, 0.375, epsilon = 0.001);
        }
    }

    #[test]
    fn test_unsigned_8bit_decode() {
        let converted = AudioNormalizer::new()
            .convert(&chunk(16000, 1, 1, vec![128, 255, 0]))
            .unwrap();

        assert_eq!(converted[0], 0);
        assert!(converted[1] > 32000);
        assert_eq!(converted[2], -i16::MAX);
    }

    #[test]
    fn test_24bit_decode_sign_extends() {
        // -1 as 24-bit little endian, then +0.5
        let audio = vec![0xff, 0xff, 0xff, 0x00, 0x00, 0x40];
        let converted = AudioNormalizer::new()
            .convert(&chunk(16000, 3, 1, audio))
            .unwrap();

        assert_eq!(converted[0], 0);
        assert_relative_eq!(converted[1] as f32 / i16::MAX as f32, 0.5, epsilon = 0.001);
    }

    #[test]
    fn test_32bit_decode() {
        let audio = i32::MIN.to_le_bytes().to_vec();
        let converted = AudioNormalizer::new()
            .convert(&chunk(16000, 4, 1, audio))
            .unwrap();

        assert_eq!(converted, vec![-i16::MAX]);
    }

    #[test]
    fn test_misaligned_payload() {
        let result = AudioNormalizer::new().convert(&chunk(16000, 2, 2, vec![0; 6]));
        assert!(matches!(
            result,
            Err(AudioError::MisalignedPayload { len: 6, frame_bytes: 4 })
        ));
    }

    #[test]
    fn test_empty_chunk() {
        let converted = AudioNormalizer::new()
            .convert(&chunk(44100, 2, 2, Vec::new()))
            .unwrap();
        assert!(converted.is_empty());
    }

    #[test_case(0 ; "zero")]
    #[test_case(1 ; "one hertz")]
    #[test_case(999 ; "below minimum")]
    #[test_case(384_001 ; "above maximum")]
    fn test_out_of_range_rate_rejected(rate: u32) {
        let result = AudioNormalizer::new().convert(&chunk(rate, 2, 1, vec![0; 500_000]));
        assert!(matches!(result, Err(AudioError::InvalidSampleRate(r)) if r == rate));
    }

    #[test_case(1_000 ; "minimum")]
    #[test_case(384_000 ; "maximum")]
    fn test_rate_bounds_accepted(rate: u32) {
        assert!(AudioFormat::new(rate, 2, 1).validate().is_ok());
    }

    #[test_case(8000, 800, 1600 ; "upsample_8k")]
    #[test_case(22050, 2205, 1600 ; "downsample_22k")]
    #[test_case(44100, 4410, 1600 ; "downsample_44k")]
    #[test_case(48000, 4800, 1600 ; "downsample_48k")]
    #[test_case(48000, 7, 2 ; "tiny chunk")]
    #[test_case(11025, 1000, 1451 ; "rounds to nearest")]
    fn test_resampled_length_is_exact(input_rate: u32, frames: usize, expected: usize) {
        let converted = AudioNormalizer::new()
            .convert(&chunk(input_rate, 2, 1, vec![0; frames * 2]))
            .unwrap();

        assert_eq!(converted.len(), expected);
    }

    #[test]
    fn test_resampling_keeps_chunk_tail() {
        // 100ms at 48kHz, silent except for the last 30 samples
        let audio: Vec<u8> = (0..4800)
            .flat_map(|i| (if i >= 4770 { 20000i16 } else { 0 }).to_le_bytes())
            .collect();

        let converted = AudioNormalizer::new()
            .convert(&chunk(48000, 2, 1, audio))
            .unwrap();

        assert_eq!(converted.len(), 1600);
        let tail_peak = converted[1590..].iter().map(|s| s.abs()).max().unwrap();
        assert!(tail_peak > 15000, "tail peak was {}", tail_peak);
        let head_peak = converted[..1500].iter().map(|s| s.abs()).max().unwrap();
        assert!(head_peak < 1000, "head peak was {}", head_peak);
    }

    #[test]
    fn test_resampling_preserves_level() {
        let audio: Vec<u8> = (0..2205).flat_map(|_| 8000i16.to_le_bytes()).collect();

        let converted = AudioNormalizer::new()
            .convert(&chunk(22050, 2, 1, audio))
            .unwrap();

        // Away from both edges the constant level survives
        for &sample in &converted[200..1400] {
            assert_relative_eq!(sample as f32, 8000.0, epsilon = 200.0);
        }
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let audio: Vec<u8> = (0..4410u32)
            .flat_map(|i| ((i % 200) as i16 * 100).to_le_bytes())
            .collect();
        let input = chunk(44100, 2, 1, audio);
        let normalizer = AudioNormalizer::new();

        assert_eq!(
            normalizer.convert(&input).unwrap(),
            normalizer.convert(&input).unwrap()
        );
    }

    #[test]
    fn test_quantize_clamps() {
        let quantized = AudioNormalizer::quantize(&[1.5, -2.0, 0.0]);
        assert_eq!(quantized, vec![i16::MAX, -i16::MAX, 0]);
    }
}
