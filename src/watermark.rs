use std::f64::consts::PI;
use thiserror::Error;

/// Subsonic default so the mark stays below the audible band.
pub const DEFAULT_FREQUENCY_HZ: f64 = 20.0;
pub const DEFAULT_AMPLITUDE: f32 = 0.1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WatermarkError {
    #[error("Invalid watermark parameters: {0}")]
    InvalidParameters(String),
    #[error("Audio buffer is empty")]
    EmptyBuffer,
    #[error("Channel {channel} has {actual} samples, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },
}

/// Decoded PCM audio, one sample sequence per channel.
///
/// Samples are nominally in [-1.0, 1.0]. All channels have the same
/// non-zero length; `AudioBuffer::new` enforces that, and
/// `embed_watermark` re-checks it for buffers assembled field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, WatermarkError> {
        let buffer = AudioBuffer {
            channels,
            sample_rate,
        };
        buffer.validate()?;
        Ok(buffer)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64 * 1000) / self.sample_rate as u64
    }

    pub fn validate(&self) -> Result<(), WatermarkError> {
        let expected = match self.channels.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return Err(WatermarkError::EmptyBuffer),
        };

        for (channel, samples) in self.channels.iter().enumerate().skip(1) {
            if samples.is_empty() {
                return Err(WatermarkError::EmptyBuffer);
            }
            if samples.len() != expected {
                return Err(WatermarkError::ChannelLengthMismatch {
                    channel,
                    expected,
                    actual: samples.len(),
                });
            }
        }

        if self.sample_rate == 0 {
            return Err(WatermarkError::InvalidParameters(
                "sample rate must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Tone summed into every channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkParameters {
    frequency_hz: f64,
    amplitude: f32,
}

impl Default for WatermarkParameters {
    fn default() -> Self {
        WatermarkParameters {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            amplitude: DEFAULT_AMPLITUDE,
        }
    }
}

impl WatermarkParameters {
    pub fn new(frequency_hz: f64, amplitude: f32) -> Result<Self, WatermarkError> {
        let params = WatermarkParameters {
            frequency_hz,
            amplitude,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    fn validate(&self) -> Result<(), WatermarkError> {
        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return Err(WatermarkError::InvalidParameters(format!(
                "frequency must be positive, got {}",
                self.frequency_hz
            )));
        }
        if !self.amplitude.is_finite() || self.amplitude <= 0.0 || self.amplitude >= 1.0 {
            return Err(WatermarkError::InvalidParameters(format!(
                "amplitude must be in (0, 1), got {}",
                self.amplitude
            )));
        }
        Ok(())
    }
}

/// Sum a low-frequency sine into every channel of `buffer`.
///
/// For sample `i` the added value is
/// `amplitude * sin(2π * frequency_hz * i / sample_rate)`, with the phase
/// running continuously over the whole channel. The sum is clamped to
/// [-1.0, 1.0]. The same input always produces the same output, and the
/// returned buffer has the shape of the input (it is the input, mutated
/// in place).
pub fn embed_watermark(
    mut buffer: AudioBuffer,
    params: WatermarkParameters,
) -> Result<AudioBuffer, WatermarkError> {
    params.validate()?;
    buffer.validate()?;

    let step = 2.0 * PI * params.frequency_hz / buffer.sample_rate as f64;
    let amplitude = params.amplitude as f64;

    for channel in buffer.channels.iter_mut() {
        for (i, sample) in channel.iter_mut().enumerate() {
            let mark = amplitude * (step * i as f64).sin();
            *sample = (*sample as f64 + mark).clamp(-1.0, 1.0) as f32;
        }
    }

    Ok(buffer)
}
