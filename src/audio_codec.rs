use crate::watermark::{AudioBuffer, WatermarkError};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;

/// Bit depth used for every encoded output
const OUTPUT_BITS_PER_SAMPLE: u16 = 16;
const FLAC_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] SymphoniaError),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC encoding error: {0}")]
    Flac(String),
    #[error("No audio tracks found")]
    NoAudioTracks,
    #[error("Decoded stream contains no samples")]
    NoSamples,
    #[error("Missing stream parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid audio buffer: {0}")]
    InvalidBuffer(#[from] WatermarkError),
}

/// Container written when re-encoding a watermarked track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Flac,
    Wav,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Flac => "flac",
            TargetFormat::Wav => "wav",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            TargetFormat::Flac => "audio/flac",
            TargetFormat::Wav => "audio/wav",
        }
    }

    /// WAV uploads stay WAV; anything else (mp3, flac, ...) becomes FLAC.
    pub fn for_source(file_name: &str, content_type: &str) -> Self {
        let is_wav = content_type.eq_ignore_ascii_case("audio/wav")
            || content_type.eq_ignore_ascii_case("audio/x-wav")
            || content_type.eq_ignore_ascii_case("audio/wave")
            || file_name.to_ascii_lowercase().ends_with(".wav");
        if is_wav {
            TargetFormat::Wav
        } else {
            TargetFormat::Flac
        }
    }
}

/// Audio decode/encode boundary. The watermark engine only sees the
/// decoded buffers.
pub trait AudioCodec: Send + Sync {
    /// Decode a complete file. `extension` is a probe hint and may be empty.
    fn decode(&self, bytes: &[u8], extension: &str) -> Result<AudioBuffer, CodecError>;

    fn encode(&self, buffer: &AudioBuffer, format: TargetFormat) -> Result<Vec<u8>, CodecError>;
}

/// Codec backed by Symphonia for decoding, flacenc and hound for encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaCodec;

impl SymphoniaCodec {
    pub fn new() -> Self {
        SymphoniaCodec
    }
}

impl AudioCodec for SymphoniaCodec {
    fn decode(&self, bytes: &[u8], extension: &str) -> Result<AudioBuffer, CodecError> {
        let cursor = Cursor::new(bytes.to_vec());
        let media_source = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        if !extension.is_empty() {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(CodecError::NoAudioTracks)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or(CodecError::MissingParameter("sample rate"))?;

        let mut decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(CodecError::Symphonia(e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Corrupt frame: skip it, the stream may recover
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(CodecError::Symphonia(e)),
            };

            let spec = *decoded.spec();
            let channel_count = spec.channels.count();
            if channels.is_empty() {
                channels = vec![Vec::new(); channel_count];
            }

            let buf = sample_buf.get_or_insert_with(|| {
                SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
            });
            if buf.capacity() < decoded.capacity() * channel_count {
                *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            }
            buf.copy_interleaved_ref(decoded);

            for frame in buf.samples().chunks_exact(channel_count) {
                for (channel, sample) in channels.iter_mut().zip(frame) {
                    channel.push(*sample);
                }
            }
        }

        // FLAC pads the last block; the stream header knows the true length
        if let Some(n_frames) = codec_params.n_frames {
            for channel in &mut channels {
                channel.truncate(n_frames as usize);
            }
        }

        if channels.first().map(Vec::is_empty).unwrap_or(true) {
            return Err(CodecError::NoSamples);
        }

        let buffer = AudioBuffer::new(channels, sample_rate)?;
        debug!(
            "Decoded {} channel(s), {} frames ({} ms) at {} Hz",
            buffer.channel_count(),
            buffer.frames(),
            buffer.duration_ms(),
            sample_rate
        );

        Ok(buffer)
    }

    fn encode(&self, buffer: &AudioBuffer, format: TargetFormat) -> Result<Vec<u8>, CodecError> {
        buffer.validate()?;
        match format {
            TargetFormat::Flac => encode_flac(buffer),
            TargetFormat::Wav => encode_wav(buffer),
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Interleave channels as 16-bit integers
fn interleave_i16(buffer: &AudioBuffer) -> Vec<i16> {
    let frames = buffer.frames();
    let mut interleaved = Vec::with_capacity(frames * buffer.channel_count());
    for frame in 0..frames {
        for channel in &buffer.channels {
            interleaved.push(to_i16(channel[frame]));
        }
    }
    interleaved
}

fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>, CodecError> {
    let spec = hound::WavSpec {
        channels: buffer.channel_count() as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: OUTPUT_BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in interleave_i16(buffer) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn encode_flac(buffer: &AudioBuffer) -> Result<Vec<u8>, CodecError> {
    use flacenc::bitsink::ByteSink;
    use flacenc::component::BitRepr;
    use flacenc::config;
    use flacenc::error::Verify;
    use flacenc::source::MemSource;

    let samples: Vec<i32> = interleave_i16(buffer).into_iter().map(i32::from).collect();
    let source = MemSource::from_samples(
        &samples,
        buffer.channel_count(),
        OUTPUT_BITS_PER_SAMPLE as usize,
        buffer.sample_rate as usize,
    );

    let config = config::Encoder::default()
        .into_verified()
        .map_err(|(_, e)| CodecError::Flac(format!("invalid encoder config: {:?}", e)))?;

    let flac_stream = flacenc::encode_with_fixed_block_size(&config, source, FLAC_BLOCK_SIZE)
        .map_err(|e| CodecError::Flac(format!("{:?}", e)))?;

    let mut sink = ByteSink::new();
    flac_stream
        .write(&mut sink)
        .map_err(|e| CodecError::Flac(format!("failed to write stream: {:?}", e)))?;

    Ok(sink.as_slice().to_vec())
}
