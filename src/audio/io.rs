//! Audio file loading
//!
//! Reads WAV files of any common bit depth, converts to 32-bit float,
//! downmixes to mono and resamples to the rate the model expects.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::resample::resample;
use crate::error::{ExtractError, Result};

/// Sample rate every supported speech model expects
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

/// Load an audio file as mono `f32` samples at `target_rate`
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `InvalidAudio` - If the file is not a readable WAV file
/// * `UnsupportedFormat` - If the bit depth is not supported
/// * `EmptyAudio` - If the file holds no samples
pub fn load_audio(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    if !path.exists() {
        return Err(ExtractError::FileNotFound {
            path: path.display().to_string(),
            source: None,
        });
    }

    let reader = WavReader::open(path).map_err(|e| ExtractError::InvalidAudio {
        reason: format!("Failed to open WAV file {}: {}", path.display(), e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(ExtractError::InvalidAudio {
            reason: format!("{} declares zero channels", path.display()),
            source: None,
        });
    }

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let mono = downmix_to_mono(&interleaved, channels);

    if mono.is_empty() {
        return Err(ExtractError::EmptyAudio {
            path: path.display().to_string(),
        });
    }

    resample(&mono, spec.sample_rate, target_rate)
}

/// Write mono `f32` samples as a 32-bit float WAV file
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec).map_err(to_io_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(to_io_error)?;
    }
    writer.finalize().map_err(to_io_error)?;

    Ok(())
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;

    (0..num_samples)
        .map(|i| (angular_freq * i as f32).sin())
        .collect()
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn to_io_error(e: hound::Error) -> ExtractError {
    match e {
        hound::Error::IoError(io) => ExtractError::Io(io),
        other => ExtractError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |e: hound::Error| ExtractError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 | 16 | 24 | 32 => (1u64 << (bits_per_sample - 1)) as f32,
                _ => {
                    return Err(ExtractError::UnsupportedFormat {
                        format: format!("{}-bit integer audio", bits_per_sample),
                    })
                }
            };
            // hound widens every integer depth into i32
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(invalid)
        }
    }
}

/// Average interleaved frames down to one channel
fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
