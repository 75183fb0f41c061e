//! Sample rate conversion
//!
//! Wraps rubato's FFT resampler for whole-file conversion of a mono signal.
//! The resampler's output delay is trimmed so the result lines up with the
//! input, and the length is `ceil(len * target / source)`.

use rubato::{FftFixedInOut, Resampler};

use crate::error::{ExtractError, Result};

/// Frames per processing block handed to rubato
const CHUNK_SIZE: usize = 1024;

/// Resample a mono signal from `source_rate` to `target_rate`
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == 0 || target_rate == 0 {
        return Err(ExtractError::InvalidInput {
            reason: format!("invalid sample rate conversion {source_rate} -> {target_rate}"),
        });
    }
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, CHUNK_SIZE, 1)
            .map_err(|e| ExtractError::InvalidAudio {
                reason: format!("cannot resample {source_rate} Hz -> {target_rate} Hz: {e}"),
                source: Some(Box::new(e)),
            })?;

    let expected_len =
        (samples.len() as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected_len + delay + CHUNK_SIZE);
    let mut pos = 0;

    while output.len() < expected_len + delay {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(samples.len());
        let src: &[f32] = if pos < samples.len() {
            &samples[pos..end]
        } else {
            &[]
        };

        let mut chunk = Vec::with_capacity(needed);
        chunk.extend_from_slice(src);
        chunk.resize(needed, 0.0);

        let out = resampler
            .process(&[chunk], None)
            .map_err(|e| ExtractError::InvalidAudio {
                reason: format!("resampling failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        output.extend_from_slice(&out[0]);
        pos += needed;
    }

    output.drain(..delay);
    output.truncate(expected_len);
    Ok(output)
}
