//! Input preprocessing paired with wav2vec2 checkpoints
//!
//! Mirrors the settings found in a checkpoint's `preprocessor_config.json`:
//! the expected sampling rate and whether the waveform is normalised to zero
//! mean and unit variance before the first convolution.

use std::path::Path;

use serde::Deserialize;

use crate::audio::MODEL_SAMPLE_RATE;
use crate::error::{ExtractError, Result};

/// Variance floor used by the normalisation
const NORM_EPS: f64 = 1e-7;

/// Waveform preprocessing settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreprocessorConfig {
    #[serde(default = "default_do_normalize")]
    pub do_normalize: bool,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
}

fn default_do_normalize() -> bool {
    true
}

fn default_sampling_rate() -> u32 {
    MODEL_SAMPLE_RATE
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_normalize: default_do_normalize(),
            sampling_rate: default_sampling_rate(),
        }
    }
}

impl PreprocessorConfig {
    /// Load from a JSON file, falling back to defaults when it is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Check the rate and apply normalisation
    pub fn prepare(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        if sample_rate != self.sampling_rate {
            return Err(ExtractError::InvalidInput {
                reason: format!(
                    "expected {} Hz audio, got {} Hz",
                    self.sampling_rate, sample_rate
                ),
            });
        }
        if samples.is_empty() {
            return Err(ExtractError::InvalidInput {
                reason: "no samples".to_string(),
            });
        }

        Ok(if self.do_normalize {
            zero_mean_unit_var(samples)
        } else {
            samples.to_vec()
        })
    }
}

/// Normalise to zero mean and unit variance, accumulating in f64
pub fn zero_mean_unit_var(samples: &[f32]) -> Vec<f32> {
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = (var + NORM_EPS).sqrt();

    samples
        .iter()
        .map(|&x| ((x as f64 - mean) / std) as f32)
        .collect()
}
