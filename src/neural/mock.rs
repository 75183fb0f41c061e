//! Mock extractor for testing
//!
//! Produces hidden states of a fixed shape without running any model. The
//! fill value is either the number of earlier calls (so row `i` of every
//! output matrix is all `i`) or derived from the input signal.

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array3;

use super::model::{ExtractorInfo, FeatureExtractor, HiddenStates};
use crate::audio::MODEL_SAMPLE_RATE;
use crate::error::{ExtractError, Result};

/// How the mock fills each hidden-state tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFill {
    /// Every element equals the number of earlier `extract` calls
    CallIndex,
    /// Every element equals the input mean plus the layer index
    SignalMean,
}

/// Mock hidden-state extractor
pub struct MockExtractor {
    info: ExtractorInfo,
    layers: usize,
    frames: usize,
    fill: MockFill,
    calls: AtomicUsize,
}

impl MockExtractor {
    /// Create a mock returning `layers` tensors shaped `(1, frames, dim)`
    pub fn new(layers: usize, frames: usize, dim: usize, fill: MockFill) -> Self {
        Self {
            info: ExtractorInfo {
                id: "mock".to_string(),
                source: "mock".to_string(),
                num_layers: layers,
                hidden_size: dim,
                sample_rate: MODEL_SAMPLE_RATE,
                device: "cpu".to_string(),
            },
            layers,
            frames,
            fill,
            calls: AtomicUsize::new(0),
        }
    }

    /// Report a layer count different from the one actually produced
    pub fn with_reported_layers(mut self, reported: usize) -> Self {
        self.info.num_layers = reported;
        self
    }

    /// Number of `extract` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeatureExtractor for MockExtractor {
    fn info(&self) -> &ExtractorInfo {
        &self.info
    }

    fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<HiddenStates> {
        if sample_rate != self.info.sample_rate {
            return Err(ExtractError::InvalidInput {
                reason: format!(
                    "expected {} Hz audio, got {} Hz",
                    self.info.sample_rate, sample_rate
                ),
            });
        }
        if samples.is_empty() {
            return Err(ExtractError::InvalidInput {
                reason: "no samples".to_string(),
            });
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        let shape = (1, self.frames, self.info.hidden_size);

        Ok((0..self.layers)
            .map(|layer| {
                let value = match self.fill {
                    MockFill::CallIndex => call as f32,
                    MockFill::SignalMean => mean + layer as f32,
                };
                Array3::from_elem(shape, value)
            })
            .collect())
    }
}
