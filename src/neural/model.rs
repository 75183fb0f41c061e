//! Feature extractor trait and core types
//!
//! Defines the interface every hidden-state extractor implements.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-layer hidden states for one input
///
/// One tensor per layer, shallowest first, each shaped
/// `(batch, time, feature_dim)` with `batch == 1`.
pub type HiddenStates = Vec<Array3<f32>>;

/// Information about a loaded extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorInfo {
    /// Model identifier used in output file names (e.g. "wav2vec2-xls-r-2b")
    pub id: String,

    /// Where the weights came from (hub repo or local directory)
    pub source: String,

    /// Number of hidden-state tensors per input, embedding layer included
    pub num_layers: usize,

    /// Width of every hidden-state tensor
    pub hidden_size: usize,

    /// Sample rate the model expects
    pub sample_rate: u32,

    /// Device the model runs on
    pub device: String,
}

/// Trait that all hidden-state extractors implement
///
/// Implementations hold their weights read-only after construction, so a
/// single instance can serve every call of a run.
pub trait FeatureExtractor: Send + Sync {
    /// Get extractor information
    fn info(&self) -> &ExtractorInfo;

    /// Run the model on mono samples and return every layer's hidden states
    ///
    /// # Arguments
    /// * `samples` - Mono audio at `sample_rate`
    /// * `sample_rate` - Must equal [`FeatureExtractor::sample_rate`]
    fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<HiddenStates>;

    /// Number of hidden-state tensors `extract` returns
    fn num_layers(&self) -> usize {
        self.info().num_layers
    }

    /// Sample rate `extract` expects
    fn sample_rate(&self) -> u32 {
        self.info().sample_rate
    }

    /// Model identifier (convenience method)
    fn id(&self) -> &str {
        &self.info().id
    }
}
