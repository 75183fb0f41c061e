//! wav2vec2 checkpoint configuration (`config.json`)

use std::path::Path;

use serde::Deserialize;

use crate::error::{ExtractError, Result};

/// Normalisation used inside the convolutional feature encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatExtractNorm {
    /// Group norm on the first conv layer only
    Group,
    /// Layer norm after every conv layer
    Layer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Wav2Vec2ModelConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub conv_dim: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_feat_norm")]
    pub feat_extract_norm: FeatExtractNorm,
    #[serde(default)]
    pub conv_bias: bool,
    #[serde(default)]
    pub do_stable_layer_norm: bool,
}

fn default_eps() -> f64 {
    1e-5
}

fn default_feat_norm() -> FeatExtractNorm {
    FeatExtractNorm::Group
}

impl Wav2Vec2ModelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| ExtractError::ModelLoad {
            model: path.display().to_string(),
            reason: format!("cannot read config: {e}"),
        })?;
        let cfg: Self = serde_json::from_str(&data).map_err(|e| ExtractError::ModelLoad {
            model: path.display().to_string(),
            reason: format!("cannot parse config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            Err(ExtractError::ModelLoad {
                model: "config.json".to_string(),
                reason,
            })
        };

        if self.conv_dim.is_empty()
            || self.conv_dim.len() != self.conv_kernel.len()
            || self.conv_dim.len() != self.conv_stride.len()
        {
            return invalid(format!(
                "conv_dim/conv_kernel/conv_stride lengths differ ({}/{}/{})",
                self.conv_dim.len(),
                self.conv_kernel.len(),
                self.conv_stride.len()
            ));
        }
        if let Some(i) = (0..self.conv_dim.len())
            .find(|&i| self.conv_kernel[i] == 0 || self.conv_stride[i] == 0)
        {
            return invalid(format!(
                "conv layer {} has kernel {} and stride {} (both must be at least 1)",
                i, self.conv_kernel[i], self.conv_stride[i]
            ));
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return invalid(format!(
                "hidden_size {} is not divisible by {} attention heads",
                self.hidden_size, self.num_attention_heads
            ));
        }
        if self.num_conv_pos_embedding_groups == 0
            || self.hidden_size % self.num_conv_pos_embedding_groups != 0
        {
            return invalid(format!(
                "hidden_size {} is not divisible by {} positional conv groups",
                self.hidden_size, self.num_conv_pos_embedding_groups
            ));
        }
        Ok(())
    }

    /// Hidden-state tensors per input: every transformer layer plus the embedding
    pub fn num_hidden_states(&self) -> usize {
        self.num_hidden_layers + 1
    }

    /// Fewest input samples that yield one output frame
    pub fn receptive_field(&self) -> usize {
        self.conv_kernel
            .iter()
            .zip(&self.conv_stride)
            .rev()
            .fold(1, |need, (&kernel, &stride)| (need - 1) * stride + kernel)
    }
}
