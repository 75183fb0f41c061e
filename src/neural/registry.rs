//! Known model table
//!
//! Maps the short names used in output file names to Hugging Face Hub
//! repositories, along with the shape facts needed before the weights are
//! downloaded (layer count for planning, weight size for device checks).

use serde::Serialize;

/// A pretrained speech model this crate knows by short name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnownModel {
    /// Short name used in output file names
    pub name: &'static str,
    /// Hub repository id
    pub repo: &'static str,
    /// Transformer layers (hidden states returned = layers + 1)
    pub transformer_layers: usize,
    /// Hidden size of every layer
    pub hidden_size: usize,
    /// Approximate size of the f32 weights in GB
    pub weights_gb: f32,
}

impl KnownModel {
    /// Hidden-state tensors per input, embedding output included
    pub fn hidden_states(&self) -> usize {
        self.transformer_layers + 1
    }
}

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "wav2vec2-xls-r-2b";

/// Models with known layouts
pub const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        name: "wav2vec2-xls-r-2b",
        repo: "facebook/wav2vec2-xls-r-2b",
        transformer_layers: 48,
        hidden_size: 1920,
        weights_gb: 8.6,
    },
    KnownModel {
        name: "wav2vec2-xls-r-1b",
        repo: "facebook/wav2vec2-xls-r-1b",
        transformer_layers: 48,
        hidden_size: 1280,
        weights_gb: 3.8,
    },
    KnownModel {
        name: "wav2vec2-xls-r-300m",
        repo: "facebook/wav2vec2-xls-r-300m",
        transformer_layers: 24,
        hidden_size: 1024,
        weights_gb: 1.3,
    },
    KnownModel {
        name: "wav2vec2-large-xlsr-53",
        repo: "facebook/wav2vec2-large-xlsr-53",
        transformer_layers: 24,
        hidden_size: 1024,
        weights_gb: 1.3,
    },
    KnownModel {
        name: "wav2vec2-base",
        repo: "facebook/wav2vec2-base",
        transformer_layers: 12,
        hidden_size: 768,
        weights_gb: 0.4,
    },
];

/// Look up a model by short name or repository id
pub fn find_model(name: &str) -> Option<&'static KnownModel> {
    KNOWN_MODELS
        .iter()
        .find(|m| m.name == name || m.repo == name)
}

/// Repository id for a model name; unknown names are taken as repo ids
pub fn resolve_repo(name: &str) -> &str {
    find_model(name).map(|m| m.repo).unwrap_or(name)
}

/// Name safe to embed in a file name
pub fn file_stem_name(name: &str) -> String {
    let short = find_model(name).map(|m| m.name).unwrap_or(name);
    short.replace(['/', '\\'], "_")
}
