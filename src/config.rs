//! Extraction run configuration
//!
//! Every path and switch of a run lives here. Defaults reproduce the original
//! ASVspoof 2019 training-set extraction; a JSON file can override any subset
//! of fields and CLI flags override the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};
use crate::metadata::EntryOrder;
use crate::neural::{find_model, DevicePreference, DEFAULT_MODEL};
use crate::pipeline::{MissingFilePolicy, PipelineOptions};
use crate::storage::OutputPathMode;

/// Settings for one extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Short model name or hub repository id
    pub model: String,
    /// Local checkpoint directory; the hub is used when unset
    pub model_dir: Option<PathBuf>,
    pub device: DevicePreference,
    /// Directory metadata entries are resolved against
    pub input_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub output_dir: PathBuf,
    /// Dataset tag embedded in output file names
    pub tag: String,
    pub order: EntryOrder,
    pub missing_files: MissingFilePolicy,
    pub output_path_mode: OutputPathMode,
    /// Create `output_dir` instead of failing when it is missing
    pub create_output_dir: bool,
    /// Hidden-state count the model must report
    pub expected_layers: Option<usize>,
    /// Appended to every metadata entry
    pub file_suffix: Option<String>,
    /// Log progress every this many files (0 disables)
    pub progress_every: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            model_dir: None,
            device: DevicePreference::Auto,
            input_dir: PathBuf::from("./DATA/asv19/"),
            metadata_file: PathBuf::from("./processed_metadata/asv19_train_systems.csv"),
            output_dir: PathBuf::from("./feats/wav2vec2-xls-r-2b/"),
            tag: "asv19_train".to_string(),
            order: EntryOrder::Preserve,
            missing_files: MissingFilePolicy::Fail,
            output_path_mode: OutputPathMode::AsGiven,
            create_output_dir: false,
            expected_layers: None,
            file_suffix: None,
            progress_every: 100,
        }
    }
}

impl ExtractionConfig {
    /// Load a config file; absent fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractError::FileNotFound {
                path: path.display().to_string(),
                source: Some(e),
            },
            _ => ExtractError::Io(e),
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| ExtractError::Config {
            reason: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check values that would otherwise only fail deep into a run
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ExtractError::Config {
                reason: "model name is empty".to_string(),
            });
        }
        if self.tag.trim().is_empty() {
            return Err(ExtractError::Config {
                reason: "tag is empty".to_string(),
            });
        }
        if self.tag.contains(['/', '\\']) {
            return Err(ExtractError::Config {
                reason: format!("tag '{}' contains a path separator", self.tag),
            });
        }
        if self.expected_layers == Some(0) {
            return Err(ExtractError::Config {
                reason: "expected_layers must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Hidden-state count to enforce: the configured one, else the model table's
    pub fn layer_expectation(&self) -> Option<usize> {
        self.expected_layers
            .or_else(|| find_model(&self.model).map(|m| m.hidden_states()))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            input_dir: self.input_dir.clone(),
            file_suffix: self.file_suffix.clone(),
            missing_files: self.missing_files,
            expected_layers: self.layer_expectation(),
            progress_every: self.progress_every,
        }
    }
}
