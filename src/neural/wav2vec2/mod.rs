//! wav2vec2 hidden-state extractor on candle
//!
//! Loads a checkpoint once (from a local directory or the Hugging Face Hub),
//! keeps it on the selected device and returns every layer's hidden states
//! for each call. Weights are f32 and stay f32 all the way to the returned
//! arrays.

mod config;
mod layers;

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use ndarray::Array3;

pub use config::{FeatExtractNorm, Wav2Vec2ModelConfig};
use layers::Wav2Vec2Model;

use super::device::DevicePreference;
use super::model::{ExtractorInfo, FeatureExtractor, HiddenStates};
use super::preprocess::PreprocessorConfig;
use super::registry::resolve_repo;
use crate::error::{ExtractError, Result};

const CONFIG_FILE: &str = "config.json";
const PREPROCESSOR_FILE: &str = "preprocessor_config.json";
const SAFETENSORS_FILE: &str = "model.safetensors";
const PYTORCH_FILE: &str = "pytorch_model.bin";

/// Tensor present in pre-training checkpoints that nest the model
const NESTED_MARKER: &str = "wav2vec2.feature_projection.projection.weight";

/// Where a checkpoint comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Directory holding config.json and weights
    Local(PathBuf),
    /// Hub repository id (short names from the model table are accepted)
    Hub(String),
}

/// Resolved checkpoint files
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
    pub preprocessor: Option<PathBuf>,
}

impl ModelFiles {
    /// Locate checkpoint files in a local directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let config = dir.join(CONFIG_FILE);
        if !config.exists() {
            return Err(ExtractError::ModelNotFound {
                model: config.display().to_string(),
            });
        }

        let weights = [SAFETENSORS_FILE, PYTORCH_FILE]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
            .ok_or_else(|| ExtractError::ModelNotFound {
                model: format!("{} (no {} or {})", dir.display(), SAFETENSORS_FILE, PYTORCH_FILE),
            })?;

        let preprocessor = Some(dir.join(PREPROCESSOR_FILE)).filter(|p| p.exists());

        Ok(Self {
            config,
            weights,
            preprocessor,
        })
    }

    /// Fetch checkpoint files from the Hub (cached by the hub client)
    pub fn from_hub(repo_id: &str) -> Result<Self> {
        let hub_err = |e: hf_hub::api::sync::ApiError| ExtractError::ModelLoad {
            model: repo_id.to_string(),
            reason: e.to_string(),
        };

        let api = hf_hub::api::sync::Api::new().map_err(hub_err)?;
        let repo = api.model(repo_id.to_string());

        let config = repo.get(CONFIG_FILE).map_err(hub_err)?;
        let weights =
            first_available(|name| repo.get(name)).map_err(|reason| ExtractError::ModelLoad {
                model: repo_id.to_string(),
                reason,
            })?;
        let preprocessor = repo.get(PREPROCESSOR_FILE).ok();

        Ok(Self {
            config,
            weights,
            preprocessor,
        })
    }
}

/// Fetch the first weight file that exists, safetensors preferred
///
/// When every candidate fails the error names each file with its own cause.
fn first_available<E: std::fmt::Display>(
    mut fetch: impl FnMut(&str) -> std::result::Result<PathBuf, E>,
) -> std::result::Result<PathBuf, String> {
    let mut failures = Vec::new();
    for name in [SAFETENSORS_FILE, PYTORCH_FILE] {
        match fetch(name) {
            Ok(path) => return Ok(path),
            Err(e) => {
                tracing::debug!(file = name, error = %e, "weight file unavailable");
                failures.push(format!("{name}: {e}"));
            }
        }
    }
    Err(failures.join("; "))
}

/// Resolve a device preference to a candle device
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let device_err = |e: candle_core::Error| ExtractError::ModelLoad {
        model: preference.to_string(),
        reason: format!("device unavailable: {e}"),
    };

    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(device_err),
        DevicePreference::Auto => Device::cuda_if_available(0).map_err(device_err),
    }
}

/// wav2vec2 extractor returning all hidden states
pub struct Wav2Vec2Extractor {
    model: Wav2Vec2Model,
    preprocessor: PreprocessorConfig,
    device: Device,
    min_samples: usize,
    info: ExtractorInfo,
}

impl Wav2Vec2Extractor {
    /// Load a model by name from its source
    pub fn load(name: &str, source: &ModelSource, preference: DevicePreference) -> Result<Self> {
        let (files, origin) = match source {
            ModelSource::Local(dir) => (ModelFiles::from_dir(dir)?, dir.display().to_string()),
            ModelSource::Hub(repo) => {
                let repo_id = resolve_repo(repo);
                (ModelFiles::from_hub(repo_id)?, repo_id.to_string())
            }
        };
        Self::from_files(name, &origin, &files, preference)
    }

    /// Build from already-located checkpoint files
    pub fn from_files(
        name: &str,
        origin: &str,
        files: &ModelFiles,
        preference: DevicePreference,
    ) -> Result<Self> {
        let device = select_device(preference)?;
        let cfg = Wav2Vec2ModelConfig::load(&files.config)?;
        let preprocessor = match &files.preprocessor {
            Some(path) => PreprocessorConfig::load_or_default(path)?,
            None => PreprocessorConfig::default(),
        };

        let load_err = |e: candle_core::Error| ExtractError::ModelLoad {
            model: name.to_string(),
            reason: e.to_string(),
        };

        let vb = if files.weights.extension().is_some_and(|ext| ext == "safetensors") {
            // SAFETY: the file is not modified while mapped
            unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device) }
                .map_err(load_err)?
        } else {
            VarBuilder::from_pth(&files.weights, DType::F32, &device).map_err(load_err)?
        };
        let vb = if vb.contains_tensor(NESTED_MARKER) {
            vb.pp("wav2vec2")
        } else {
            vb
        };

        let model = Wav2Vec2Model::load(&cfg, vb).map_err(load_err)?;

        tracing::info!(
            model = name,
            origin,
            hidden_size = cfg.hidden_size,
            layers = cfg.num_hidden_layers,
            stable_layer_norm = cfg.do_stable_layer_norm,
            ?device,
            "wav2vec2 model loaded"
        );

        let info = ExtractorInfo {
            id: name.to_string(),
            source: origin.to_string(),
            num_layers: cfg.num_hidden_states(),
            hidden_size: cfg.hidden_size,
            sample_rate: preprocessor.sampling_rate,
            device: format!("{device:?}"),
        };

        Ok(Self {
            model,
            preprocessor,
            device,
            min_samples: cfg.receptive_field(),
            info,
        })
    }
}

impl FeatureExtractor for Wav2Vec2Extractor {
    fn info(&self) -> &ExtractorInfo {
        &self.info
    }

    fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<HiddenStates> {
        let prepared = self.preprocessor.prepare(samples, sample_rate)?;
        if prepared.len() < self.min_samples {
            return Err(ExtractError::InvalidInput {
                reason: format!(
                    "{} samples is shorter than the model's {}-sample receptive field",
                    prepared.len(),
                    self.min_samples
                ),
            });
        }

        let len = prepared.len();
        let audio = Tensor::from_vec(prepared, (1, len), &self.device).map_err(inference_err)?;
        let states = self.model.hidden_states(&audio).map_err(inference_err)?;

        states.iter().map(to_array3).collect()
    }
}

fn inference_err(e: candle_core::Error) -> ExtractError {
    ExtractError::Inference {
        reason: e.to_string(),
    }
}

/// Copy a `(batch, time, hidden)` tensor to the host
fn to_array3(tensor: &Tensor) -> Result<Array3<f32>> {
    let dims = tensor.dims3().map_err(inference_err)?;
    let flat = tensor
        .to_dtype(DType::F32)
        .and_then(|t| t.flatten_all())
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(inference_err)?;
    Array3::from_shape_vec(dims, flat).map_err(|e| ExtractError::Inference {
        reason: format!("hidden state shape: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const HIDDEN: usize = 8;
    const CONV: usize = 6;
    const POS_KERNEL: usize = 4;
    const POS_GROUPS: usize = 2;

    fn tiny_config(stable: bool, norm: &str) -> serde_json::Value {
        serde_json::json!({
            "hidden_size": HIDDEN,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "conv_dim": [CONV, CONV],
            "conv_kernel": [10, 3],
            "conv_stride": [5, 2],
            "num_conv_pos_embeddings": POS_KERNEL,
            "num_conv_pos_embedding_groups": POS_GROUPS,
            "feat_extract_norm": norm,
            "do_stable_layer_norm": stable,
            "conv_bias": true
        })
    }

    fn tiny_weights(prefix: &str, group_norm: bool, parametrized: bool) -> HashMap<String, Tensor> {
        let mut tensors = HashMap::new();
        let mut add = |name: &str, shape: &[usize]| {
            let t = Tensor::randn(0f32, 0.2, shape.to_vec(), &Device::Cpu).unwrap();
            tensors.insert(format!("{prefix}{name}"), t);
        };

        let fe = "feature_extractor.conv_layers";
        add(&format!("{fe}.0.conv.weight"), &[CONV, 1, 10]);
        add(&format!("{fe}.0.conv.bias"), &[CONV]);
        add(&format!("{fe}.0.layer_norm.weight"), &[CONV]);
        add(&format!("{fe}.0.layer_norm.bias"), &[CONV]);
        add(&format!("{fe}.1.conv.weight"), &[CONV, CONV, 3]);
        add(&format!("{fe}.1.conv.bias"), &[CONV]);
        if !group_norm {
            add(&format!("{fe}.1.layer_norm.weight"), &[CONV]);
            add(&format!("{fe}.1.layer_norm.bias"), &[CONV]);
        }

        add("feature_projection.layer_norm.weight", &[CONV]);
        add("feature_projection.layer_norm.bias", &[CONV]);
        add("feature_projection.projection.weight", &[HIDDEN, CONV]);
        add("feature_projection.projection.bias", &[HIDDEN]);

        let pos = "encoder.pos_conv_embed.conv";
        let (g, v) = if parametrized {
            ("parametrizations.weight.original0", "parametrizations.weight.original1")
        } else {
            ("weight_g", "weight_v")
        };
        add(&format!("{pos}.{g}"), &[1, 1, POS_KERNEL]);
        add(&format!("{pos}.{v}"), &[HIDDEN, HIDDEN / POS_GROUPS, POS_KERNEL]);
        add(&format!("{pos}.bias"), &[HIDDEN]);
        add("encoder.layer_norm.weight", &[HIDDEN]);
        add("encoder.layer_norm.bias", &[HIDDEN]);

        for i in 0..2 {
            let l = format!("encoder.layers.{i}");
            for proj in ["q_proj", "k_proj", "v_proj", "out_proj"] {
                add(&format!("{l}.attention.{proj}.weight"), &[HIDDEN, HIDDEN]);
                add(&format!("{l}.attention.{proj}.bias"), &[HIDDEN]);
            }
            for ln in ["layer_norm", "final_layer_norm"] {
                add(&format!("{l}.{ln}.weight"), &[HIDDEN]);
                add(&format!("{l}.{ln}.bias"), &[HIDDEN]);
            }
            add(&format!("{l}.feed_forward.intermediate_dense.weight"), &[16, HIDDEN]);
            add(&format!("{l}.feed_forward.intermediate_dense.bias"), &[16]);
            add(&format!("{l}.feed_forward.output_dense.weight"), &[HIDDEN, 16]);
            add(&format!("{l}.feed_forward.output_dense.bias"), &[HIDDEN]);
        }

        tensors
    }

    fn write_checkpoint(dir: &Path, stable: bool, norm: &str, prefix: &str, parametrized: bool) {
        let weights = tiny_weights(prefix, norm == "group", parametrized);
        save_checkpoint(dir, stable, norm, &weights);
    }

    fn save_checkpoint(dir: &Path, stable: bool, norm: &str, weights: &HashMap<String, Tensor>) {
        let config = tiny_config(stable, norm);
        std::fs::write(dir.join(CONFIG_FILE), config.to_string()).unwrap();
        candle_core::safetensors::save(weights, dir.join(SAFETENSORS_FILE)).unwrap();
    }

    fn set(weights: &mut HashMap<String, Tensor>, name: &str, value: f32) {
        let shape = weights[name].dims().to_vec();
        let t = Tensor::full(value, shape, &Device::Cpu).unwrap();
        weights.insert(name.to_string(), t);
    }

    /// Mean and variance over the hidden dimension for every frame
    fn frame_stats(state: &Array3<f32>) -> Vec<(f32, f32)> {
        state
            .index_axis(ndarray::Axis(0), 0)
            .rows()
            .into_iter()
            .map(|row| (row.mean().unwrap(), row.var(0.0)))
            .collect()
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.07).sin() * 0.5).collect()
    }

    #[test]
    fn test_stable_layer_norm_checkpoint() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), true, "layer", "wav2vec2.", false);

        let source = ModelSource::Local(dir.path().to_path_buf());
        let extractor =
            Wav2Vec2Extractor::load("tiny", &source, DevicePreference::Cpu).unwrap();
        assert_eq!(extractor.num_layers(), 3);
        assert_eq!(extractor.info().hidden_size, HIDDEN);

        // 400 samples -> 79 frames after the first conv, 39 after the second
        let states = extractor.extract(&tone(400), 16000).unwrap();
        assert_eq!(states.len(), 3);
        for state in &states {
            assert_eq!(state.dim(), (1, 39, HIDDEN));
            assert!(state.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_post_norm_group_checkpoint() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), false, "group", "", true);

        let source = ModelSource::Local(dir.path().to_path_buf());
        let extractor =
            Wav2Vec2Extractor::load("tiny-base", &source, DevicePreference::Cpu).unwrap();

        let states = extractor.extract(&tone(1000), 16000).unwrap();
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|s| s.dim() == (1, 99, HIDDEN)));
    }

    #[test]
    fn test_pre_norm_state_order() {
        let dir = tempdir().unwrap();
        let mut weights = tiny_weights("", false, false);
        // Embedding is the projection alone, offset well away from zero
        set(&mut weights, "feature_projection.projection.bias", 3.0);
        set(&mut weights, "encoder.pos_conv_embed.conv.weight_g", 0.0);
        set(&mut weights, "encoder.pos_conv_embed.conv.bias", 0.0);
        // First layer passes its input through unchanged
        for name in [
            "attention.out_proj.weight",
            "attention.out_proj.bias",
            "feed_forward.output_dense.weight",
            "feed_forward.output_dense.bias",
        ] {
            set(&mut weights, &format!("encoder.layers.0.{name}"), 0.0);
        }
        set(&mut weights, "encoder.layer_norm.weight", 1.0);
        set(&mut weights, "encoder.layer_norm.bias", 0.0);
        save_checkpoint(dir.path(), true, "layer", &weights);

        let source = ModelSource::Local(dir.path().to_path_buf());
        let extractor =
            Wav2Vec2Extractor::load("tiny", &source, DevicePreference::Cpu).unwrap();
        let states = extractor.extract(&tone(400), 16000).unwrap();
        assert_eq!(states.len(), 3);

        // Embedding comes first and is not normalised
        assert!(frame_stats(&states[0]).iter().all(|&(mean, _)| mean > 2.0));
        // Second state is the first layer's output
        assert_eq!(states[0], states[1]);
        // Last state carries the final encoder norm
        for (mean, var) in frame_stats(&states[2]) {
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-3);
            assert_abs_diff_eq!(var, 1.0, epsilon = 0.02);
        }
    }

    #[test]
    fn test_post_norm_state_order() {
        let dir = tempdir().unwrap();
        let mut weights = tiny_weights("", true, false);
        set(&mut weights, "feature_projection.projection.bias", 3.0);
        set(&mut weights, "encoder.layer_norm.weight", 1.0);
        set(&mut weights, "encoder.layer_norm.bias", 0.0);
        set(&mut weights, "encoder.layers.1.final_layer_norm.weight", 2.0);
        set(&mut weights, "encoder.layers.1.final_layer_norm.bias", 0.5);
        save_checkpoint(dir.path(), false, "group", &weights);

        let source = ModelSource::Local(dir.path().to_path_buf());
        let extractor =
            Wav2Vec2Extractor::load("tiny-base", &source, DevicePreference::Cpu).unwrap();
        let states = extractor.extract(&tone(1000), 16000).unwrap();
        assert_eq!(states.len(), 3);

        // Embedding is normalised before it is recorded
        for (mean, var) in frame_stats(&states[0]) {
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-3);
            assert_abs_diff_eq!(var, 1.0, epsilon = 0.02);
        }
        // Last state is the last layer's output, not re-normalised
        for (mean, var) in frame_stats(&states[2]) {
            assert_abs_diff_eq!(mean, 0.5, epsilon = 1e-3);
            assert_abs_diff_eq!(var, 4.0, epsilon = 0.1);
        }
    }

    #[test]
    fn test_deterministic_output() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), true, "layer", "", false);
        let source = ModelSource::Local(dir.path().to_path_buf());
        let extractor =
            Wav2Vec2Extractor::load("tiny", &source, DevicePreference::Cpu).unwrap();

        let a = extractor.extract(&tone(600), 16000).unwrap();
        let b = extractor.extract(&tone(600), 16000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_short_and_misrated_input() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), true, "layer", "", false);
        let source = ModelSource::Local(dir.path().to_path_buf());
        let extractor =
            Wav2Vec2Extractor::load("tiny", &source, DevicePreference::Cpu).unwrap();

        let err = extractor.extract(&tone(10), 16000).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        let err = extractor.extract(&tone(400), 8000).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_weight_fallback_keeps_every_cause() {
        let err = first_available(|name| {
            Err::<PathBuf, _>(if name == SAFETENSORS_FILE {
                "401 Unauthorized"
            } else {
                "404 Not Found"
            })
        })
        .unwrap_err();
        assert!(err.contains("model.safetensors: 401 Unauthorized"));
        assert!(err.contains("pytorch_model.bin: 404 Not Found"));
    }

    #[test]
    fn test_weight_fallback_order() {
        let mut asked = Vec::new();
        let path = first_available(|name| {
            asked.push(name.to_string());
            if name == PYTORCH_FILE {
                Ok(PathBuf::from(name))
            } else {
                Err("missing")
            }
        })
        .unwrap();
        assert_eq!(path, PathBuf::from(PYTORCH_FILE));
        assert_eq!(asked, vec![SAFETENSORS_FILE, PYTORCH_FILE]);

        let path = first_available(|name| Ok::<_, String>(PathBuf::from(name))).unwrap();
        assert_eq!(path, PathBuf::from(SAFETENSORS_FILE));
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempdir().unwrap();
        let source = ModelSource::Local(dir.path().to_path_buf());
        match Wav2Vec2Extractor::load("tiny", &source, DevicePreference::Cpu) {
            Err(ExtractError::ModelNotFound { model }) => assert!(model.contains(CONFIG_FILE)),
            Err(other) => panic!("Expected ModelNotFound error, got: {:?}", other),
            Ok(_) => panic!("Expected ModelNotFound error"),
        }
    }

    #[test]
    fn test_missing_tensor_is_load_error() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), true, "layer", "", false);
        let mut weights = tiny_weights("", false, false);
        weights.remove("encoder.layers.1.feed_forward.output_dense.bias");
        candle_core::safetensors::save(&weights, dir.path().join(SAFETENSORS_FILE)).unwrap();

        let source = ModelSource::Local(dir.path().to_path_buf());
        match Wav2Vec2Extractor::load("tiny", &source, DevicePreference::Cpu) {
            Err(err) => assert_eq!(err.error_code(), "MODEL_LOAD"),
            Ok(_) => panic!("Expected ModelLoad error"),
        }
    }
}
