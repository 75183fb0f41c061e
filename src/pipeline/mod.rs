//! Extraction pipeline
//!
//! Runs every metadata entry through the extractor, one file at a time:
//! resolve the path, load and resample the audio, extract hidden states,
//! mean-pool each layer over time and append the result to that layer's
//! accumulator. Row `i` of every output matrix belongs to
//! `ExtractionOutput::processed[i]`.

mod pooling;

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub use pooling::{mean_pool, LayerAccumulator};

use crate::audio::load_audio;
use crate::error::{ExtractError, Result};
use crate::neural::FeatureExtractor;

/// What to do with entries whose audio file does not exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFilePolicy {
    /// Abort the run with `FileNotFound`
    #[default]
    Fail,
    /// Leave the entry out; later rows shift up
    Skip,
}

/// Pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Directory relative entries are resolved against
    pub input_dir: PathBuf,
    /// Appended to every entry (e.g. ".wav" for bare utterance ids)
    pub file_suffix: Option<String>,
    pub missing_files: MissingFilePolicy,
    /// Layer count the extractor must report, if known in advance
    pub expected_layers: Option<usize>,
    /// Log progress every this many files (0 disables)
    pub progress_every: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            file_suffix: None,
            missing_files: MissingFilePolicy::Fail,
            expected_layers: None,
            progress_every: 100,
        }
    }
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    /// One `(processed.len(), dim)` matrix per layer
    pub layers: Vec<Array2<f32>>,
    /// Entries in row order
    pub processed: Vec<String>,
    /// Entries left out under `MissingFilePolicy::Skip`
    pub skipped: Vec<String>,
}

/// Sequential extraction over a list of entries
pub struct Pipeline<'a> {
    extractor: &'a dyn FeatureExtractor,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(extractor: &'a dyn FeatureExtractor, options: PipelineOptions) -> Self {
        Self { extractor, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Path of the audio file for an entry
    ///
    /// Absolute entries are used as they are.
    pub fn resolve_path(&self, entry: &str) -> PathBuf {
        let name = match &self.options.file_suffix {
            Some(suffix) => format!("{entry}{suffix}"),
            None => entry.to_string(),
        };
        self.options.input_dir.join(name)
    }

    /// Process every entry and stack the pooled vectors per layer
    pub fn run(&self, entries: &[String]) -> Result<ExtractionOutput> {
        let num_layers = self.extractor.num_layers();
        if let Some(expected) = self.options.expected_layers {
            if expected != num_layers {
                return Err(ExtractError::LayerCountMismatch {
                    context: format!("model {}", self.extractor.id()),
                    expected,
                    actual: num_layers,
                });
            }
        }

        info!(
            "Extracting {} layers from {} files with {}",
            num_layers,
            entries.len(),
            self.extractor.id()
        );

        let mut accumulator = LayerAccumulator::new(num_layers);
        let mut processed = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let path = self.resolve_path(entry);

            if self.options.missing_files == MissingFilePolicy::Skip && !path.exists() {
                warn!("Skipping missing file {}", path.display());
                skipped.push(entry.clone());
                continue;
            }

            let pooled = self.pool_file(&path)?;
            accumulator.push(&pooled, &path.display().to_string())?;
            processed.push(entry.clone());

            let done = index + 1;
            if self.options.progress_every > 0 && done % self.options.progress_every == 0 {
                info!("Processed {}/{} entries", done, entries.len());
            }
        }

        info!(
            "Finished: {} files processed, {} skipped",
            processed.len(),
            skipped.len()
        );

        Ok(ExtractionOutput {
            layers: accumulator.into_matrices()?,
            processed,
            skipped,
        })
    }

    /// Load one file, extract and pool every layer
    fn pool_file(&self, path: &Path) -> Result<Vec<ndarray::Array1<f32>>> {
        let sample_rate = self.extractor.sample_rate();
        let samples = load_audio(path, sample_rate)?;
        let states = self.extractor.extract(&samples, sample_rate)?;

        debug!(
            "{}: {} samples, {} hidden states",
            path.display(),
            samples.len(),
            states.len()
        );

        if states.len() != self.extractor.num_layers() {
            return Err(ExtractError::LayerCountMismatch {
                context: path.display().to_string(),
                expected: self.extractor.num_layers(),
                actual: states.len(),
            });
        }

        states.iter().map(mean_pool).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_wav, MODEL_SAMPLE_RATE};
    use crate::neural::{MockExtractor, MockFill};
    use tempfile::tempdir;

    fn write_fixture(dir: &Path, name: &str, value: f32) {
        write_wav(&dir.join(name), &[value; 1600], MODEL_SAMPLE_RATE).unwrap();
    }

    fn entries(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rows_follow_entry_order() {
        let dir = tempdir().unwrap();
        for name in ["a.wav", "b.wav", "c.wav"] {
            write_fixture(dir.path(), name, 0.1);
        }

        let mock = MockExtractor::new(3, 5, 4, MockFill::CallIndex);
        let options = PipelineOptions {
            input_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let output = Pipeline::new(&mock, options)
            .run(&entries(&["c.wav", "a.wav", "b.wav"]))
            .unwrap();

        assert_eq!(output.processed, entries(&["c.wav", "a.wav", "b.wav"]));
        assert_eq!(output.layers.len(), 3);
        for layer in &output.layers {
            assert_eq!(layer.dim(), (3, 4));
            for (row, values) in layer.rows().into_iter().enumerate() {
                assert!(values.iter().all(|&v| v == row as f32));
            }
        }
    }

    #[test]
    fn test_missing_file_fails_by_default() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), "a.wav", 0.1);

        let mock = MockExtractor::new(2, 3, 2, MockFill::CallIndex);
        let options = PipelineOptions {
            input_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = Pipeline::new(&mock, options)
            .run(&entries(&["a.wav", "gone.wav"]))
            .unwrap_err();

        match err {
            ExtractError::FileNotFound { path, .. } => assert!(path.ends_with("gone.wav")),
            other => panic!("Expected FileNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_skipped() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), "a.wav", 0.1);
        write_fixture(dir.path(), "c.wav", 0.1);

        let mock = MockExtractor::new(2, 3, 2, MockFill::CallIndex);
        let options = PipelineOptions {
            input_dir: dir.path().to_path_buf(),
            missing_files: MissingFilePolicy::Skip,
            ..Default::default()
        };
        let output = Pipeline::new(&mock, options)
            .run(&entries(&["a.wav", "b.wav", "c.wav"]))
            .unwrap();

        assert_eq!(output.processed, entries(&["a.wav", "c.wav"]));
        assert_eq!(output.skipped, entries(&["b.wav"]));
        assert_eq!(output.layers[0].dim(), (2, 2));
        assert_eq!(mock.calls(), 2);
    }

    #[test]
    fn test_file_suffix_and_absolute_entries() {
        let dir = tempdir().unwrap();
        let mock = MockExtractor::new(1, 1, 1, MockFill::CallIndex);
        let options = PipelineOptions {
            input_dir: dir.path().to_path_buf(),
            file_suffix: Some(".wav".to_string()),
            ..Default::default()
        };
        let pipeline = Pipeline::new(&mock, options);

        assert_eq!(pipeline.resolve_path("LA_T_1"), dir.path().join("LA_T_1.wav"));
        assert_eq!(
            pipeline.resolve_path("/data/x"),
            PathBuf::from("/data/x.wav")
        );
    }

    #[test]
    fn test_expected_layers_checked_before_any_file() {
        let mock = MockExtractor::new(48, 2, 2, MockFill::CallIndex);
        let options = PipelineOptions {
            expected_layers: Some(49),
            ..Default::default()
        };
        let err = Pipeline::new(&mock, options)
            .run(&entries(&["never-opened.wav"]))
            .unwrap_err();
        assert_eq!(err.error_code(), "LAYER_COUNT_MISMATCH");
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_extractor_output_must_match_reported_layers() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), "a.wav", 0.1);

        let mock = MockExtractor::new(3, 2, 2, MockFill::CallIndex).with_reported_layers(4);
        let options = PipelineOptions {
            input_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        match Pipeline::new(&mock, options).run(&entries(&["a.wav"])).unwrap_err() {
            ExtractError::LayerCountMismatch { expected, actual, .. } => {
                assert_eq!((expected, actual), (4, 3));
            }
            other => panic!("Expected LayerCountMismatch error, got: {:?}", other),
        }
    }

    #[test]
    fn test_signal_reaches_extractor() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), "quiet.wav", 0.25);
        write_fixture(dir.path(), "loud.wav", 0.75);

        let mock = MockExtractor::new(2, 3, 2, MockFill::SignalMean);
        let options = PipelineOptions {
            input_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let output = Pipeline::new(&mock, options)
            .run(&entries(&["quiet.wav", "loud.wav"]))
            .unwrap();

        assert!((output.layers[0][[0, 0]] - 0.25).abs() < 1e-5);
        assert!((output.layers[0][[1, 0]] - 0.75).abs() < 1e-5);
        assert!((output.layers[1][[1, 1]] - 1.75).abs() < 1e-5);
    }

    #[test]
    fn test_no_entries() {
        let mock = MockExtractor::new(3, 2, 2, MockFill::CallIndex);
        let output = Pipeline::new(&mock, PipelineOptions::default())
            .run(&[])
            .unwrap();
        assert!(output.processed.is_empty());
        assert_eq!(output.layers.len(), 3);
    }
}
