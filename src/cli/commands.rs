//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::Axis;

use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::metadata::{read_metadata, summarize_metadata, EntryOrder};
use crate::neural::{
    device_status_summary, find_model, DevicePreference, FeatureExtractor, KNOWN_MODELS,
};
use crate::pipeline::Pipeline;
use crate::storage::{prepare_output_dir, read_layer, write_layers};

use super::ExtractArgs;

/// Build the run config from an optional file plus flag overrides.
pub fn resolve_config(args: &ExtractArgs) -> Result<ExtractionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config: {}", path.display());
            ExtractionConfig::load(path)?
        }
        None => ExtractionConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Run the full extraction described by the command-line arguments.
pub fn extract(args: &ExtractArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let extractor = load_extractor(&config)?;
    let written = run_extraction(extractor.as_ref(), &config)?;

    println!(
        "Wrote {} layer files to {}",
        written.len(),
        config.output_dir.display()
    );

    Ok(())
}

/// Read metadata, run the pipeline and write one file per layer.
///
/// The output directory is checked for existence and write access before
/// any audio is processed.
pub fn run_extraction(
    extractor: &dyn FeatureExtractor,
    config: &ExtractionConfig,
) -> Result<Vec<PathBuf>> {
    let entries = read_metadata(&config.metadata_file, config.order)?;
    info!(
        "Read {} entries from {}",
        entries.len(),
        config.metadata_file.display()
    );

    let output_dir = prepare_output_dir(
        &config.output_dir,
        config.output_path_mode,
        config.create_output_dir,
    )?;

    let output = Pipeline::new(extractor, config.pipeline_options()).run(&entries)?;
    if !output.skipped.is_empty() {
        warn!("{} entries skipped (missing audio)", output.skipped.len());
    }

    write_layers(&output_dir, &config.model, &config.tag, &output.layers)
}

#[cfg(feature = "candle")]
fn load_extractor(config: &ExtractionConfig) -> Result<Box<dyn FeatureExtractor>> {
    use crate::neural::{ModelSource, Wav2Vec2Extractor};

    let source = match &config.model_dir {
        Some(dir) => ModelSource::Local(dir.clone()),
        None => ModelSource::Hub(config.model.clone()),
    };
    let extractor = Wav2Vec2Extractor::load(&config.model, &source, config.device)?;
    Ok(Box::new(extractor))
}

#[cfg(not(feature = "candle"))]
fn load_extractor(config: &ExtractionConfig) -> Result<Box<dyn FeatureExtractor>> {
    Err(crate::error::ExtractError::ModelLoad {
        model: config.model.clone(),
        reason: "built without the `candle` feature".to_string(),
    })
}

/// Print a summary of a metadata file.
pub fn show_metadata(path: &Path, list: bool, sorted: bool) -> Result<()> {
    info!("Reading metadata: {}", path.display());

    let summary = summarize_metadata(path)?;
    println!("Metadata: {}", path.display());
    println!("{:-<60}", "");
    println!("Lines:          {}", summary.total_lines);
    println!("Entries:        {}", summary.kept);
    println!("Skipped lines:  {}", summary.skipped_lines);
    println!("Duplicates:     {}", summary.duplicates);

    if list {
        let order = if sorted {
            EntryOrder::Sorted
        } else {
            EntryOrder::Preserve
        };
        println!("{:-<60}", "");
        for (i, entry) in read_metadata(path, order)?.iter().enumerate() {
            println!("{:6}  {}", i, entry);
        }
    }

    Ok(())
}

/// Print shape and value statistics of a layer file.
pub fn inspect(path: &Path) -> Result<()> {
    let matrix = read_layer(path)?;
    let (rows, cols) = matrix.dim();

    println!("File:  {}", path.display());
    println!("Shape: ({}, {})", rows, cols);

    if matrix.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    let min = matrix.iter().copied().fold(f32::INFINITY, f32::min);
    let max = matrix.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = matrix.mean().unwrap_or(0.0);
    let std = matrix.std(0.0);
    println!("Min: {:.6}  Max: {:.6}  Mean: {:.6}  Std: {:.6}", min, max, mean, std);

    if let Some(col_means) = matrix.mean_axis(Axis(0)) {
        let preview: Vec<String> = col_means
            .iter()
            .take(8)
            .map(|v| format!("{:.4}", v))
            .collect();
        let more = if cols > 8 { ", ..." } else { "" };
        println!("Column means: [{}{}]", preview.join(", "), more);
    }

    let non_finite = matrix.iter().filter(|v| !v.is_finite()).count();
    if non_finite > 0 {
        warn!("{} non-finite values in {}", non_finite, path.display());
    }

    Ok(())
}

/// List the model table.
pub fn list_models() -> Result<()> {
    println!(
        "{:<26} {:<34} {:>7} {:>7} {:>8}",
        "NAME", "REPOSITORY", "STATES", "DIM", "WEIGHTS"
    );
    println!("{:-<86}", "");
    for model in KNOWN_MODELS {
        println!(
            "{:<26} {:<34} {:>7} {:>7} {:>6.1}GB",
            model.name,
            model.repo,
            model.hidden_states(),
            model.hidden_size,
            model.weights_gb
        );
    }
    Ok(())
}

/// Print device status, optionally against a model's memory needs.
pub fn show_device(model: Option<&str>, device: DevicePreference) -> Result<()> {
    let known = match model {
        Some(name) => {
            let found = find_model(name);
            if found.is_none() {
                warn!("Unknown model '{}', skipping memory check", name);
            }
            found
        }
        None => None,
    };

    print!("{}", device_status_summary(device, known));
    Ok(())
}
