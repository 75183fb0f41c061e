//! CLI Module
//!
//! Command-line interface for layer embedding extraction.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ExtractionConfig;
use crate::metadata::EntryOrder;
use crate::neural::DevicePreference;
use crate::pipeline::MissingFilePolicy;
use crate::storage::OutputPathMode;

/// Per-layer speech model embedding extractor
#[derive(Parser, Debug)]
#[command(name = "layerfeat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract mean-pooled embeddings for every layer
    #[command(name = "extract")]
    Extract(ExtractArgs),

    /// Summarise a metadata file
    #[command(name = "metadata")]
    Metadata {
        /// Path to the metadata file
        file: PathBuf,

        /// Print every entry in processing order
        #[arg(short, long)]
        list: bool,

        /// Sort entries before listing
        #[arg(long)]
        sorted: bool,
    },

    /// Show shape and statistics of a layer file
    #[command(name = "inspect")]
    Inspect {
        /// Path to a layer .npy file
        npy: PathBuf,
    },

    /// List known models
    #[command(name = "models")]
    Models,

    /// Show compute device status
    #[command(name = "device")]
    Device {
        /// Model to check against free VRAM
        #[arg(short, long)]
        model: Option<String>,

        /// Device preference (auto, cpu, cuda, cuda:N)
        #[arg(short, long, default_value = "auto")]
        device: DevicePreference,
    },
}

/// Options of the `extract` command; each one overrides the config file
#[derive(Args, Debug, Default)]
pub struct ExtractArgs {
    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model short name or hub repository id
    #[arg(short, long)]
    pub model: Option<String>,

    /// Local checkpoint directory
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Device preference (auto, cpu, cuda, cuda:N)
    #[arg(short, long)]
    pub device: Option<DevicePreference>,

    /// Audio root directory
    #[arg(short, long)]
    pub input_dir: Option<PathBuf>,

    /// Metadata file listing the audio files
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// Output directory for the layer files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Dataset tag used in output file names
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Suffix appended to every metadata entry
    #[arg(long)]
    pub suffix: Option<String>,

    /// Hidden-state count the model must produce
    #[arg(long)]
    pub expected_layers: Option<usize>,

    /// Process entries in sorted order
    #[arg(long, conflicts_with = "preserve_order")]
    pub sorted: bool,

    /// Process entries in metadata order
    #[arg(long)]
    pub preserve_order: bool,

    /// Skip entries whose audio file is missing
    #[arg(long, conflicts_with = "fail_missing")]
    pub skip_missing: bool,

    /// Abort when an audio file is missing
    #[arg(long)]
    pub fail_missing: bool,

    /// Canonicalise the output directory before writing
    #[arg(long, conflicts_with = "as_given_output")]
    pub absolute_output: bool,

    /// Write to the output directory exactly as given
    #[arg(long)]
    pub as_given_output: bool,

    /// Create the output directory if it does not exist
    #[arg(long, conflicts_with = "no_create_output_dir")]
    pub create_output_dir: bool,

    /// Fail when the output directory does not exist
    #[arg(long)]
    pub no_create_output_dir: bool,
}

impl ExtractArgs {
    /// Apply command-line overrides on top of a loaded config
    pub fn apply(&self, config: &mut ExtractionConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = Some(dir.clone());
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(dir) = &self.input_dir {
            config.input_dir = dir.clone();
        }
        if let Some(file) = &self.metadata {
            config.metadata_file = file.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(tag) = &self.tag {
            config.tag = tag.clone();
        }
        if let Some(suffix) = &self.suffix {
            config.file_suffix = Some(suffix.clone());
        }
        if let Some(layers) = self.expected_layers {
            config.expected_layers = Some(layers);
        }
        if self.sorted {
            config.order = EntryOrder::Sorted;
        }
        if self.preserve_order {
            config.order = EntryOrder::Preserve;
        }
        if self.skip_missing {
            config.missing_files = MissingFilePolicy::Skip;
        }
        if self.fail_missing {
            config.missing_files = MissingFilePolicy::Fail;
        }
        if self.absolute_output {
            config.output_path_mode = OutputPathMode::Absolute;
        }
        if self.as_given_output {
            config.output_path_mode = OutputPathMode::AsGiven;
        }
        if self.create_output_dir {
            config.create_output_dir = true;
        }
        if self.no_create_output_dir {
            config.create_output_dir = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extract_flags() {
        let cli = Cli::parse_from([
            "layerfeat",
            "-v",
            "extract",
            "--tag",
            "asv19_dev",
            "--device",
            "cuda:1",
            "--sorted",
            "--skip-missing",
        ]);
        assert!(cli.verbose);

        let Some(Commands::Extract(args)) = cli.command else {
            panic!("expected extract command");
        };
        let mut config = ExtractionConfig::default();
        args.apply(&mut config);

        assert_eq!(config.tag, "asv19_dev");
        assert_eq!(config.device, DevicePreference::Cuda(1));
        assert_eq!(config.order, EntryOrder::Sorted);
        assert_eq!(config.missing_files, MissingFilePolicy::Skip);
        assert_eq!(config.model, ExtractionConfig::default().model);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut config = ExtractionConfig {
            order: EntryOrder::Sorted,
            ..Default::default()
        };
        ExtractArgs::default().apply(&mut config);
        assert_eq!(config.order, EntryOrder::Sorted);
    }

    #[test]
    fn test_flags_turn_config_switches_off() {
        let cli = Cli::parse_from([
            "layerfeat",
            "extract",
            "--preserve-order",
            "--fail-missing",
            "--as-given-output",
            "--no-create-output-dir",
        ]);
        let Some(Commands::Extract(args)) = cli.command else {
            panic!("expected extract command");
        };

        let mut config = ExtractionConfig {
            order: EntryOrder::Sorted,
            missing_files: MissingFilePolicy::Skip,
            output_path_mode: OutputPathMode::Absolute,
            create_output_dir: true,
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.order, EntryOrder::Preserve);
        assert_eq!(config.missing_files, MissingFilePolicy::Fail);
        assert_eq!(config.output_path_mode, OutputPathMode::AsGiven);
        assert!(!config.create_output_dir);
    }

    #[test]
    fn test_opposite_flags_conflict() {
        for pair in [
            ["--sorted", "--preserve-order"],
            ["--skip-missing", "--fail-missing"],
            ["--absolute-output", "--as-given-output"],
            ["--create-output-dir", "--no-create-output-dir"],
        ] {
            let result = Cli::try_parse_from(["layerfeat", "extract", pair[0], pair[1]]);
            assert!(result.is_err(), "{:?} should conflict", pair);
        }
    }

    #[test]
    fn test_bad_device_rejected() {
        assert!(Cli::try_parse_from(["layerfeat", "device", "--device", "tpu"]).is_err());
    }
}
