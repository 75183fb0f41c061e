//! Error handling for layerfeat
//!
//! Every failure carries an error code and, where it helps, recovery
//! suggestions that the CLI prints next to the message.

use thiserror::Error;

/// Result type alias for layerfeat operations
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Main error type for extraction runs
#[derive(Error, Debug)]
pub enum ExtractError {
    // File Errors
    #[error("File not found: {path}")]
    FileNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio contains no samples: {path}")]
    EmptyAudio { path: String },

    #[error("Invalid metadata file {path}: {reason}")]
    InvalidMetadata { path: String, reason: String },

    // Model Errors
    #[error("Invalid model input: {reason}")]
    InvalidInput { reason: String },

    #[error("Failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Inference failed: {reason}")]
    Inference { reason: String },

    #[error("Layer count mismatch for {context}: expected {expected}, got {actual}")]
    LayerCountMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Feature dimension mismatch in layer {layer} for {path}: expected {expected}, got {actual}")]
    FeatureDimMismatch {
        layer: usize,
        path: String,
        expected: usize,
        actual: usize,
    },

    // Output Errors
    #[error("Output directory does not exist: {path}")]
    OutputDirMissing { path: String },

    #[error("Failed to write or read array {path}: {reason}")]
    Storage { path: String, reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExtractError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ExtractError::FileNotFound { .. } => "FILE_NOT_FOUND",
            ExtractError::InvalidAudio { .. } => "INVALID_AUDIO",
            ExtractError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            ExtractError::EmptyAudio { .. } => "EMPTY_AUDIO",
            ExtractError::InvalidMetadata { .. } => "INVALID_METADATA",
            ExtractError::InvalidInput { .. } => "INVALID_INPUT",
            ExtractError::ModelLoad { .. } => "MODEL_LOAD",
            ExtractError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            ExtractError::Inference { .. } => "INFERENCE_ERROR",
            ExtractError::LayerCountMismatch { .. } => "LAYER_COUNT_MISMATCH",
            ExtractError::FeatureDimMismatch { .. } => "FEATURE_DIM_MISMATCH",
            ExtractError::OutputDirMissing { .. } => "OUTPUT_DIR_MISSING",
            ExtractError::Storage { .. } => "STORAGE_ERROR",
            ExtractError::Config { .. } => "CONFIG_ERROR",
            ExtractError::Io(_) => "IO_ERROR",
            ExtractError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ExtractError::FileNotFound { .. } => vec![
                "Check the input directory and metadata paths",
                "Use --skip-missing to leave out files that do not exist",
            ],
            ExtractError::InvalidAudio { .. } | ExtractError::UnsupportedFormat { .. } => vec![
                "Convert the file to PCM or float WAV first",
                "The file may be corrupted - try re-exporting from source",
            ],
            ExtractError::ModelLoad { .. } | ExtractError::ModelNotFound { .. } => vec![
                "Check the model name with 'layerfeat models'",
                "Point --model-dir at a directory with config.json and weights",
            ],
            ExtractError::Inference { .. } => vec![
                "Try --device cpu if the accelerator ran out of memory",
                "Very long files may need to be split before extraction",
            ],
            ExtractError::LayerCountMismatch { .. } => vec![
                "Remove expected_layers from the config to use the model's own count",
            ],
            ExtractError::OutputDirMissing { .. } => vec![
                "Create the output directory first",
                "Or pass --create-output-dir",
            ],
            _ => vec![],
        }
    }
}
