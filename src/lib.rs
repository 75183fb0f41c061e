//! layerfeat - Per-layer speech model embeddings
//!
//! Extracts the hidden states of every layer of a pretrained wav2vec2-family
//! model for a batch of audio files and stores one matrix per layer.
//!
//! # Pipeline
//!
//! - `metadata`: whitespace-delimited file list, first token of each line
//! - `audio`: WAV decoding, downmix and resampling to 16 kHz
//! - `neural`: the `FeatureExtractor` trait and its candle wav2vec2 backend
//! - `pipeline`: time mean pooling and per-layer accumulation
//! - `storage`: one `{model}_Layer{idx}_{tag}.npy` file per layer

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod metadata;
pub mod neural;
pub mod pipeline;
pub mod storage;

pub use config::ExtractionConfig;
pub use error::{ExtractError, Result};
