//! Hidden-state extractor interfaces and implementations
//!
//! This module provides:
//! - `FeatureExtractor` trait for all extractors
//! - Known model table and device selection
//! - Waveform preprocessing paired with the checkpoints
//! - The candle wav2vec2 backend (feature `candle`)
//! - A mock extractor for testing

pub mod device;
mod mock;
mod model;
pub mod preprocess;
pub mod registry;
#[cfg(feature = "candle")]
pub mod wav2vec2;

pub use device::{device_status_summary, DevicePreference, GpuInfo};
pub use mock::{MockExtractor, MockFill};
pub use model::{ExtractorInfo, FeatureExtractor, HiddenStates};
pub use registry::{find_model, KnownModel, DEFAULT_MODEL, KNOWN_MODELS};
#[cfg(feature = "candle")]
pub use wav2vec2::{ModelSource, Wav2Vec2Extractor};
