//! Audio Module
//!
//! - WAV decoding to mono float samples
//! - Sample rate conversion to the model rate

pub mod io;
pub mod resample;

pub use io::{generate_test_tone, load_audio, write_wav, MODEL_SAMPLE_RATE};
pub use resample::resample;
