//! Audio utilities.
//!
//! WAV input and CPU spectral features for precomputed model inputs.

pub mod features;
mod wav;

pub use features::FeatureExtractor;
pub use wav::{downmix, read_wav, read_wav_mono};
