//! Multimodal music emotion models in pure Rust.
//!
//! Two candle models that read a music clip and predict its emotional
//! content:
//!
//! - [`AudioLyricsClassifier`](model::AudioLyricsClassifier) — waveform plus
//!   lyrics → emotion-quadrant logits `[B, 4]`
//! - [`SpectralStatRegressor`](model::SpectralStatRegressor) — waveform plus
//!   precomputed spectrograms → `[mean_0, mean_1, scale_0, scale_1]`, the
//!   scales strictly positive
//!
//! ## Architecture
//!
//! ```text
//! waveform ─→ spectral transforms (STFT, Mel, MFCC, CQT)
//!                        ↓
//!        per-modality conv extractors (1-D pooled, or 2-D + LSTM)
//!                        ↓
//! lyrics ─→ BERT ─→ LSTM ─→ concat ─→ fusion head
//! ```
//!
//! ## Modules
//!
//! - [`audio`] — WAV input, reference STFT/Mel/MFCC features
//! - [`spectral`] — convolutional spectral transforms, optionally trainable
//! - [`config`] — typed, validated model configuration
//! - [`model`] — extractors, encoders, heads and the two models

pub mod audio;
pub mod config;
pub mod model;
pub mod spectral;

mod error;

pub use error::{Error, Result};
