//! Model components for the two emotion models.
//!
//! ## Components
//!
//! - [`layers`] — conv blocks, adaptive average pooling, channel dropout
//! - [`extractor`] — 1-D and 2-D per-modality convolution stacks
//! - [`sequence`] — stacked LSTM encoders
//! - [`text`] — frozen pretrained text encoder and the lyrics LSTM
//! - [`head`] — classification and mean/scale fusion heads
//! - [`cat`] — model 1, [`AudioLyricsClassifier`]
//! - [`stat`] — model 2, [`SpectralStatRegressor`]

pub mod cat;
pub mod extractor;
pub mod head;
pub mod layers;
pub mod sequence;
pub mod stat;
pub mod text;

pub use cat::{AudioLyricsClassifier, CatBatch};
pub use stat::{SpectralStatRegressor, StatBatch};
pub use text::{BertTextEncoder, TextEncoder, TextEncoding};
