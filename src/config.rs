//! Typed model configuration.
//!
//! Field names on the wire match the hyperparameter keys the models were
//! trained with (`adaptive_layer_units`, `n_fft`, `spec_trainable`, ...).
//! Every field has a default, so a JSON file only needs the keys it changes.
//! All derived sizes are checked by `validate()` before any layer is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Spectral transforms
// ---------------------------------------------------------------------------

/// Parameters shared by the STFT, Mel, MFCC and CQT transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    /// STFT hop length. `None` means `n_fft / 4`.
    pub hop_length: Option<usize>,
    pub n_mels: usize,
    pub n_mfcc: usize,
    /// Mel bands computed before the DCT of the MFCC transform.
    pub mfcc_n_mels: usize,
    /// Frame size of the MFCC transform, independent of `n_fft`.
    pub mfcc_n_fft: usize,
    pub mfcc_hop_length: usize,
    pub n_cqt: usize,
    pub cqt_fmin: f64,
    pub cqt_bins_per_octave: usize,
    pub cqt_hop_length: usize,
    /// Makes the Fourier, Mel and constant-Q kernels learned parameters.
    #[serde(rename = "spec_trainable")]
    pub trainable: bool,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 2048,
            hop_length: None,
            n_mels: 128,
            n_mfcc: 20,
            mfcc_n_mels: 128,
            mfcc_n_fft: 2048,
            mfcc_hop_length: 512,
            n_cqt: 84,
            cqt_fmin: 32.7,
            cqt_bins_per_octave: 12,
            cqt_hop_length: 512,
            trainable: false,
        }
    }
}

impl SpectralConfig {
    pub fn hop_length(&self) -> usize {
        self.hop_length.unwrap_or(self.n_fft / 4)
    }

    /// One-sided STFT bins: `n_fft / 2 + 1`.
    pub fn freq_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Frames produced by a centered STFT over `num_samples`.
    pub fn stft_frames(&self, num_samples: usize) -> usize {
        num_samples / self.hop_length() + 1
    }

    /// Frames produced by the MFCC transform over `num_samples`.
    pub fn mfcc_frames(&self, num_samples: usize) -> usize {
        num_samples / self.mfcc_hop_length + 1
    }

    /// Quality factor shared by all constant-Q bins.
    pub fn cqt_q(&self) -> f64 {
        1.0 / (2f64.powf(1.0 / self.cqt_bins_per_octave as f64) - 1.0)
    }

    /// Centre frequency of the highest constant-Q bin.
    pub fn cqt_fmax(&self) -> f64 {
        self.cqt_fmin
            * 2f64.powf((self.n_cqt.saturating_sub(1)) as f64 / self.cqt_bins_per_octave as f64)
    }

    /// Length of the longest (lowest-frequency) constant-Q kernel.
    pub fn cqt_kernel_len(&self) -> usize {
        (self.cqt_q() * self.sample_rate as f64 / self.cqt_fmin).ceil() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if self.n_fft < 2 || self.mfcc_n_fft < 2 {
            return Err(Error::Config(format!(
                "n_fft and mfcc_n_fft must be at least 2, got {} and {}",
                self.n_fft, self.mfcc_n_fft
            )));
        }
        if self.hop_length() == 0 || self.mfcc_hop_length == 0 {
            return Err(Error::Config("hop lengths must be positive".into()));
        }
        if self.n_mels == 0 || self.mfcc_n_mels == 0 {
            return Err(Error::Config("mel band counts must be positive".into()));
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.mfcc_n_mels {
            return Err(Error::Config(format!(
                "n_mfcc must be in 1..={}, got {}",
                self.mfcc_n_mels, self.n_mfcc
            )));
        }
        Ok(())
    }

    /// Extra checks for the constant-Q transform, which only model 1 uses.
    pub fn validate_cqt(&self) -> Result<()> {
        if self.n_cqt == 0 || self.cqt_bins_per_octave == 0 || self.cqt_hop_length == 0 {
            return Err(Error::Config(
                "n_cqt, cqt_bins_per_octave and cqt_hop_length must be positive".into(),
            ));
        }
        if self.cqt_fmin <= 0.0 {
            return Err(Error::Config(format!(
                "cqt_fmin must be positive, got {}",
                self.cqt_fmin
            )));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if self.cqt_fmax() >= nyquist {
            return Err(Error::Config(format!(
                "highest CQT bin {:.1} Hz is above Nyquist ({nyquist} Hz); lower n_cqt or cqt_fmin",
                self.cqt_fmax()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Feature extractor stacks
// ---------------------------------------------------------------------------

/// One 1-D stage: conv → (max-pool) → batch-norm → (dropout) → ReLU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv1dStage {
    pub out_channels: usize,
    pub kernel_size: usize,
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
    #[serde(default)]
    pub max_pool: Option<usize>,
    /// Apply the model dropout after batch-norm.
    #[serde(default)]
    pub dropout: bool,
}

fn one() -> usize {
    1
}

impl Conv1dStage {
    fn conv(out_channels: usize, kernel_size: usize, stride: usize, padding: usize) -> Self {
        Self {
            out_channels,
            kernel_size,
            stride,
            padding,
            max_pool: None,
            dropout: true,
        }
    }

    fn pooled(out_channels: usize) -> Self {
        Self {
            out_channels,
            kernel_size: 3,
            stride: 1,
            padding: 0,
            max_pool: Some(2),
            dropout: false,
        }
    }

    /// Output length for an input of `len` frames, `None` if the stage would be empty.
    pub fn output_len(&self, len: usize) -> Option<usize> {
        let conv = (len + 2 * self.padding).checked_sub(self.kernel_size)? / self.stride + 1;
        let out = match self.max_pool {
            Some(k) => conv / k,
            None => conv,
        };
        (out > 0).then_some(out)
    }

    /// Smallest input length for which the stage yields `out` frames.
    ///
    /// Never below 1, even when the padding alone covers the kernel.
    pub fn min_input_len(&self, out: usize) -> usize {
        let conv_out = out.max(1) * self.max_pool.unwrap_or(1);
        ((conv_out - 1) * self.stride + self.kernel_size)
            .saturating_sub(2 * self.padding)
            .max(1)
    }

    /// Number of layers the stage occupies in a sequential checkpoint:
    /// conv, optional max-pool, batch-norm, optional dropout, ReLU.
    pub fn module_count(&self) -> usize {
        3 + usize::from(self.max_pool.is_some()) + usize::from(self.dropout)
    }
}

/// A 1-D stack terminated by adaptive average pooling (model 1 branches, and
/// the 1-D front end of the model 2 raw-audio branch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extractor1dConfig {
    pub stages: Vec<Conv1dStage>,
    /// Dropout probability applied after adaptive pooling.
    #[serde(default)]
    pub trailing_dropout: Option<f64>,
}

impl Extractor1dConfig {
    pub fn out_channels(&self) -> usize {
        self.stages.last().map_or(0, |s| s.out_channels)
    }

    pub fn output_len(&self, len: usize) -> Option<usize> {
        self.stages
            .iter()
            .try_fold(len, |len, stage| stage.output_len(len))
    }

    /// Sequential index of the layer after the last stage.
    pub fn module_count(&self) -> usize {
        self.stages.iter().map(Conv1dStage::module_count).sum()
    }

    /// Smallest input length that survives every stage.
    pub fn min_input_len(&self) -> usize {
        self.stages
            .iter()
            .rev()
            .fold(1, |out, stage| stage.min_input_len(out))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::Config(format!("{name}: extractor has no stages")));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.out_channels == 0 || stage.kernel_size == 0 || stage.stride == 0 {
                return Err(Error::Config(format!(
                    "{name}: stage {i} needs positive channels, kernel and stride"
                )));
            }
            if stage.max_pool == Some(0) {
                return Err(Error::Config(format!("{name}: stage {i} has max_pool 0")));
            }
        }
        if let Some(p) = self.trailing_dropout {
            check_probability(&format!("{name}.trailing_dropout"), p)?;
        }
        Ok(())
    }
}

/// One 2-D stage: conv (stride 1) → batch-norm → avg-pool → channel dropout → ReLU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conv2dStage {
    pub out_channels: usize,
    #[serde(default = "three")]
    pub kernel_size: usize,
    #[serde(default = "three")]
    pub pool_kernel: usize,
    /// Pooling stride as (height, width).
    pub pool_stride: (usize, usize),
}

fn three() -> usize {
    3
}

impl Conv2dStage {
    /// Layers per stage in a sequential checkpoint: conv, batch-norm,
    /// avg-pool, channel dropout, ReLU.
    pub const MODULE_COUNT: usize = 5;

    const fn new(out_channels: usize, pool_stride: (usize, usize)) -> Self {
        Self {
            out_channels,
            kernel_size: 3,
            pool_kernel: 3,
            pool_stride,
        }
    }

    fn axis(&self, len: usize, stride: usize) -> Option<usize> {
        let conv = len.checked_sub(self.kernel_size)? + 1;
        Some(conv.checked_sub(self.pool_kernel)? / stride + 1)
    }

    /// Output (height, width), `None` if either axis would be empty.
    pub fn output_hw(&self, (h, w): (usize, usize)) -> Option<(usize, usize)> {
        Some((
            self.axis(h, self.pool_stride.0)?,
            self.axis(w, self.pool_stride.1)?,
        ))
    }
}

/// A 2-D stack over a `[B, 1, H, W]` feature map (model 2 branches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extractor2dConfig {
    pub stages: Vec<Conv2dStage>,
}

impl Extractor2dConfig {
    pub fn out_channels(&self) -> usize {
        self.stages.last().map_or(0, |s| s.out_channels)
    }

    pub fn output_hw(&self, hw: (usize, usize)) -> Option<(usize, usize)> {
        self.stages
            .iter()
            .try_fold(hw, |hw, stage| stage.output_hw(hw))
    }

    /// Reduced height for an input of height `h`, ignoring the width axis.
    pub fn output_height(&self, h: usize) -> Option<usize> {
        self.stages
            .iter()
            .try_fold(h, |h, stage| stage.axis(h, stage.pool_stride.0))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::Config(format!("{name}: extractor has no stages")));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.out_channels == 0
                || stage.kernel_size == 0
                || stage.pool_kernel == 0
                || stage.pool_stride.0 == 0
                || stage.pool_stride.1 == 0
            {
                return Err(Error::Config(format!(
                    "{name}: stage {i} needs positive channels, kernel and pooling"
                )));
            }
        }
        Ok(())
    }
}

fn check_probability(name: &str, p: f64) -> Result<()> {
    if !(0.0..1.0).contains(&p) {
        return Err(Error::Config(format!("{name} must be in [0, 1), got {p}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Model 1: audio + lyrics classifier
// ---------------------------------------------------------------------------

/// What to do with lyrics longer than the text encoder's position limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricsOverflow {
    /// Keep the first tokens (and the closing special token) and log a warning.
    #[default]
    Truncate,
    /// Fail the forward pass with a tokenizer error.
    Reject,
}

/// Configuration of [`AudioLyricsClassifier`](crate::model::cat::AudioLyricsClassifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatModelConfig {
    #[serde(flatten)]
    pub spectral: SpectralConfig,
    /// Output width of every branch's adaptive average pooling.
    pub adaptive_layer_units: usize,
    pub dropout: f64,
    pub num_classes: usize,
    pub lyrics_hidden_size: usize,
    pub lyrics_overflow: LyricsOverflow,
    pub audio_extractor: Extractor1dConfig,
    pub stft_extractor: Extractor1dConfig,
    pub mel_extractor: Extractor1dConfig,
    pub mfcc_extractor: Extractor1dConfig,
    pub cqt_extractor: Extractor1dConfig,
}

impl Default for CatModelConfig {
    fn default() -> Self {
        Self {
            spectral: SpectralConfig::default(),
            adaptive_layer_units: 8,
            dropout: 0.25,
            num_classes: 4,
            lyrics_hidden_size: 250,
            lyrics_overflow: LyricsOverflow::Truncate,
            // Stride-5 stages are padded so that a 3 s clip at 22.05 kHz
            // still yields at least one frame.
            audio_extractor: Extractor1dConfig {
                stages: vec![
                    Conv1dStage::conv(250, 1024, 256, 0),
                    Conv1dStage::conv(250, 13, 5, 6),
                    Conv1dStage::conv(250, 13, 5, 6),
                    Conv1dStage::conv(250, 13, 5, 6),
                ],
                trailing_dropout: Some(0.5),
            },
            stft_extractor: Extractor1dConfig {
                stages: vec![Conv1dStage::pooled(500); 3],
                trailing_dropout: None,
            },
            mel_extractor: Extractor1dConfig {
                stages: vec![Conv1dStage::pooled(100); 2],
                trailing_dropout: None,
            },
            mfcc_extractor: Extractor1dConfig {
                stages: vec![Conv1dStage::pooled(16); 3],
                trailing_dropout: None,
            },
            cqt_extractor: Extractor1dConfig {
                stages: vec![Conv1dStage::pooled(100); 3],
                trailing_dropout: None,
            },
        }
    }
}

impl CatModelConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The audio branches in fusion order, with their names.
    pub fn audio_branches(&self) -> [(&'static str, &Extractor1dConfig); 5] {
        [
            ("audio", &self.audio_extractor),
            ("stft", &self.stft_extractor),
            ("mel", &self.mel_extractor),
            ("mfcc", &self.mfcc_extractor),
            ("cqt", &self.cqt_extractor),
        ]
    }

    /// Width of the fusion head input for a text encoder of any hidden size.
    pub fn fusion_width(&self) -> usize {
        self.audio_branches()
            .iter()
            .map(|(_, e)| e.out_channels() * self.adaptive_layer_units)
            .sum::<usize>()
            + self.lyrics_hidden_size
    }

    pub fn validate(&self) -> Result<()> {
        self.spectral.validate()?;
        self.spectral.validate_cqt()?;
        if self.adaptive_layer_units == 0 {
            return Err(Error::Config("adaptive_layer_units must be positive".into()));
        }
        if self.num_classes == 0 || self.lyrics_hidden_size == 0 {
            return Err(Error::Config(
                "num_classes and lyrics_hidden_size must be positive".into(),
            ));
        }
        check_probability("dropout", self.dropout)?;
        for (name, extractor) in self.audio_branches() {
            extractor.validate(name)?;
        }
        Ok(())
    }

    /// Shortest waveform every branch can process.
    pub fn min_samples(&self) -> usize {
        let spec = &self.spectral;
        let frames_needed = self
            .stft_extractor
            .min_input_len()
            .max(self.mel_extractor.min_input_len());
        let stft_samples = (frames_needed - 1) * spec.hop_length();
        let mfcc_samples = (self.mfcc_extractor.min_input_len() - 1) * spec.mfcc_hop_length;
        let cqt_samples = (self.cqt_extractor.min_input_len() - 1) * spec.cqt_hop_length;
        // Reflect padding needs strictly more samples than the pad width.
        let reflect = (spec.n_fft / 2)
            .max(spec.mfcc_n_fft / 2)
            .max(spec.cqt_kernel_len().div_ceil(2))
            + 1;
        self.audio_extractor
            .min_input_len()
            .max(stft_samples)
            .max(mfcc_samples)
            .max(cqt_samples)
            .max(reflect)
    }
}

// ---------------------------------------------------------------------------
// Model 2: spectral mean/scale regressor
// ---------------------------------------------------------------------------

/// Strictly positive activation for the scale head.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScaleActivation {
    /// `elu(x) + 1 + eps`.
    ShiftedElu,
    /// `ln(1 + e^x) + eps`.
    Softplus,
    /// `max * sigmoid(x) + eps`, bounded above by `max + eps`.
    Sigmoid { max: f64 },
}

impl Default for ScaleActivation {
    fn default() -> Self {
        Self::ShiftedElu
    }
}

/// Hidden size and depth of one recurrent sequence encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrentConfig {
    pub hidden_size: usize,
    pub num_layers: usize,
}

/// Configuration of [`SpectralStatRegressor`](crate::model::stat::SpectralStatRegressor).
///
/// Serialized with flat hyperparameter keys (`audio_hidden_size`,
/// `audio_num_layers`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatModelConfig {
    #[serde(flatten)]
    pub spectral: SpectralConfig,
    pub dropout: f64,
    pub audio_hidden_size: usize,
    pub audio_num_layers: usize,
    pub stft_hidden_size: usize,
    pub stft_num_layers: usize,
    pub mel_spec_hidden_size: usize,
    pub mel_spec_num_layers: usize,
    pub mfcc_hidden_size: usize,
    pub mfcc_num_layers: usize,
    pub scale_activation: ScaleActivation,
    /// 1-D front end of the raw-audio branch; its channels become the 2-D height.
    pub audio_front: Extractor1dConfig,
    pub audio_extractor: Extractor2dConfig,
    pub stft_extractor: Extractor2dConfig,
    pub mel_extractor: Extractor2dConfig,
    pub mfcc_extractor: Extractor2dConfig,
}

impl Default for StatModelConfig {
    fn default() -> Self {
        use Conv2dStage as S;
        Self {
            spectral: SpectralConfig {
                n_fft: 1024,
                ..SpectralConfig::default()
            },
            dropout: 0.1,
            audio_hidden_size: 256,
            audio_num_layers: 1,
            stft_hidden_size: 256,
            stft_num_layers: 1,
            mel_spec_hidden_size: 256,
            mel_spec_num_layers: 1,
            mfcc_hidden_size: 128,
            mfcc_num_layers: 1,
            scale_activation: ScaleActivation::ShiftedElu,
            audio_front: Extractor1dConfig {
                stages: vec![Conv1dStage::conv(250, 1024, 256, 0)],
                trailing_dropout: None,
            },
            audio_extractor: Extractor2dConfig {
                stages: vec![
                    S::new(16, (1, 1)),
                    S::new(32, (1, 1)),
                    S::new(64, (1, 1)),
                    S::new(128, (2, 1)),
                    S::new(128, (2, 1)),
                    S::new(128, (2, 1)),
                    S::new(128, (2, 2)),
                    S::new(128, (2, 2)),
                ],
            },
            stft_extractor: Extractor2dConfig {
                stages: vec![
                    S::new(16, (1, 1)),
                    S::new(32, (2, 1)),
                    S::new(64, (2, 1)),
                    S::new(128, (2, 1)),
                    S::new(128, (2, 1)),
                    S::new(128, (2, 2)),
                    S::new(128, (2, 2)),
                ],
            },
            mel_extractor: Extractor2dConfig {
                stages: vec![
                    S::new(16, (1, 1)),
                    S::new(32, (1, 1)),
                    S::new(64, (2, 1)),
                    S::new(128, (2, 1)),
                    S::new(128, (2, 1)),
                    S::new(128, (2, 2)),
                ],
            },
            mfcc_extractor: Extractor2dConfig {
                stages: vec![
                    S::new(16, (1, 1)),
                    S::new(32, (1, 1)),
                    S::new(64, (1, 1)),
                    S::new(128, (1, 2)),
                ],
            },
        }
    }
}

/// Derived sizes of one model 2 branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchDims {
    /// Height of the 2-D input (channels of the 1-D representation).
    pub input_height: usize,
    /// Height after the 2-D stack.
    pub reduced_height: usize,
    /// Features per time step fed to the recurrent encoder.
    pub sequence_features: usize,
    pub recurrent: RecurrentConfig,
}

impl StatModelConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Recurrent settings per branch in fusion order (audio, stft, mel, mfcc).
    pub fn recurrent(&self) -> [RecurrentConfig; 4] {
        [
            RecurrentConfig {
                hidden_size: self.audio_hidden_size,
                num_layers: self.audio_num_layers,
            },
            RecurrentConfig {
                hidden_size: self.stft_hidden_size,
                num_layers: self.stft_num_layers,
            },
            RecurrentConfig {
                hidden_size: self.mel_spec_hidden_size,
                num_layers: self.mel_spec_num_layers,
            },
            RecurrentConfig {
                hidden_size: self.mfcc_hidden_size,
                num_layers: self.mfcc_num_layers,
            },
        ]
    }

    /// Input heights per branch: front-end channels, STFT bins, mel bands, MFCCs.
    pub fn input_heights(&self) -> [usize; 4] {
        [
            self.audio_front.out_channels(),
            self.spectral.freq_bins(),
            self.spectral.n_mels,
            self.spectral.n_mfcc,
        ]
    }

    pub fn extractors(&self) -> [(&'static str, &Extractor2dConfig); 4] {
        [
            ("audio", &self.audio_extractor),
            ("stft", &self.stft_extractor),
            ("mel", &self.mel_extractor),
            ("mfcc", &self.mfcc_extractor),
        ]
    }

    /// Computes every branch's derived sizes, failing if a stack collapses
    /// the height axis.
    pub fn branch_dims(&self) -> Result<[BranchDims; 4]> {
        let heights = self.input_heights();
        let recurrent = self.recurrent();
        let extractors = self.extractors();
        let mut dims = Vec::with_capacity(4);
        for i in 0..4 {
            let (name, extractor) = extractors[i];
            let reduced_height = extractor.output_height(heights[i]).ok_or_else(|| {
                Error::Config(format!(
                    "{name}: input height {} is too small for {} conv stages",
                    heights[i],
                    extractor.stages.len()
                ))
            })?;
            dims.push(BranchDims {
                input_height: heights[i],
                reduced_height,
                sequence_features: extractor.out_channels() * reduced_height,
                recurrent: recurrent[i],
            });
        }
        Ok([dims[0], dims[1], dims[2], dims[3]])
    }

    /// Width of the fusion head input: the sum of the recurrent hidden sizes.
    pub fn fusion_width(&self) -> usize {
        self.recurrent().iter().map(|r| r.hidden_size).sum()
    }

    pub fn validate(&self) -> Result<()> {
        self.spectral.validate()?;
        check_probability("dropout", self.dropout)?;
        for (i, r) in self.recurrent().iter().enumerate() {
            if r.hidden_size == 0 || r.num_layers == 0 {
                return Err(Error::Config(format!(
                    "{}: recurrent hidden size and depth must be positive",
                    self.extractors()[i].0
                )));
            }
        }
        if let ScaleActivation::Sigmoid { max } = self.scale_activation
            && !(max > 0.0 && max.is_finite())
        {
            return Err(Error::Config(format!(
                "sigmoid scale activation needs a positive finite max, got {max}"
            )));
        }
        self.audio_front.validate("audio_front")?;
        for (name, extractor) in self.extractors() {
            extractor.validate(name)?;
        }
        self.branch_dims()?;
        Ok(())
    }
}
