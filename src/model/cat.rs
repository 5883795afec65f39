//! Model 1: audio + lyrics emotion classifier.
//!
//! ```text
//! waveform ─┬─ conv1d stack ────────────────┐
//!           ├─ STFT ─→ conv1d stack ────────┤
//!           ├─ Mel  ─→ conv1d stack ────────┤  adaptive pool + flatten
//!           ├─ MFCC ─→ conv1d stack ────────┤
//!           └─ CQT  ─→ conv1d stack ────────┤
//! lyrics ─→ BERT (frozen) ─→ LSTM ──────────┴─→ concat ─→ MLP ─→ [B, 4] logits
//! ```

use std::sync::Arc;

use candle_core::{Device, Module, Tensor, Var};
use candle_nn::{ModuleT, VarBuilder};

use super::extractor::Extractor1d;
use super::head::ClassifierHead;
use super::text::{LyricsEncoder, TextEncoder};
use crate::config::CatModelConfig;
use crate::spectral::{self, Cqt, MelSpectrogram, Mfcc, Stft};
use crate::{Error, Result};

/// One model 1 batch: waveforms `[B, S]` (or `[B, 1, S]`) and `B` lyrics.
#[derive(Debug, Clone)]
pub struct CatBatch {
    pub audio: Tensor,
    pub lyrics: Vec<String>,
}

impl CatBatch {
    /// Stack equal-length mono waveforms.
    pub fn from_waveforms(waveforms: &[Vec<f32>], lyrics: Vec<String>, device: &Device) -> Result<Self> {
        Ok(Self {
            audio: stack_waveforms(waveforms, device)?,
            lyrics,
        })
    }
}

pub(crate) fn stack_waveforms(waveforms: &[Vec<f32>], device: &Device) -> Result<Tensor> {
    let Some(first) = waveforms.first() else {
        return Err(Error::Shape("empty batch".into()));
    };
    if let Some(bad) = waveforms.iter().position(|w| w.len() != first.len()) {
        return Err(Error::Shape(format!(
            "waveform {bad} has {} samples, expected {}",
            waveforms[bad].len(),
            first.len()
        )));
    }
    let data: Vec<f32> = waveforms.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(data, (waveforms.len(), first.len()), device)?)
}

/// Audio + lyrics classifier producing `num_classes` logits.
pub struct AudioLyricsClassifier {
    config: CatModelConfig,
    stft: Stft,
    mel: MelSpectrogram,
    mfcc: Mfcc,
    cqt: Cqt,
    audio_extractor: Extractor1d,
    stft_extractor: Extractor1d,
    mel_extractor: Extractor1d,
    mfcc_extractor: Extractor1d,
    cqt_extractor: Extractor1d,
    text_encoder: Arc<dyn TextEncoder>,
    lyrics_encoder: LyricsEncoder,
    head: ClassifierHead,
    device: Device,
}

impl AudioLyricsClassifier {
    pub fn new(cfg: &CatModelConfig, text_encoder: Arc<dyn TextEncoder>, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let device = vb.device().clone();
        let spec = &cfg.spectral;
        let trainable = spec.trainable;
        let units = Some(cfg.adaptive_layer_units);

        let stft = Stft::new(spec, trainable, vb.pp("stft"))?;
        let mel = MelSpectrogram::new(spec, spec.n_mels, trainable, vb.pp("mel_spec"))?;
        let mfcc = Mfcc::new(spec, &device)?;
        let cqt = Cqt::new(spec, trainable, vb.pp("cqt"))?;

        let audio_extractor = Extractor1d::new(
            "audio",
            &cfg.audio_extractor,
            1,
            cfg.dropout,
            units,
            vb.pp("audio_feature_extractor"),
        )?;
        let stft_extractor = Extractor1d::new(
            "stft",
            &cfg.stft_extractor,
            spec.freq_bins(),
            cfg.dropout,
            units,
            vb.pp("stft_feature_extractor"),
        )?;
        let mel_extractor = Extractor1d::new(
            "mel",
            &cfg.mel_extractor,
            spec.n_mels,
            cfg.dropout,
            units,
            vb.pp("mel_spec_feature_extractor"),
        )?;
        let mfcc_extractor = Extractor1d::new(
            "mfcc",
            &cfg.mfcc_extractor,
            spec.n_mfcc,
            cfg.dropout,
            units,
            vb.pp("mfcc_feature_extractor"),
        )?;
        let cqt_extractor = Extractor1d::new(
            "cqt",
            &cfg.cqt_extractor,
            spec.n_cqt,
            cfg.dropout,
            units,
            vb.pp("cqt_feature_extractor"),
        )?;

        let lyrics_encoder = LyricsEncoder::new(
            text_encoder.hidden_size(),
            cfg.lyrics_hidden_size,
            vb.pp("lyrics_extractor"),
        )?;
        let head = ClassifierHead::new(cfg.fusion_width(), cfg.num_classes, cfg.dropout, vb.pp("fc"))?;

        tracing::debug!(
            audio = audio_extractor.output_width(),
            stft = stft_extractor.output_width(),
            mel = mel_extractor.output_width(),
            mfcc = mfcc_extractor.output_width(),
            cqt = cqt_extractor.output_width(),
            lyrics = lyrics_encoder.hidden_size(),
            fusion = cfg.fusion_width(),
            min_samples = cfg.min_samples(),
            "built audio/lyrics classifier"
        );

        Ok(Self {
            config: cfg.clone(),
            stft,
            mel,
            mfcc,
            cqt,
            audio_extractor,
            stft_extractor,
            mel_extractor,
            mfcc_extractor,
            cqt_extractor,
            text_encoder,
            lyrics_encoder,
            head,
            device,
        })
    }

    pub fn config(&self) -> &CatModelConfig {
        &self.config
    }

    /// Width of the concatenated branch embeddings.
    pub fn fusion_width(&self) -> usize {
        self.config.fusion_width()
    }

    /// Learned spectral kernels; empty unless `spec_trainable` is set.
    ///
    /// They are registered in the model's `VarBuilder` like every other
    /// weight (`stft.kernel`, `mel_spec.stft.kernel`, `mel_spec.mel_basis`,
    /// `cqt.kernel`), so a `VarMap` save includes them.
    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.stft.trainable_vars();
        vars.extend(self.mel.trainable_vars());
        vars.extend(self.cqt.trainable_vars());
        vars
    }

    fn check_batch(&self, batch: &CatBatch) -> Result<Tensor> {
        let signal = spectral::as_signal(&batch.audio).map_err(|_| {
            Error::Shape(format!(
                "audio must be [B, S] or [B, 1, S], got {:?}",
                batch.audio.dims()
            ))
        })?;
        let (b, _, samples) = signal.dims3()?;
        if b != batch.lyrics.len() {
            return Err(Error::Shape(format!(
                "{b} waveforms but {} lyrics",
                batch.lyrics.len()
            )));
        }
        let min = self.config.min_samples();
        if samples < min {
            return Err(Error::Shape(format!(
                "{samples} samples is too short, need at least {min}"
            )));
        }
        Ok(signal)
    }

    /// `[B, num_classes]` logits.
    pub fn forward_t(&self, batch: &CatBatch, train: bool) -> Result<Tensor> {
        let signal = self.check_batch(batch)?;

        let audio = self.audio_extractor.forward_t(&signal, train)?;
        let stft = self
            .stft_extractor
            .forward_t(&self.stft.forward(&signal)?, train)?;
        let mel = self.mel_extractor.forward_t(&self.mel.forward(&signal)?, train)?;
        let mfcc = self
            .mfcc_extractor
            .forward_t(&self.mfcc.forward(&signal)?, train)?;
        let cqt = self.cqt_extractor.forward_t(&self.cqt.forward(&signal)?, train)?;

        let encoding = self.text_encoder.encode(&batch.lyrics, &self.device)?;
        let lyrics = self.lyrics_encoder.forward(&encoding)?;

        let fused = Tensor::cat(&[audio, stft, mel, mfcc, cqt, lyrics], 1)?;
        Ok(self.head.forward_t(&fused, train)?)
    }

    /// Evaluation-mode forward pass.
    pub fn forward(&self, batch: &CatBatch) -> Result<Tensor> {
        self.forward_t(batch, false)
    }
}
