//! Model 2: spectral mean/scale regressor.
//!
//! ```text
//! waveform ─→ conv1d front ─→ 2-D conv stack ─→ LSTM ──┐
//! STFT     ─────────────────→ 2-D conv stack ─→ LSTM ──┤
//! Mel      ─────────────────→ 2-D conv stack ─→ LSTM ──┼─→ concat ─→ trunk ─┬─→ mean  [B, 2]
//! MFCC     ─────────────────→ 2-D conv stack ─→ LSTM ──┘                    └─→ scale [B, 2] (> 0)
//! ```
//!
//! The three spectrograms are supplied precomputed; see [`StatBatch::from_waveforms`].

use candle_core::{Device, Tensor};
use candle_nn::{ModuleT, VarBuilder};

use super::cat::stack_waveforms;
use super::extractor::{Extractor1d, Extractor2d};
use super::head::MeanScaleHead;
use super::sequence::SequenceEncoder;
use crate::audio::FeatureExtractor;
use crate::config::{SpectralConfig, StatModelConfig};
use crate::spectral;
use crate::{Error, Result};

/// One model 2 batch.
#[derive(Debug, Clone)]
pub struct StatBatch {
    /// `[B, S]` or `[B, 1, S]`.
    pub audio: Tensor,
    /// `[B, n_fft/2 + 1, T]` magnitude.
    pub stft: Tensor,
    /// `[B, n_mels, T]` power.
    pub mel: Tensor,
    /// `[B, n_mfcc, T_mfcc]`.
    pub mfcc: Tensor,
}

fn stack_frames(frames: Vec<Vec<Vec<f32>>>, device: &Device) -> Result<Tensor> {
    let batch = frames.len();
    let bins = frames.first().map_or(0, Vec::len);
    let steps = frames
        .first()
        .and_then(|f| f.first())
        .map_or(0, Vec::len);
    let data: Vec<f32> = frames.into_iter().flatten().flatten().collect();
    Ok(Tensor::from_vec(data, (batch, bins, steps), device)?)
}

impl StatBatch {
    /// Compute STFT magnitude, Mel power and MFCC features on the CPU for
    /// equal-length mono waveforms. The MFCC time axis follows
    /// `mfcc_hop_length`, the other two follow the STFT hop.
    pub fn from_waveforms(waveforms: &[Vec<f32>], cfg: &SpectralConfig, device: &Device) -> Result<Self> {
        let audio = stack_waveforms(waveforms, device)?;
        let n_fft = cfg.n_fft.max(cfg.mfcc_n_fft);
        if waveforms[0].len() <= n_fft / 2 {
            return Err(Error::Audio(format!(
                "{} samples is too short for n_fft {n_fft}",
                waveforms[0].len(),
            )));
        }
        let features = FeatureExtractor::new(cfg);
        let stft = waveforms.iter().map(|w| features.stft_magnitude(w)).collect();
        let mel = waveforms.iter().map(|w| features.mel_power(w)).collect();
        let mfcc = waveforms.iter().map(|w| features.mfcc(w)).collect();
        Ok(Self {
            audio,
            stft: stack_frames(stft, device)?,
            mel: stack_frames(mel, device)?,
            mfcc: stack_frames(mfcc, device)?,
        })
    }
}

/// Regressor producing `[mean_0, mean_1, scale_0, scale_1]` per example.
pub struct SpectralStatRegressor {
    config: StatModelConfig,
    audio_front: Extractor1d,
    extractors: [Extractor2d; 4],
    encoders: [SequenceEncoder; 4],
    head: MeanScaleHead,
}

const BRANCH_PREFIXES: [&str; 4] = ["audio", "stft", "mel_spec", "mfcc"];

impl SpectralStatRegressor {
    pub fn new(cfg: &StatModelConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let dims = cfg.branch_dims()?;

        // The front end and the audio 2-D stack share one layer list, with
        // the channel lift between them.
        let audio_front = Extractor1d::new(
            "audio_front",
            &cfg.audio_front,
            1,
            cfg.dropout,
            None,
            vb.pp("audio_feature_extractor"),
        )?;
        let first_layers = [cfg.audio_front.module_count() + 1, 1, 1, 1];

        let mut extractors = Vec::with_capacity(4);
        let mut encoders = Vec::with_capacity(4);
        for ((((name, extractor), dims), prefix), first) in cfg
            .extractors()
            .into_iter()
            .zip(dims)
            .zip(BRANCH_PREFIXES)
            .zip(first_layers)
        {
            extractors.push(Extractor2d::new(
                name,
                extractor,
                dims.input_height,
                cfg.dropout,
                first,
                vb.pp(format!("{prefix}_feature_extractor")),
            )?);
            encoders.push(SequenceEncoder::new(
                dims.sequence_features,
                dims.recurrent.hidden_size,
                dims.recurrent.num_layers,
                vb.pp(format!("{prefix}_lstm")),
            )?);
            tracing::debug!(
                branch = name,
                height = dims.input_height,
                reduced_height = dims.reduced_height,
                lstm_input = dims.sequence_features,
                hidden = dims.recurrent.hidden_size,
                layers = dims.recurrent.num_layers,
                "built regressor branch"
            );
        }
        let head = MeanScaleHead::new(cfg.fusion_width(), cfg.dropout, cfg.scale_activation, vb)?;
        tracing::debug!(fusion = cfg.fusion_width(), "built spectral regressor");

        let (Ok(extractors), Ok(encoders)) = (extractors.try_into(), encoders.try_into()) else {
            return Err(Error::Config("expected exactly four branches".into()));
        };
        Ok(Self {
            config: cfg.clone(),
            audio_front,
            extractors,
            encoders,
            head,
        })
    }

    pub fn config(&self) -> &StatModelConfig {
        &self.config
    }

    /// Width of the concatenated sequence embeddings.
    pub fn fusion_width(&self) -> usize {
        self.config.fusion_width()
    }

    fn check_batch(&self, batch: &StatBatch) -> Result<Tensor> {
        let audio = spectral::as_signal(&batch.audio).map_err(|_| {
            Error::Shape(format!(
                "audio must be [B, S] or [B, 1, S], got {:?}",
                batch.audio.dims()
            ))
        })?;
        let b = audio.dim(0)?;
        for (name, t) in [("stft", &batch.stft), ("mel", &batch.mel), ("mfcc", &batch.mfcc)] {
            if t.dims().first() != Some(&b) {
                return Err(Error::Shape(format!(
                    "{name} batch {:?} does not match audio batch {b}",
                    t.dims()
                )));
            }
        }
        Ok(audio)
    }

    /// `[B, 4]`: columns 0-1 are means, columns 2-3 strictly positive scales.
    pub fn forward_t(&self, batch: &StatBatch, train: bool) -> Result<Tensor> {
        let audio = self.check_batch(batch)?;
        let front = self.audio_front.forward_t(&audio, train)?;

        let inputs = [&front, &batch.stft, &batch.mel, &batch.mfcc];
        let mut embeddings = Vec::with_capacity(4);
        for ((input, extractor), encoder) in inputs.into_iter().zip(&self.extractors).zip(&self.encoders) {
            let fmap = extractor.forward_t(input, train)?;
            embeddings.push(encoder.forward(&fmap)?);
        }
        let fused = Tensor::cat(&embeddings, 1)?;
        Ok(self.head.forward_t(&fused, train)?)
    }

    /// Evaluation-mode forward pass.
    pub fn forward(&self, batch: &StatBatch) -> Result<Tensor> {
        self.forward_t(batch, false)
    }

    /// Split a `[B, 4]` output into `(mean, scale)`, each `[B, 2]`.
    pub fn split_output(output: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_, width) = output.dims2()?;
        if width != 4 {
            return Err(Error::Shape(format!("expected [B, 4] output, got width {width}")));
        }
        Ok((output.narrow(1, 0, 2)?, output.narrow(1, 2, 2)?))
    }
}
