//! MFCC: Mel power → decibels (80 dB floor) → orthonormal DCT-II.

use candle_core::{Device, Module, Result, Tensor};

use super::MelSpectrogram;
use crate::audio::features::{AMIN, TOP_DB, dct_matrix};
use crate::config::SpectralConfig;

/// Output `[B, n_mfcc, T]` with `T = S / mfcc_hop_length + 1`.
///
/// The kernels are always fixed and use their own frame size
/// (`mfcc_n_fft`, default 2048) and hop (`mfcc_hop_length`, default 512),
/// independent of the STFT and Mel settings.
#[derive(Debug, Clone)]
pub struct Mfcc {
    mel: MelSpectrogram,
    /// `[n_mfcc, mfcc_n_mels]`
    dct: Tensor,
}

impl Mfcc {
    pub fn new(cfg: &SpectralConfig, device: &Device) -> Result<Self> {
        let mel = MelSpectrogram::fixed(
            cfg.mfcc_n_fft,
            cfg.mfcc_hop_length,
            cfg.mfcc_n_mels,
            cfg.sample_rate,
            device,
        )?;
        let rows = dct_matrix(cfg.n_mfcc, cfg.mfcc_n_mels);
        let data: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
        let dct = Tensor::from_vec(data, (cfg.n_mfcc, cfg.mfcc_n_mels), device)?;
        Ok(Self { mel, dct })
    }
}

/// `10 * log10(max(x, AMIN))`, floored at `TOP_DB` below each example's peak.
fn power_to_db(power: &Tensor) -> Result<Tensor> {
    let clamped = ((power - AMIN)?.relu()? + AMIN)?;
    let db = (clamped.log()? * (10.0 / std::f64::consts::LN_10))?;
    let peak = db.max_keepdim(2)?.max_keepdim(1)?;
    db.broadcast_maximum(&(peak - TOP_DB)?)
}

impl Module for Mfcc {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mel = self.mel.forward(xs)?;
        self.dct.broadcast_matmul(&power_to_db(&mel)?)
    }
}
