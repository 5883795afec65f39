//! Mel power spectrogram: STFT power projected onto a Slaney mel filterbank.

use candle_core::{Device, Module, Result, Tensor, Var};
use candle_nn::VarBuilder;

use super::{SpectralKernel, Stft, rows_to_tensor};
use crate::audio::features::mel_filterbank;
use crate::config::SpectralConfig;

/// Output `[B, n_mels, T]`, no log compression.
#[derive(Debug, Clone)]
pub struct MelSpectrogram {
    stft: Stft,
    /// `[n_mels, n_fft/2 + 1]`
    filterbank: SpectralKernel,
}

fn slaney_rows(n_fft: usize, n_mels: usize, sample_rate: u32) -> Vec<Vec<f64>> {
    mel_filterbank(n_fft, n_mels, sample_rate, 0.0, sample_rate as f64 / 2.0)
}

impl MelSpectrogram {
    /// `trainable` covers both the Fourier kernels (`stft.kernel`) and the
    /// filterbank (`mel_basis`).
    pub fn new(cfg: &SpectralConfig, n_mels: usize, trainable: bool, vb: VarBuilder) -> Result<Self> {
        let stft = Stft::new(cfg, trainable, vb.pp("stft"))?;
        let filterbank = SpectralKernel::from_rows(
            &slaney_rows(cfg.n_fft, n_mels, cfg.sample_rate),
            &[n_mels, stft.bins()],
            trainable,
            &vb,
            "mel_basis",
        )?;
        Ok(Self { stft, filterbank })
    }

    /// Constant kernels with their own frame size and hop.
    pub fn fixed(
        n_fft: usize,
        hop_length: usize,
        n_mels: usize,
        sample_rate: u32,
        device: &Device,
    ) -> Result<Self> {
        let stft = Stft::fixed(n_fft, hop_length, device)?;
        let rows = slaney_rows(n_fft, n_mels, sample_rate);
        let filterbank = rows_to_tensor(&rows, &[n_mels, stft.bins()], device)?;
        Ok(Self {
            stft,
            filterbank: SpectralKernel::Fixed(filterbank),
        })
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.stft.trainable_vars();
        vars.extend(self.filterbank.var().cloned());
        vars
    }
}

impl Module for MelSpectrogram {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let power = self.stft.power(xs)?;
        self.filterbank.tensor().broadcast_matmul(&power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FeatureExtractor;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_mel_matches_reference() {
        let dev = Device::Cpu;
        let cfg = SpectralConfig {
            n_fft: 512,
            n_mels: 32,
            ..SpectralConfig::default()
        };
        let samples: Vec<f32> = (0..4000)
            .map(|i| (i as f32 * 0.05).sin() * 0.5 + (i as f32 * 0.31).cos() * 0.25)
            .collect();
        let reference = FeatureExtractor::new(&cfg).mel_power(&samples);

        let mel = MelSpectrogram::new(&cfg, 32, false, VarBuilder::zeros(DType::F32, &dev)).unwrap();
        let x = Tensor::from_vec(samples, (1, 4000), &dev).unwrap();
        let out = mel.forward(&x).unwrap();
        assert_eq!(out.dims(), &[1, 32, 4000 / 128 + 1]);

        let out: Vec<Vec<f32>> = out.squeeze(0).unwrap().to_vec2().unwrap();
        for (row_out, row_ref) in out.iter().zip(reference.iter()) {
            for (a, b) in row_out.iter().zip(row_ref.iter()) {
                assert!((a - b).abs() < 1e-2 * (1.0 + b.abs()), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_trainable_mel_vars() {
        let dev = Device::Cpu;
        let cfg = SpectralConfig {
            n_fft: 64,
            ..SpectralConfig::default()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mel = MelSpectrogram::new(&cfg, 8, true, vb.pp("mel_spec")).unwrap();
        let vars = mel.trainable_vars();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[1].dims(), &[8, 33]);

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["mel_spec.stft.kernel"].dims(), &[66, 1, 64]);
        let basis: f32 = data["mel_spec.mel_basis"].sum_all().unwrap().to_scalar().unwrap();
        assert!(basis > 0.0);
    }
}
