//! STFT magnitude as a strided convolution with windowed Fourier kernels.

use candle_core::{Device, Module, Result, Tensor, Var};
use candle_nn::VarBuilder;

use super::{SpectralKernel, as_signal, complex_conv, magnitude, reflect_pad, rows_to_tensor};
use crate::audio::features::hann_window;
use crate::config::SpectralConfig;

/// Centered short-time Fourier transform.
///
/// Input `[B, S]` or `[B, 1, S]`; output `[B, n_fft/2 + 1, S/hop + 1]`.
#[derive(Debug, Clone)]
pub struct Stft {
    /// Real kernels followed by imaginary kernels: `[2·bins, 1, n_fft]`.
    kernel: SpectralKernel,
    n_fft: usize,
    hop_length: usize,
    bins: usize,
    trainable: bool,
}

/// `[2·bins, n_fft]` windowed cosine rows followed by windowed sine rows.
fn fourier_rows(n_fft: usize) -> Vec<Vec<f64>> {
    let bins = n_fft / 2 + 1;
    let window = hann_window(n_fft);
    let parts: [fn(f64) -> f64; 2] = [f64::cos, f64::sin];
    let mut rows = Vec::with_capacity(2 * bins);
    for part in parts {
        for k in 0..bins {
            rows.push(
                (0..n_fft)
                    .map(|n| {
                        let phase = 2.0 * std::f64::consts::PI * k as f64 * n as f64 / n_fft as f64;
                        window[n] * part(phase)
                    })
                    .collect(),
            );
        }
    }
    rows
}

impl Stft {
    /// Kernels are registered in `vb` as `kernel` when `trainable`.
    pub fn new(cfg: &SpectralConfig, trainable: bool, vb: VarBuilder) -> Result<Self> {
        let n_fft = cfg.n_fft;
        let bins = cfg.freq_bins();
        let kernel = SpectralKernel::from_rows(
            &fourier_rows(n_fft),
            &[2 * bins, 1, n_fft],
            trainable,
            &vb,
            "kernel",
        )?;
        tracing::debug!(n_fft, bins, hop = cfg.hop_length(), trainable, "built STFT kernels");
        Ok(Self {
            kernel,
            n_fft,
            hop_length: cfg.hop_length(),
            bins,
            trainable,
        })
    }

    /// Constant kernels with their own frame size and hop.
    pub fn fixed(n_fft: usize, hop_length: usize, device: &Device) -> Result<Self> {
        let bins = n_fft / 2 + 1;
        let kernel = rows_to_tensor(&fourier_rows(n_fft), &[2 * bins, 1, n_fft], device)?;
        Ok(Self {
            kernel: SpectralKernel::Fixed(kernel),
            n_fft,
            hop_length,
            bins,
            trainable: false,
        })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Power spectrogram `|X|²`, `[B, bins, T]`.
    pub fn power(&self, xs: &Tensor) -> Result<Tensor> {
        let (re, im) = self.complex(xs)?;
        re.sqr()? + im.sqr()?
    }

    fn complex(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let signal = as_signal(xs)?;
        let padded = reflect_pad(&signal, self.n_fft / 2, self.n_fft / 2)?;
        complex_conv(&padded, self.kernel.tensor(), self.bins, self.hop_length)
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.kernel.var().into_iter().cloned().collect()
    }
}

impl Module for Stft {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (re, im) = self.complex(xs)?;
        magnitude(&re, &im, self.trainable)
    }
}
