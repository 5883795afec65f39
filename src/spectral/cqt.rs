//! Constant-Q transform with time-domain kernels.
//!
//! Bin `k` has centre frequency `f_k = f_min · 2^(k / bins_per_octave)` and a
//! Hann-windowed complex exponential kernel of length `ceil(Q · sr / f_k)`,
//! L1-normalised and centred inside the longest kernel. The magnitude of
//! each bin is scaled by the square root of its kernel length.

use candle_core::{Module, Result, Tensor, Var};
use candle_nn::VarBuilder;

use super::{SpectralKernel, as_signal, complex_conv, magnitude, reflect_pad};
use crate::audio::features::hann_window;
use crate::config::SpectralConfig;

/// Output `[B, n_cqt, S/hop + 1]`.
#[derive(Debug, Clone)]
pub struct Cqt {
    /// Real kernels followed by imaginary kernels: `[2·bins, 1, width]`.
    kernel: SpectralKernel,
    /// `[bins, 1]`, `sqrt` of each bin's kernel length.
    length_scale: Tensor,
    width: usize,
    hop_length: usize,
    bins: usize,
    trainable: bool,
}

impl Cqt {
    /// Kernels are registered in `vb` as `kernel` when `trainable`.
    pub fn new(cfg: &SpectralConfig, trainable: bool, vb: VarBuilder) -> Result<Self> {
        let device = vb.device();
        let bins = cfg.n_cqt;
        let sr = cfg.sample_rate as f64;
        let q = cfg.cqt_q();
        let width = cfg.cqt_kernel_len();

        let mut real = Vec::with_capacity(bins);
        let mut imag = Vec::with_capacity(bins);
        let mut scale = Vec::with_capacity(bins);
        for k in 0..bins {
            let freq = cfg.cqt_fmin * 2f64.powf(k as f64 / cfg.cqt_bins_per_octave as f64);
            let len = ((q * sr / freq).ceil() as usize).min(width);
            let window = hann_window(len);
            let start = (width - len) / 2;
            let offset = -(len.div_ceil(2) as f64);

            let mut re = vec![0.0; width];
            let mut im = vec![0.0; width];
            for (n, w) in window.iter().enumerate() {
                let phase = 2.0 * std::f64::consts::PI * (offset + n as f64) * freq / sr;
                re[start + n] = w * phase.cos();
                im[start + n] = w * phase.sin();
            }
            let l1: f64 = re.iter().zip(im.iter()).map(|(a, b)| a.hypot(*b)).sum();
            if l1 > 0.0 {
                re.iter_mut().chain(im.iter_mut()).for_each(|v| *v /= l1);
            }
            real.push(re);
            imag.push(im);
            scale.push((len as f32).sqrt());
        }
        real.extend(imag);

        let kernel = SpectralKernel::from_rows(&real, &[2 * bins, 1, width], trainable, &vb, "kernel")?;
        let length_scale = Tensor::from_vec(scale, (bins, 1), device)?;
        tracing::debug!(bins, width, q, trainable, "built CQT kernels");

        Ok(Self {
            kernel,
            length_scale,
            width,
            hop_length: cfg.cqt_hop_length,
            bins,
            trainable,
        })
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.kernel.var().into_iter().cloned().collect()
    }
}

impl Module for Cqt {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let signal = as_signal(xs)?;
        // Total padding of `width` keeps the frame count at `S / hop + 1`.
        let left = self.width / 2;
        let padded = reflect_pad(&signal, left, self.width - left)?;
        let (re, im) = complex_conv(&padded, self.kernel.tensor(), self.bins, self.hop_length)?;
        magnitude(&re, &im, self.trainable)?.broadcast_mul(&self.length_scale)
    }
}
