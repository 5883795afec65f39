//! Spectral transform stage: waveform → time-frequency representations.
//!
//! Every transform is a strided 1-D convolution of the (reflect-padded)
//! waveform with a bank of precomputed complex kernels, so it runs on the
//! same device as the rest of the model and can optionally learn its
//! kernels:
//!
//! ```text
//! [B, 1, S] ─→ reflect pad ─→ conv1d(kernels, stride=hop) ─→ [B, 2·bins, T]
//!           ─→ |re + i·im|  (STFT, CQT)
//!           ─→ |re + i·im|² · Melᵀ  (Mel)  ─→ dB ─→ DCT  (MFCC)
//! ```
//!
//! - [`stft`] — magnitude spectrogram, `[B, n_fft/2 + 1, T]`
//! - [`mel`] — Mel power spectrogram, `[B, n_mels, T]`
//! - [`mfcc`] — cepstral coefficients, `[B, n_mfcc, T]`
//! - [`cqt`] — constant-Q magnitude, `[B, n_bins, T]`

pub mod cqt;
pub mod mel;
pub mod mfcc;
pub mod stft;

pub use cqt::Cqt;
pub use mel::MelSpectrogram;
pub use mfcc::Mfcc;
pub use stft::Stft;

use candle_core::{D, Device, Result, Tensor, Var, bail};
use candle_nn::{Init, VarBuilder};

use crate::audio::features::reflect_indices;

/// Added under the square root of trainable magnitudes so the gradient stays finite.
const TRAINABLE_EPS: f64 = 1e-8;

/// A kernel bank that is either a constant or a learned parameter.
#[derive(Debug, Clone)]
pub enum SpectralKernel {
    Fixed(Tensor),
    Trainable(Var),
}

impl SpectralKernel {
    /// Register `init` under `name` in `vb` when `trainable`.
    ///
    /// A name already held by `vb` (a saved checkpoint, or a `VarMap` that
    /// was filled earlier) is loaded as is. A fresh `VarMap` entry is seeded
    /// with `init`, so saving the map writes the learned kernel.
    pub fn new(init: Tensor, trainable: bool, vb: &VarBuilder, name: &str) -> Result<Self> {
        if !trainable {
            return Ok(Self::Fixed(init));
        }
        let seeded = !vb.contains_tensor(name);
        let kernel = vb.get_with_hints(init.shape(), name, Init::Const(0.0))?;
        if seeded {
            kernel.slice_set(&init.to_dtype(kernel.dtype())?, 0, 0)?;
        }
        Ok(Self::Trainable(Var::from_tensor(&kernel)?))
    }

    /// Build from row-major `f64` values.
    pub(crate) fn from_rows(
        rows: &[Vec<f64>],
        shape: &[usize],
        trainable: bool,
        vb: &VarBuilder,
        name: &str,
    ) -> Result<Self> {
        Self::new(rows_to_tensor(rows, shape, vb.device())?, trainable, vb, name)
    }

    pub fn tensor(&self) -> &Tensor {
        match self {
            Self::Fixed(t) => t,
            Self::Trainable(v) => v.as_tensor(),
        }
    }

    pub fn var(&self) -> Option<&Var> {
        match self {
            Self::Fixed(_) => None,
            Self::Trainable(v) => Some(v),
        }
    }
}

pub(crate) fn rows_to_tensor(rows: &[Vec<f64>], shape: &[usize], device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
    Tensor::from_vec(data, shape, device)
}

/// Accept `[B, S]` or `[B, 1, S]` waveforms and return `[B, 1, S]`.
pub(crate) fn as_signal(xs: &Tensor) -> Result<Tensor> {
    match xs.dims() {
        [_, _] => xs.unsqueeze(1),
        [_, 1, _] => Ok(xs.clone()),
        dims => bail!("expected a [batch, samples] or [batch, 1, samples] waveform, got {dims:?}"),
    }
}

/// Reflect-pad the last axis.
pub(crate) fn reflect_pad(xs: &Tensor, left: usize, right: usize) -> Result<Tensor> {
    let len = xs.dim(D::Minus1)?;
    if len <= left.max(right) {
        bail!(
            "waveform of {len} samples is too short for a reflect pad of {}",
            left.max(right)
        );
    }
    let idx: Vec<u32> = reflect_indices(len, left, right)
        .map(|i| i as u32)
        .collect();
    let idx = Tensor::from_vec(idx, left + len + right, xs.device())?;
    xs.contiguous()?.index_select(&idx, D::Minus1)
}

/// Convolve with stacked `[2·bins, 1, K]` kernels and split into (re, im).
pub(crate) fn complex_conv(
    signal: &Tensor,
    kernel: &Tensor,
    bins: usize,
    hop: usize,
) -> Result<(Tensor, Tensor)> {
    let out = signal.conv1d(kernel, 0, hop, 1, 1)?;
    Ok((out.narrow(1, 0, bins)?, out.narrow(1, bins, bins)?))
}

/// `|z|` from real and imaginary parts.
pub(crate) fn magnitude(re: &Tensor, im: &Tensor, trainable: bool) -> Result<Tensor> {
    let power = (re.sqr()? + im.sqr()?)?;
    if trainable {
        (power + TRAINABLE_EPS)?.sqrt()
    } else {
        power.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_reflect_pad_tensor() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[[1f32, 2., 3., 4., 5.]]], &dev).unwrap();
        let padded = reflect_pad(&x, 2, 2).unwrap();
        let vals: Vec<f32> = padded.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(vals, vec![3., 2., 1., 2., 3., 4., 5., 4., 3.]);
    }

    #[test]
    fn test_reflect_pad_too_short() {
        let x = Tensor::zeros((1, 1, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(reflect_pad(&x, 4, 4).is_err());
    }

    #[test]
    fn test_as_signal_shapes() {
        let dev = Device::Cpu;
        let flat = Tensor::zeros((2, 10), DType::F32, &dev).unwrap();
        assert_eq!(as_signal(&flat).unwrap().dims(), &[2, 1, 10]);
        let stereo = Tensor::zeros((2, 2, 10), DType::F32, &dev).unwrap();
        assert!(as_signal(&stereo).is_err());
    }

    #[test]
    fn test_trainable_kernel_is_registered_and_seeded() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let init = Tensor::new(&[[[1f32, 2., 3.]], [[4., 5., 6.]]], &dev).unwrap();

        let fixed = SpectralKernel::new(init.clone(), false, &vb, "fixed").unwrap();
        assert!(fixed.var().is_none());
        assert!(!varmap.data().lock().unwrap().contains_key("fixed"));

        let k = SpectralKernel::new(init, true, &vb, "kernel").unwrap();
        let var = k.var().unwrap();
        let stored = varmap.data().lock().unwrap()["kernel"].clone();
        let values: Vec<f32> = stored.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![1., 2., 3., 4., 5., 6.]);

        // The model's kernel and the map entry are the same parameter.
        var.set(&var.ones_like().unwrap()).unwrap();
        let sum: f32 = stored.sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(sum, 6.0);
    }

    #[test]
    fn test_trainable_kernel_keeps_existing_value() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let init = Tensor::ones((2, 1, 2), DType::F32, &dev).unwrap();
        SpectralKernel::new(init.clone(), true, &vb, "kernel").unwrap();
        varmap
            .data()
            .lock()
            .unwrap()["kernel"]
            .set(&init.zeros_like().unwrap())
            .unwrap();

        let again = SpectralKernel::new(init, true, &vb, "kernel").unwrap();
        let sum: f32 = again.tensor().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(sum, 0.0);
    }
}
