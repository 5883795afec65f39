//! Convolution blocks and pooling helpers shared by the feature extractors.
//!
//! - [`ConvBlock1d`] — conv → (max-pool) → batch-norm → (dropout) → ReLU
//! - [`ConvBlock2d`] — conv → batch-norm → avg-pool → channel dropout → ReLU
//!
//! Parameters are named by their position in the extractor's layer list, so
//! a block starting at index `i` stores its conv under `i` and its
//! batch-norm under the index that follows the optional pooling layer.

use candle_core::{D, Result, Tensor};
use candle_nn::{
    BatchNorm, BatchNormConfig, Conv1d, Conv1dConfig, Conv2d, Dropout, ModuleT, VarBuilder,
};

use crate::config::{Conv1dStage, Conv2dStage};

/// Average-pool the last axis to exactly `output_size` bins.
///
/// Bin `i` covers `[floor(i·L/n), ceil((i+1)·L/n))`, so bins overlap when
/// `L` is not a multiple of `n` and repeat inputs when `L < n`.
pub fn adaptive_avg_pool1d(xs: &Tensor, output_size: usize) -> Result<Tensor> {
    let len = xs.dim(D::Minus1)?;
    if len == output_size {
        return Ok(xs.clone());
    }
    let mut bins = Vec::with_capacity(output_size);
    for i in 0..output_size {
        let start = i * len / output_size;
        let end = ((i + 1) * len).div_ceil(output_size);
        bins.push(xs.narrow(D::Minus1, start, end - start)?.mean_keepdim(D::Minus1)?);
    }
    Tensor::cat(&bins, D::Minus1)
}

/// Zero whole channels of a `[B, C, H, W]` map with probability `p`.
pub fn channel_dropout(xs: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if !train || p == 0.0 {
        return Ok(xs.clone());
    }
    let (b, c, _, _) = xs.dims4()?;
    let rand = Tensor::rand(0f32, 1f32, (b, c, 1, 1), xs.device())?;
    let drop_p = Tensor::new(p, xs.device())?.broadcast_as((b, c, 1, 1))?;
    let keep = (rand.ge(&drop_p)?.to_dtype(xs.dtype())? * (1.0 / (1.0 - p as f64)))?;
    xs.broadcast_mul(&keep)
}

fn max_pool1d(xs: &Tensor, kernel: usize) -> Result<Tensor> {
    xs.unsqueeze(2)?
        .max_pool2d_with_stride((1, kernel), (1, kernel))?
        .squeeze(2)
}

/// One 1-D extractor stage.
#[derive(Debug, Clone)]
pub struct ConvBlock1d {
    conv: Conv1d,
    max_pool: Option<usize>,
    norm: BatchNorm,
    dropout: Option<Dropout>,
}

impl ConvBlock1d {
    /// `first` is the layer index of the convolution within `vb`.
    pub fn new(
        stage: &Conv1dStage,
        in_channels: usize,
        dropout: f64,
        first: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv1dConfig {
            padding: stage.padding,
            stride: stage.stride,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(
            in_channels,
            stage.out_channels,
            stage.kernel_size,
            cfg,
            vb.pp(first),
        )?;
        let bn = first + 1 + usize::from(stage.max_pool.is_some());
        let norm = candle_nn::batch_norm(stage.out_channels, BatchNormConfig::default(), vb.pp(bn))?;
        Ok(Self {
            conv,
            max_pool: stage.max_pool,
            norm,
            dropout: stage.dropout.then(|| Dropout::new(dropout as f32)),
        })
    }
}

impl ModuleT for ConvBlock1d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = xs.apply(&self.conv)?;
        if let Some(k) = self.max_pool {
            h = max_pool1d(&h, k)?;
        }
        h = h.apply_t(&self.norm, train)?;
        if let Some(dropout) = &self.dropout {
            h = dropout.forward(&h, train)?;
        }
        h.relu()
    }
}

/// One 2-D extractor stage.
#[derive(Debug, Clone)]
pub struct ConvBlock2d {
    conv: Conv2d,
    norm: BatchNorm,
    pool_kernel: usize,
    pool_stride: (usize, usize),
    dropout: f32,
}

impl ConvBlock2d {
    /// `first` is the layer index of the convolution within `vb`.
    pub fn new(
        stage: &Conv2dStage,
        in_channels: usize,
        dropout: f64,
        first: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv = candle_nn::conv2d(
            in_channels,
            stage.out_channels,
            stage.kernel_size,
            Default::default(),
            vb.pp(first),
        )?;
        let norm = candle_nn::batch_norm(stage.out_channels, BatchNormConfig::default(), vb.pp(first + 1))?;
        Ok(Self {
            conv,
            norm,
            pool_kernel: stage.pool_kernel,
            pool_stride: stage.pool_stride,
            dropout: dropout as f32,
        })
    }
}

impl ModuleT for ConvBlock2d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let h = xs
            .apply(&self.conv)?
            .apply_t(&self.norm, train)?
            .avg_pool2d_with_stride((self.pool_kernel, self.pool_kernel), self.pool_stride)?;
        channel_dropout(&h, self.dropout, train)?.relu()
    }
}
