//! Convolutional feature extractors.
//!
//! [`Extractor1d`] reduces a `[B, C, L]` signal or spectrogram to
//! `[B, C_out · n]` with adaptive average pooling, or leaves the time axis
//! alone for the model 2 front end. [`Extractor2d`] treats a `[B, H, W]`
//! spectrogram as a one-channel image and returns `[B, C_out, H', W']`.

use candle_core::{Tensor, D};
use candle_nn::{Dropout, ModuleT, VarBuilder};

use super::layers::{ConvBlock1d, ConvBlock2d, adaptive_avg_pool1d};
use crate::config::{Conv2dStage, Extractor1dConfig, Extractor2dConfig};
use crate::{Error, Result};

/// Stack of 1-D convolution stages.
#[derive(Debug, Clone)]
pub struct Extractor1d {
    name: &'static str,
    config: Extractor1dConfig,
    in_channels: usize,
    blocks: Vec<ConvBlock1d>,
    /// Pooled width; `None` returns the `[B, C, L']` map unchanged.
    adaptive_width: Option<usize>,
    trailing_dropout: Option<Dropout>,
}

impl Extractor1d {
    pub fn new(
        name: &'static str,
        config: &Extractor1dConfig,
        in_channels: usize,
        dropout: f64,
        adaptive_width: Option<usize>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut blocks = Vec::with_capacity(config.stages.len());
        let mut channels = in_channels;
        let mut layer = 0;
        for stage in &config.stages {
            blocks.push(ConvBlock1d::new(stage, channels, dropout, layer, vb.clone())?);
            channels = stage.out_channels;
            layer += stage.module_count();
        }
        Ok(Self {
            name,
            config: config.clone(),
            in_channels,
            blocks,
            adaptive_width,
            trailing_dropout: config.trailing_dropout.map(|p| Dropout::new(p as f32)),
        })
    }

    /// Flattened output width per example when adaptive pooling is on.
    pub fn output_width(&self) -> usize {
        self.config.out_channels() * self.adaptive_width.unwrap_or(1)
    }

    fn check_input(&self, xs: &Tensor) -> Result<()> {
        let (_, channels, len) = xs.dims3().map_err(|_| {
            Error::Shape(format!(
                "{}: expected [B, {}, L], got {:?}",
                self.name,
                self.in_channels,
                xs.dims()
            ))
        })?;
        if channels != self.in_channels {
            return Err(Error::Shape(format!(
                "{}: expected {} input channels, got {channels}",
                self.name, self.in_channels
            )));
        }
        if self.config.output_len(len).is_none() {
            return Err(Error::Shape(format!(
                "{}: {len} frames is too short, need at least {}",
                self.name,
                self.config.min_input_len()
            )));
        }
        Ok(())
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.check_input(xs)?;
        let mut h = xs.clone();
        for block in &self.blocks {
            h = block.forward_t(&h, train)?;
        }
        let Some(width) = self.adaptive_width else {
            return Ok(h);
        };
        let mut h = adaptive_avg_pool1d(&h, width)?;
        if let Some(dropout) = &self.trailing_dropout {
            h = dropout.forward(&h, train)?;
        }
        Ok(h.flatten_from(1)?)
    }
}

/// Stack of 2-D convolution stages over a one-channel feature map.
#[derive(Debug, Clone)]
pub struct Extractor2d {
    name: &'static str,
    config: Extractor2dConfig,
    input_height: usize,
    blocks: Vec<ConvBlock2d>,
}

impl Extractor2d {
    /// `first` is the layer index of the first convolution within `vb`.
    pub fn new(
        name: &'static str,
        config: &Extractor2dConfig,
        input_height: usize,
        dropout: f64,
        first: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut blocks = Vec::with_capacity(config.stages.len());
        let mut channels = 1;
        for (i, stage) in config.stages.iter().enumerate() {
            let layer = first + i * Conv2dStage::MODULE_COUNT;
            blocks.push(ConvBlock2d::new(stage, channels, dropout, layer, vb.clone())?);
            channels = stage.out_channels;
        }
        Ok(Self {
            name,
            config: config.clone(),
            input_height,
            blocks,
        })
    }

    /// Smallest width that survives every stage.
    pub fn min_width(&self) -> usize {
        (1..)
            .find(|&w| self.config.output_hw((self.input_height, w)).is_some())
            .unwrap_or(usize::MAX)
    }

    fn check_input(&self, xs: &Tensor) -> Result<()> {
        let (_, height, width) = xs.dims3().map_err(|_| {
            Error::Shape(format!(
                "{}: expected [B, {}, W], got {:?}",
                self.name,
                self.input_height,
                xs.dims()
            ))
        })?;
        if height != self.input_height {
            return Err(Error::Shape(format!(
                "{}: expected height {}, got {height}",
                self.name, self.input_height
            )));
        }
        if self.config.output_hw((height, width)).is_none() {
            return Err(Error::Shape(format!(
                "{}: width {width} is too short, need at least {}",
                self.name,
                self.min_width()
            )));
        }
        Ok(())
    }

    /// `[B, H, W]` → `[B, C_out, H', W']`.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.check_input(xs)?;
        let mut h = xs.unsqueeze(1)?;
        for block in &self.blocks {
            h = block.forward_t(&h, train)?;
        }
        Ok(h)
    }
}

/// Collapse a `[B, C, H, W]` map into a `[B, W, C·H]` sequence.
pub fn to_sequence(fmap: &Tensor) -> Result<Tensor> {
    let (b, c, h, w) = fmap.dims4()?;
    Ok(fmap
        .reshape((b, c * h, w))?
        .transpose(1, D::Minus1)?
        .contiguous()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Conv1dStage;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn pooled_config() -> Extractor1dConfig {
        Extractor1dConfig {
            stages: vec![
                Conv1dStage {
                    out_channels: 8,
                    kernel_size: 3,
                    stride: 1,
                    padding: 0,
                    max_pool: Some(2),
                    dropout: false,
                };
                2
            ],
            trailing_dropout: Some(0.5),
        }
    }

    #[test]
    fn test_extractor1d_flattens_to_channels_times_units() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let ex = Extractor1d::new("mel", &pooled_config(), 16, 0.25, Some(4), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (3, 16, 40), &dev).unwrap();
        let out = ex.forward_t(&x, true).unwrap();
        assert_eq!(out.dims(), &[3, 32]);
        assert_eq!(ex.output_width(), 32);
    }

    #[test]
    fn test_extractor1d_without_pooling_keeps_time_axis() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let cfg = pooled_config();
        let ex = Extractor1d::new("front", &cfg, 1, 0.1, None, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 1, 50), &dev).unwrap();
        let out = ex.forward_t(&x, false).unwrap();
        assert_eq!(out.dims(), &[2, 8, cfg.output_len(50).unwrap()]);
    }

    #[test]
    fn test_extractor1d_rejects_short_input() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let ex = Extractor1d::new("mfcc", &pooled_config(), 4, 0.1, Some(2), vb).unwrap();
        let x = Tensor::zeros((1, 4, 5), DType::F32, &dev).unwrap();
        let err = ex.forward_t(&x, false).unwrap_err();
        assert!(matches!(err, Error::Shape(_)), "{err}");
        assert!(err.to_string().contains("mfcc"));

        let wrong_channels = Tensor::zeros((1, 3, 64), DType::F32, &dev).unwrap();
        assert!(matches!(
            ex.forward_t(&wrong_channels, false),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_extractor_parameters_follow_layer_order() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mut cfg = pooled_config();
        cfg.stages[0].max_pool = None;
        cfg.stages[0].dropout = true;
        Extractor1d::new("audio", &cfg, 1, 0.1, Some(2), vb.pp("one")).unwrap();
        let two = Extractor2dConfig {
            stages: vec![
                Conv2dStage {
                    out_channels: 3,
                    kernel_size: 3,
                    pool_kernel: 3,
                    pool_stride: (1, 1),
                };
                2
            ],
        };
        Extractor2d::new("stft", &two, 12, 0.1, 1, vb.pp("two")).unwrap();

        let data = varmap.data().lock().unwrap();
        // conv, bn, dropout, relu | conv, max-pool, bn, relu
        assert_eq!(data["one.0.weight"].dims(), &[8, 1, 3]);
        assert_eq!(data["one.1.running_var"].dims(), &[8]);
        assert_eq!(data["one.4.weight"].dims(), &[8, 8, 3]);
        assert_eq!(data["one.6.weight"].dims(), &[8]);
        // Layer 0 is the channel lift, then five layers per stage.
        assert_eq!(data["two.1.weight"].dims(), &[3, 1, 3, 3]);
        assert_eq!(data["two.2.running_mean"].dims(), &[3]);
        assert_eq!(data["two.6.weight"].dims(), &[3, 3, 3, 3]);
        assert_eq!(data["two.7.bias"].dims(), &[3]);
    }

    #[test]
    fn test_extractor2d_shapes_and_sequence() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let cfg = Extractor2dConfig {
            stages: vec![
                Conv2dStage {
                    out_channels: 4,
                    kernel_size: 3,
                    pool_kernel: 3,
                    pool_stride: (2, 1),
                },
                Conv2dStage {
                    out_channels: 6,
                    kernel_size: 3,
                    pool_kernel: 3,
                    pool_stride: (2, 2),
                },
            ],
        };
        let ex = Extractor2d::new("stft", &cfg, 20, 0.1, 1, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 20, 30), &dev).unwrap();
        let out = ex.forward_t(&x, false).unwrap();
        let (h, w) = cfg.output_hw((20, 30)).unwrap();
        assert_eq!(out.dims(), &[2, 6, h, w]);

        let seq = to_sequence(&out).unwrap();
        assert_eq!(seq.dims(), &[2, w, 6 * h]);

        assert_eq!(ex.min_width(), 9);
        let short = Tensor::zeros((2, 20, 8), DType::F32, &dev).unwrap();
        assert!(matches!(ex.forward_t(&short, false), Err(Error::Shape(_))));
    }
}
