//! Fully-connected fusion heads.

use candle_core::{Module, Tensor};
use candle_nn::{Dropout, Linear, ModuleT, VarBuilder, linear};

use crate::Result;
use crate::config::ScaleActivation;

/// Added to every scale activation so the output is strictly positive.
pub const SCALE_EPS: f64 = 1e-6;

/// Maps arbitrary reals to strictly positive reals.
#[derive(Debug, Clone, Copy)]
pub struct PositiveActivation(pub ScaleActivation);

impl Module for PositiveActivation {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self.0 {
            ScaleActivation::ShiftedElu => xs.elu(1.0)? + (1.0 + SCALE_EPS),
            ScaleActivation::Softplus => {
                // relu(x) + ln(1 + e^-|x|) does not overflow for large |x|.
                let tail = (xs.abs()?.neg()?.exp()? + 1.0)?.log()?;
                (xs.relu()? + tail)? + SCALE_EPS
            }
            ScaleActivation::Sigmoid { max } => {
                (candle_nn::ops::sigmoid(xs)? * max)? + SCALE_EPS
            }
        }
    }
}

/// Classification head: `in → 512 → 128 → num_classes`, logits out.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    fc1: Linear,
    dropout: Dropout,
    fc2: Linear,
    fc3: Linear,
}

impl ClassifierHead {
    pub fn new(in_features: usize, num_classes: usize, dropout: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(in_features, 512, vb.pp("0"))?,
            dropout: Dropout::new(dropout as f32),
            fc2: linear(512, 128, vb.pp("3"))?,
            fc3: linear(128, num_classes, vb.pp("5"))?,
        })
    }
}

impl ModuleT for ClassifierHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let h = xs.apply(&self.fc1)?.relu()?;
        let h = self.dropout.forward(&h, train)?;
        h.apply(&self.fc2)?.relu()?.apply(&self.fc3)
    }
}

/// Mean/scale head: a shared trunk feeding a 2-wide mean projection and a
/// 2-wide positive scale projection, concatenated to `[B, 4]`.
#[derive(Debug, Clone)]
pub struct MeanScaleHead {
    fc1: Linear,
    dropout: Dropout,
    fc2: Linear,
    mean: Linear,
    scale: Linear,
    activation: PositiveActivation,
}

impl MeanScaleHead {
    pub fn new(
        in_features: usize,
        dropout: f64,
        activation: ScaleActivation,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            fc1: linear(in_features, 512, vb.pp("fc.0"))?,
            dropout: Dropout::new(dropout as f32),
            fc2: linear(512, 128, vb.pp("fc.3"))?,
            mean: linear(128, 2, vb.pp("fc_mean.0"))?,
            scale: linear(128, 2, vb.pp("fc_std.0"))?,
            activation: PositiveActivation(activation),
        })
    }
}

impl ModuleT for MeanScaleHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let h = xs.apply(&self.fc1)?;
        let h = self.dropout.forward(&h, train)?.relu()?;
        let h = h.apply(&self.fc2)?.relu()?;
        let mean = h.apply(&self.mean)?;
        let scale = h.apply(&self.scale)?.apply(&self.activation)?;
        Tensor::cat(&[mean, scale], 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn extremes(dev: &Device) -> Tensor {
        Tensor::new(&[-1e4f32, -50.0, -1.0, 0.0, 1.0, 50.0, 1e4], dev).unwrap()
    }

    #[test]
    fn test_scale_activations_are_strictly_positive() {
        let dev = Device::Cpu;
        for act in [
            ScaleActivation::ShiftedElu,
            ScaleActivation::Softplus,
            ScaleActivation::Sigmoid { max: 3.0 },
        ] {
            let out: Vec<f32> = PositiveActivation(act)
                .forward(&extremes(&dev))
                .unwrap()
                .to_vec1()
                .unwrap();
            for v in out {
                assert!(v > 0.0 && v.is_finite(), "{act:?} gave {v}");
            }
        }
    }

    #[test]
    fn test_sigmoid_scale_is_bounded() {
        let dev = Device::Cpu;
        let out: Vec<f32> = PositiveActivation(ScaleActivation::Sigmoid { max: 2.0 })
            .forward(&extremes(&dev))
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(out.iter().all(|&v| v <= 2.0 + 1e-5));
    }

    #[test]
    fn test_softplus_matches_closed_form() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[-2f32, 0.0, 3.0], &dev).unwrap();
        let out: Vec<f32> = PositiveActivation(ScaleActivation::Softplus)
            .forward(&x)
            .unwrap()
            .to_vec1()
            .unwrap();
        for (v, x) in out.iter().zip([-2f32, 0.0, 3.0]) {
            let expected = (1.0 + x.exp()).ln();
            assert!((v - expected).abs() < 1e-5, "{v} vs {expected}");
        }
    }

    #[test]
    fn test_classifier_head_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let head = ClassifierHead::new(30, 4, 0.25, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (5, 30), &dev).unwrap();
        assert_eq!(head.forward_t(&x, true).unwrap().dims(), &[5, 4]);
    }

    #[test]
    fn test_mean_scale_head_columns() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let head = MeanScaleHead::new(24, 0.1, ScaleActivation::ShiftedElu, vb).unwrap();
        let x = (Tensor::randn(0f32, 1.0, (6, 24), &dev).unwrap() * 100.0).unwrap();
        let out = head.forward_t(&x, false).unwrap();
        assert_eq!(out.dims(), &[6, 4]);
        let rows: Vec<Vec<f32>> = out.to_vec2().unwrap();
        for row in rows {
            assert!(row[2] > 0.0 && row[3] > 0.0, "{row:?}");
        }
    }
}
