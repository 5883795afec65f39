//! Stacked LSTM encoders.

use candle_core::{IndexOp, Tensor};
use candle_nn::rnn::{LSTM, LSTMConfig, LSTMState, RNN};
use candle_nn::VarBuilder;

use super::extractor::to_sequence;
use crate::config::RecurrentConfig;
use crate::{Error, Result};

/// Unidirectional LSTM with `num_layers` layers, batch-first.
///
/// Weights follow the PyTorch layout: `weight_ih_l{k}`, `weight_hh_l{k}`,
/// `bias_ih_l{k}`, `bias_hh_l{k}`.
#[derive(Debug, Clone)]
pub struct StackedLstm {
    layers: Vec<LSTM>,
    input_size: usize,
    hidden_size: usize,
}

impl StackedLstm {
    pub fn new(input_size: usize, cfg: RecurrentConfig, vb: VarBuilder) -> Result<Self> {
        let layers = (0..cfg.num_layers)
            .map(|layer_idx| {
                let input = if layer_idx == 0 { input_size } else { cfg.hidden_size };
                let lstm_cfg = LSTMConfig {
                    layer_idx,
                    ..Default::default()
                };
                candle_nn::lstm(input, cfg.hidden_size, lstm_cfg, vb.clone())
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            input_size,
            hidden_size: cfg.hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Per-step outputs of the top layer: `[B, T, F]` → `[B, T, hidden]`.
    pub fn outputs(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, steps, features) = xs.dims3()?;
        if features != self.input_size {
            return Err(Error::Shape(format!(
                "recurrent encoder expects {} features per step, got {features}",
                self.input_size
            )));
        }
        if steps == 0 {
            return Err(Error::Shape("recurrent encoder got an empty sequence".into()));
        }
        let mut h = xs.clone();
        for layer in &self.layers {
            let states: Vec<LSTMState> = layer.seq(&h)?;
            h = layer.states_to_tensor(&states)?;
        }
        Ok(h)
    }

    /// Top-layer output at the final step, `[B, hidden]`.
    pub fn last_step(&self, xs: &Tensor) -> Result<Tensor> {
        let outputs = self.outputs(xs)?;
        let steps = outputs.dim(1)?;
        Ok(outputs.i((.., steps - 1))?)
    }

    /// Top-layer output at step `lengths[b] - 1` of each example, `[B, hidden]`.
    pub fn at_lengths(&self, xs: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        let outputs = self.outputs(xs)?;
        let (batch, steps, _) = outputs.dims3()?;
        if lengths.len() != batch {
            return Err(Error::Shape(format!(
                "{} sequence lengths for a batch of {batch}",
                lengths.len()
            )));
        }
        let rows = lengths
            .iter()
            .enumerate()
            .map(|(b, &len)| outputs.i((b, len.clamp(1, steps) - 1)))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Tensor::stack(&rows, 0)?)
    }
}

/// Model 2 sequence encoder over a 2-D extractor output.
///
/// `[B, C, H, W]` is read as `W` time steps of `C·H` features and reduced to
/// the top-layer output at the last step, `[B, hidden]`.
#[derive(Debug, Clone)]
pub struct SequenceEncoder {
    lstm: StackedLstm,
}

impl SequenceEncoder {
    pub fn new(input_size: usize, hidden_size: usize, num_layers: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = RecurrentConfig {
            hidden_size,
            num_layers,
        };
        Ok(Self {
            lstm: StackedLstm::new(input_size, cfg, vb)?,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.lstm.hidden_size()
    }

    pub fn forward(&self, fmap: &Tensor) -> Result<Tensor> {
        self.lstm.last_step(&to_sequence(fmap)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn cfg(hidden_size: usize, num_layers: usize) -> RecurrentConfig {
        RecurrentConfig {
            hidden_size,
            num_layers,
        }
    }

    #[test]
    fn test_stacked_lstm_shapes() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let lstm = StackedLstm::new(12, cfg(7, 2), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (3, 5, 12), &dev).unwrap();
        assert_eq!(lstm.outputs(&x).unwrap().dims(), &[3, 5, 7]);
        assert_eq!(lstm.last_step(&x).unwrap().dims(), &[3, 7]);
    }

    #[test]
    fn test_stacked_lstm_parameter_names() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        StackedLstm::new(4, cfg(3, 2), vb.pp("lstm")).unwrap();
        let data = varmap.data().lock().unwrap();
        for name in ["weight_ih_l0", "weight_hh_l1", "bias_ih_l1", "bias_hh_l0"] {
            assert!(data.contains_key(&format!("lstm.{name}")), "missing {name}");
        }
        assert_eq!(data["lstm.weight_ih_l1"].dims(), &[12, 3]);
    }

    #[test]
    fn test_at_lengths_ignores_padding() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let lstm = StackedLstm::new(4, cfg(6, 1), vb).unwrap();

        let real = Tensor::randn(0f32, 1.0, (1, 3, 4), &dev).unwrap();
        let padding = Tensor::ones((1, 4, 4), DType::F32, &dev).unwrap();
        let padded = Tensor::cat(&[&real, &padding], 1).unwrap();

        let expected: Vec<f32> = lstm.last_step(&real).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let got: Vec<f32> = lstm
            .at_lengths(&padded, &[3])
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for (a, b) in got.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_wrong_feature_count_is_shape_error() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let lstm = StackedLstm::new(8, cfg(4, 1), vb).unwrap();
        let x = Tensor::zeros((2, 3, 9), DType::F32, &dev).unwrap();
        assert!(matches!(lstm.outputs(&x), Err(Error::Shape(_))));
    }

    #[test]
    fn test_sequence_encoder_reads_width_as_time() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let encoder = SequenceEncoder::new(8 * 3, 5, 2, vb).unwrap();
        let fmap = Tensor::randn(0f32, 1.0, (2, 8, 3, 11), &dev).unwrap();
        assert_eq!(encoder.forward(&fmap).unwrap().dims(), &[2, 5]);

        let wrong_height = Tensor::randn(0f32, 1.0, (2, 8, 4, 11), &dev).unwrap();
        assert!(matches!(encoder.forward(&wrong_height), Err(Error::Shape(_))));
    }
}
