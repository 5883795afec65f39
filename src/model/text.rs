//! Lyrics encoding: a frozen pretrained text encoder followed by an LSTM.
//!
//! [`BertTextEncoder`] wraps `bert-base-uncased` and returns detached
//! last-layer hidden states, so no gradient ever reaches the pretrained
//! weights. [`LyricsEncoder`] runs an LSTM over those states and keeps the
//! output at each example's last real token.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;

use super::sequence::StackedLstm;
use crate::config::{LyricsOverflow, RecurrentConfig};
use crate::error::TokenizerError;
use crate::{Error, Result};

/// Hub repository of the default lyrics encoder.
pub const DEFAULT_TEXT_MODEL: &str = "bert-base-uncased";

/// Token-level embeddings of a batch of texts.
#[derive(Debug, Clone)]
pub struct TextEncoding {
    /// `[B, T, H]`, padded to the longest text and detached from any graph.
    pub embeddings: Tensor,
    /// Number of real (non-padding) tokens per text, special tokens included.
    pub lengths: Vec<usize>,
}

/// A frozen text encoder.
pub trait TextEncoder: Send + Sync {
    /// Width `H` of every token embedding.
    fn hidden_size(&self) -> usize;

    fn encode(&self, texts: &[String], device: &Device) -> Result<TextEncoding>;
}

/// Apply the overflow policy to one tokenized text.
///
/// Truncation keeps the first `max_len - 1` tokens followed by the input's
/// final token, which is the `[SEP]` marker for BERT-style tokenizers.
pub fn fit_to_length(
    mut ids: Vec<u32>,
    max_len: usize,
    policy: LyricsOverflow,
    index: usize,
) -> Result<Vec<u32>> {
    if ids.len() <= max_len {
        return Ok(ids);
    }
    match policy {
        LyricsOverflow::Reject => Err(Error::Tokenizer(TokenizerError(format!(
            "lyrics {index} has {} tokens, the text encoder accepts at most {max_len}",
            ids.len()
        )))),
        LyricsOverflow::Truncate => {
            tracing::warn!(
                index,
                tokens = ids.len(),
                max_len,
                "truncating lyrics to the text encoder's length"
            );
            let last = ids[ids.len() - 1];
            ids.truncate(max_len.saturating_sub(1));
            if max_len > 0 {
                ids.push(last);
            }
            Ok(ids)
        }
    }
}

/// Right-pad token sequences to a common length.
///
/// Returns flat `(ids, mask)` buffers of `B · T` entries, the per-text
/// lengths and `T`.
pub fn pad_batch(sequences: &[Vec<u32>], pad_id: u32) -> (Vec<u32>, Vec<u32>, Vec<usize>, usize) {
    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(sequences.len() * max_len);
    let mut mask = Vec::with_capacity(sequences.len() * max_len);
    let mut lengths = Vec::with_capacity(sequences.len());
    for seq in sequences {
        ids.extend_from_slice(seq);
        ids.extend(std::iter::repeat_n(pad_id, max_len - seq.len()));
        mask.extend(std::iter::repeat_n(1, seq.len()));
        mask.extend(std::iter::repeat_n(0, max_len - seq.len()));
        lengths.push(seq.len());
    }
    (ids, mask, lengths, max_len)
}

/// Pretrained BERT used as a frozen lyrics encoder.
pub struct BertTextEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    hidden_size: usize,
    max_len: usize,
    pad_id: u32,
    overflow: LyricsOverflow,
}

impl BertTextEncoder {
    pub fn new(
        config: &BertConfig,
        mut tokenizer: Tokenizer,
        overflow: LyricsOverflow,
        vb: VarBuilder,
    ) -> Result<Self> {
        let model = BertModel::load(vb, config)?;
        // Padding and truncation are applied per batch in `encode`.
        tokenizer.with_padding(None);
        tokenizer.with_truncation(None)?;
        let pad_id = tokenizer.token_to_id("[PAD]").unwrap_or(0);
        Ok(Self {
            model,
            tokenizer,
            hidden_size: config.hidden_size,
            max_len: config.max_position_embeddings,
            pad_id,
            overflow,
        })
    }

    /// Load from a directory holding `config.json`, `tokenizer.json` and
    /// `model.safetensors`.
    pub fn from_dir(dir: impl AsRef<Path>, overflow: LyricsOverflow, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_files(
            &dir.join("config.json"),
            &dir.join("tokenizer.json"),
            &dir.join("model.safetensors"),
            overflow,
            device,
        )
    }

    /// Download (or reuse the cached copy of) a Hub repository.
    pub fn from_hub(repo_id: &str, overflow: LyricsOverflow, device: &Device) -> Result<Self> {
        let api = Api::new()?;
        let repo = api.model(repo_id.to_string());
        tracing::info!(repo_id, "fetching text encoder");
        let config = repo.get("config.json")?;
        let tokenizer = repo.get("tokenizer.json")?;
        let weights = repo.get("model.safetensors")?;
        Self::from_files(&config, &tokenizer, &weights, overflow, device)
    }

    fn from_files(
        config: &Path,
        tokenizer: &Path,
        weights: &Path,
        overflow: LyricsOverflow,
        device: &Device,
    ) -> Result<Self> {
        let config: BertConfig = serde_json::from_str(&std::fs::read_to_string(config)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer)?;
        // SAFETY: the weights file is only read, and is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
        tracing::info!(
            hidden = config.hidden_size,
            layers = config.num_hidden_layers,
            max_len = config.max_position_embeddings,
            "loaded text encoder"
        );
        Self::new(&config, tokenizer, overflow, vb)
    }
}

impl TextEncoder for BertTextEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn encode(&self, texts: &[String], device: &Device) -> Result<TextEncoding> {
        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true)?;
        let sequences = encodings
            .into_iter()
            .enumerate()
            .map(|(i, e)| fit_to_length(e.get_ids().to_vec(), self.max_len, self.overflow, i))
            .collect::<Result<Vec<_>>>()?;

        let (ids, mask, lengths, max_len) = pad_batch(&sequences, self.pad_id);
        let batch = sequences.len();
        let input_ids = Tensor::from_vec(ids, (batch, max_len), device)?;
        let attention_mask = Tensor::from_vec(mask, (batch, max_len), device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        Ok(TextEncoding {
            embeddings: hidden.detach(),
            lengths,
        })
    }
}

/// LSTM over text-encoder states, read at the last real token.
#[derive(Debug, Clone)]
pub struct LyricsEncoder {
    lstm: StackedLstm,
}

impl LyricsEncoder {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = RecurrentConfig {
            hidden_size,
            num_layers: 1,
        };
        Ok(Self {
            lstm: StackedLstm::new(input_size, cfg, vb)?,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.lstm.hidden_size()
    }

    /// `[B, T, H]` embeddings → `[B, hidden]`.
    pub fn forward(&self, encoding: &TextEncoding) -> Result<Tensor> {
        self.lstm.at_lengths(&encoding.embeddings, &encoding.lengths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn word_tokenizer() -> Tokenizer {
        serde_json::json!({
            "version": "1.0",
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": {
                "type": "BertProcessing",
                "sep": ["[SEP]", 3],
                "cls": ["[CLS]", 2]
            },
            "model": {
                "type": "WordLevel",
                "vocab": {
                    "[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3,
                    "la": 4, "love": 5, "night": 6
                },
                "unk_token": "[UNK]"
            }
        })
        .to_string()
        .parse()
        .unwrap()
    }

    fn tiny_bert(max_position_embeddings: usize) -> BertConfig {
        BertConfig {
            vocab_size: 7,
            hidden_size: 8,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 16,
            max_position_embeddings,
            ..BertConfig::default()
        }
    }

    #[test]
    fn test_fit_to_length_keeps_short_input() {
        let ids = vec![101, 7, 8, 102];
        assert_eq!(
            fit_to_length(ids.clone(), 4, LyricsOverflow::Reject, 0).unwrap(),
            ids
        );
    }

    #[test]
    fn test_fit_to_length_truncates_and_keeps_end_marker() {
        let ids = vec![101, 1, 2, 3, 4, 5, 102];
        let out = fit_to_length(ids, 4, LyricsOverflow::Truncate, 0).unwrap();
        assert_eq!(out, vec![101, 1, 2, 102]);
    }

    #[test]
    fn test_fit_to_length_rejects_overflow() {
        let ids = vec![101, 1, 2, 3, 102];
        let err = fit_to_length(ids, 3, LyricsOverflow::Reject, 2).unwrap_err();
        assert!(matches!(err, Error::Tokenizer(_)));
        assert!(err.to_string().contains("lyrics 2"), "{err}");
    }

    #[test]
    fn test_pad_batch() {
        let (ids, mask, lengths, max_len) = pad_batch(&[vec![1, 2, 3], vec![4]], 0);
        assert_eq!(max_len, 3);
        assert_eq!(ids, vec![1, 2, 3, 4, 0, 0]);
        assert_eq!(mask, vec![1, 1, 1, 1, 0, 0]);
        assert_eq!(lengths, vec![3, 1]);
    }

    #[test]
    fn test_lyrics_encoder_output_width() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let encoder = LyricsEncoder::new(16, 10, vb).unwrap();
        let encoding = TextEncoding {
            embeddings: Tensor::randn(0f32, 1.0, (2, 6, 16), &dev).unwrap(),
            lengths: vec![6, 2],
        };
        assert_eq!(encoder.forward(&encoding).unwrap().dims(), &[2, 10]);
        assert_eq!(encoder.hidden_size(), 10);
    }

    #[test]
    fn test_bert_encoder_pads_batch() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let encoder =
            BertTextEncoder::new(&tiny_bert(16), word_tokenizer(), LyricsOverflow::Reject, vb).unwrap();
        assert_eq!(encoder.hidden_size(), 8);

        let texts = vec!["la la love".to_string(), "night".to_string()];
        let encoding = encoder.encode(&texts, &dev).unwrap();
        assert_eq!(encoding.embeddings.dims(), &[2, 5, 8]);
        assert_eq!(encoding.lengths, vec![5, 3]);

        // Output is detached, so nothing flows back into the pretrained weights.
        let grads = encoding.embeddings.sum_all().unwrap().backward().unwrap();
        for var in varmap.all_vars() {
            assert!(grads.get(var.as_tensor()).is_none());
        }
    }

    #[test]
    fn test_bert_encoder_overflow_policy() {
        let dev = Device::Cpu;
        let texts = vec!["la la love".to_string()];

        let vb = VarBuilder::zeros(DType::F32, &dev);
        let truncate =
            BertTextEncoder::new(&tiny_bert(4), word_tokenizer(), LyricsOverflow::Truncate, vb).unwrap();
        let encoding = truncate.encode(&texts, &dev).unwrap();
        assert_eq!(encoding.lengths, vec![4]);
        assert_eq!(encoding.embeddings.dims(), &[1, 4, 8]);

        let vb = VarBuilder::zeros(DType::F32, &dev);
        let reject =
            BertTextEncoder::new(&tiny_bert(4), word_tokenizer(), LyricsOverflow::Reject, vb).unwrap();
        let err = reject.encode(&texts, &dev).unwrap_err();
        assert!(matches!(err, Error::Tokenizer(_)), "{err}");
    }
}
