//! Music emotion CLI.
//!
//! Runs one of the two models over a mono (or down-mixed) WAV clip and
//! prints a one-line JSON result to stdout:
//!
//! ```json
//! {"model":"classify","logits":[...],"probabilities":[...],"class":2}
//! {"model":"regress","mean":[0.1,-0.3],"scale":[0.8,0.6]}
//! ```
//!
//! Without `--weights` the layers are randomly initialised, which is only
//! useful for checking shapes and timing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use music_emotion_rs::{
    audio::read_wav_mono,
    config::{CatModelConfig, StatModelConfig},
    model::{
        AudioLyricsClassifier, BertTextEncoder, CatBatch, SpectralStatRegressor, StatBatch,
        text::DEFAULT_TEXT_MODEL,
    },
};

#[derive(Parser, Debug)]
#[command(
    name = "music-emotion",
    about = "Multimodal music emotion models",
    long_about = "Classify a clip into emotion quadrants from audio and lyrics, or\n\
                  regress the mean and scale of its affective statistics from audio.\n\
                  A JSON result line is printed to stdout."
)]
struct Args {
    /// Model configuration JSON. Missing keys take their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Trained model weights (safetensors).
    #[arg(long, global = true)]
    weights: Option<PathBuf>,

    /// Run on the CPU even when a GPU is available.
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Emotion-quadrant logits from audio and lyrics.
    Classify {
        /// Input WAV file.
        #[arg(long, short = 'a')]
        audio: PathBuf,

        /// Lyrics text.
        #[arg(long, short = 'l', conflicts_with = "lyrics_file")]
        lyrics: Option<String>,

        /// File holding the lyrics.
        #[arg(long)]
        lyrics_file: Option<PathBuf>,

        /// Local directory with config.json, tokenizer.json and
        /// model.safetensors for the text encoder. Defaults to downloading
        /// bert-base-uncased from the HuggingFace Hub.
        #[arg(long)]
        text_model: Option<PathBuf>,
    },
    /// Mean and scale of the affective statistics from audio.
    Regress {
        /// Input WAV file.
        #[arg(long, short = 'a')]
        audio: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    tracing::info!("Using device: {:?}", device);

    let varmap = VarMap::new();
    let vb = match &args.weights {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading weights");
            // SAFETY: the weights file is only read, and is not modified while mapped.
            unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device)? }
        }
        None => {
            tracing::warn!("no --weights given, using randomly initialised layers");
            VarBuilder::from_varmap(&varmap, DType::F32, &device)
        }
    };

    match args.command {
        Command::Classify {
            audio,
            lyrics,
            lyrics_file,
            text_model,
        } => {
            let cfg = match &args.config {
                Some(path) => CatModelConfig::from_json_file(path)?,
                None => CatModelConfig::default(),
            };
            let lyrics = match (lyrics, lyrics_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read lyrics from {}", path.display()))?,
                (None, None) => String::new(),
            };

            let text_encoder = match text_model {
                Some(dir) => BertTextEncoder::from_dir(dir, cfg.lyrics_overflow, &device)?,
                None => BertTextEncoder::from_hub(DEFAULT_TEXT_MODEL, cfg.lyrics_overflow, &device)?,
            };
            let model = AudioLyricsClassifier::new(&cfg, Arc::new(text_encoder), vb)
                .map_err(|e| anyhow::anyhow!("failed to build classifier: {e}"))?;

            let samples = load_clip(&audio, cfg.spectral.sample_rate)?;
            let batch = CatBatch::from_waveforms(&[samples], vec![lyrics], &device)?;
            let logits = model
                .forward(&batch)
                .map_err(|e| anyhow::anyhow!("classification failed: {e}"))?;
            let probabilities = candle_nn::ops::softmax(&logits, 1)?;

            let logits = first_row(&logits)?;
            let probabilities = first_row(&probabilities)?;
            let class = probabilities
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map_or(0, |(i, _)| i);
            println!(
                "{}",
                serde_json::json!({
                    "model": "classify",
                    "logits": logits,
                    "probabilities": probabilities,
                    "class": class,
                })
            );
        }
        Command::Regress { audio } => {
            let cfg = match &args.config {
                Some(path) => StatModelConfig::from_json_file(path)?,
                None => StatModelConfig::default(),
            };
            let model = SpectralStatRegressor::new(&cfg, vb)
                .map_err(|e| anyhow::anyhow!("failed to build regressor: {e}"))?;

            let samples = load_clip(&audio, cfg.spectral.sample_rate)?;
            let batch = StatBatch::from_waveforms(&[samples], &cfg.spectral, &device)?;
            let output = model
                .forward(&batch)
                .map_err(|e| anyhow::anyhow!("regression failed: {e}"))?;
            let (mean, scale) = SpectralStatRegressor::split_output(&output)?;
            println!(
                "{}",
                serde_json::json!({
                    "model": "regress",
                    "mean": first_row(&mean)?,
                    "scale": first_row(&scale)?,
                })
            );
        }
    }

    Ok(())
}

/// Read a WAV clip as mono samples at the model's sample rate.
fn load_clip(path: &Path, sample_rate: u32) -> anyhow::Result<Vec<f32>> {
    let (samples, sr) = read_wav_mono(path)
        .with_context(|| format!("failed to read audio from {}", path.display()))?;
    if sr != sample_rate {
        anyhow::bail!(
            "{} is sampled at {sr} Hz, the model expects {sample_rate} Hz",
            path.display()
        );
    }
    tracing::info!(
        samples = samples.len(),
        seconds = samples.len() as f64 / sr as f64,
        "loaded clip"
    );
    Ok(samples)
}

fn first_row(t: &Tensor) -> anyhow::Result<Vec<f32>> {
    Ok(t.get(0)?.to_vec1()?)
}
