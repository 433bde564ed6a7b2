//! # Whisper Model Management
//!
//! Handles loading and running Whisper models using Candle-rs.
//!
//! ## Model Loading Process:
//! 1. Download model files from HuggingFace if not cached locally
//! 2. Load model weights, tokenizer, and mel filter bank
//! 3. Initialize model on the selected device (CPU/GPU)
//!
//! ## Decoding Policy:
//! Inference is tuned for latency on short clips: greedy single-hypothesis
//! decoding (no beam search, no best-of resampling), deterministic output,
//! no word-level timestamps, and a KV-cache reset between 30-second windows
//! so no window conditions on text from another one.

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use thiserror::Error;
use tokenizers::Tokenizer;

/// Upper bound on decoded tokens per 30-second window; matches Whisper's
/// decoder context for a single window without timestamps.
const MAX_DECODE_TOKENS: usize = 224;

/// HuggingFace repo carrying the precomputed 80-bin mel filter bank.
const MEL_FILTERS_REPO: &str = "FL33TW00D-HF/whisper-base";

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace model repository for this size.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Failure inside a model invocation. A closed set so the engine classifies
/// outcomes by pattern match instead of inspecting message text.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The tokenizer carries no token for the requested language code
    #[error("unsupported language code: {0}")]
    UnknownLanguage(String),

    /// Tensor/device/tokenizer failure while running the model
    #[error("inference failed: {0}")]
    Backend(String),
}

/// A loaded Whisper model bound to a device.
///
/// ## Thread Safety:
/// `transcribe_pcm` takes `&mut self` (the decoder KV cache is per-call
/// mutable state), so a shared instance must be wrapped in a lock; the
/// engine owns that decision.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
}

impl WhisperModel {
    /// Download (cached) and load a Whisper model from HuggingFace.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            }
            builder
                .build()
                .map_err(|e| anyhow!("Failed to create HuggingFace API client: {}", e))?
        };

        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let model_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let mel_repo = api.model(MEL_FILTERS_REPO.to_string());
        let mel_filename = mel_repo
            .get("melfilters.bytes")
            .await
            .map_err(|e| anyhow!("Failed to download mel filter bank: {}", e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let mel_bytes = std::fs::read(&mel_filename)?;
        let mel_filters = read_mel_filters(&mel_bytes, &config)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let load_time = start_time.elapsed();
        tracing::info!(
            "Whisper {} model loaded on {:?} in {:.2}s",
            size,
            device,
            load_time.as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
        })
    }

    /// Transcribe 16kHz mono PCM to per-window text segments.
    ///
    /// Each 30-second window is decoded independently: greedy argmax over the
    /// logits, stopping at end-of-text, with the KV cache reset afterwards so
    /// a later window never conditions on an earlier one.
    pub fn transcribe_pcm(
        &mut self,
        samples: &[f32],
        language: &str,
    ) -> Result<Vec<String>, InferenceError> {
        let sot_token = self.token_id(m::SOT_TOKEN)?;
        let transcribe_token = self.token_id(m::TRANSCRIBE_TOKEN)?;
        let no_timestamps_token = self.token_id(m::NO_TIMESTAMPS_TOKEN)?;
        let eot_token = self.token_id(m::EOT_TOKEN)?;
        let language_token = self
            .tokenizer
            .token_to_id(&format!("<|{}|>", language))
            .ok_or_else(|| InferenceError::UnknownLanguage(language.to_string()))?;

        let mut segments = Vec::new();

        for (window, chunk) in samples.chunks(m::N_SAMPLES).enumerate() {
            let padded;
            let window_samples = if chunk.len() < m::N_SAMPLES {
                padded = {
                    let mut p = chunk.to_vec();
                    p.resize(m::N_SAMPLES, 0.0);
                    p
                };
                &padded[..]
            } else {
                chunk
            };

            let mel_data = m::audio::pcm_to_mel(&self.config, window_samples, &self.mel_filters);
            let n_mel = self.config.num_mel_bins;
            let n_frames = mel_data.len() / n_mel;
            let mel = Tensor::from_vec(mel_data, (1, n_mel, n_frames), &self.device)
                .map_err(backend)?;

            tracing::debug!(window = window, "Decoding audio window");

            let audio_features = self.model.encoder.forward(&mel, true).map_err(backend)?;

            let mut tokens = vec![
                sot_token,
                language_token,
                transcribe_token,
                no_timestamps_token,
            ];
            let mut output_tokens: Vec<u32> = Vec::new();
            let mut first = true;

            for _ in 0..MAX_DECODE_TOKENS {
                let token_tensor = Tensor::new(tokens.as_slice(), &self.device)
                    .and_then(|t| t.unsqueeze(0))
                    .map_err(backend)?;

                let decoder_output = self
                    .model
                    .decoder
                    .forward(&token_tensor, &audio_features, first)
                    .map_err(backend)?;
                first = false;

                let logits = self
                    .model
                    .decoder
                    .final_linear(&decoder_output.squeeze(0).map_err(backend)?)
                    .map_err(backend)?;

                let seq_len = logits.dim(0).map_err(backend)?;
                let next_token = logits
                    .get(seq_len - 1)
                    .and_then(|l| l.argmax(0))
                    .and_then(|t| t.to_scalar::<u32>())
                    .map_err(backend)?;

                if next_token == eot_token {
                    break;
                }

                tokens.push(next_token);
                output_tokens.push(next_token);
            }

            self.model.reset_kv_cache();

            let text = self
                .tokenizer
                .decode(&output_tokens, true)
                .map_err(|e| InferenceError::Backend(format!("tokenizer decode: {}", e)))?;
            let text = text.trim();
            if !text.is_empty() {
                segments.push(text.to_string());
            }
        }

        Ok(segments)
    }

    fn token_id(&self, token: &str) -> Result<u32, InferenceError> {
        self.tokenizer
            .token_to_id(token)
            .ok_or_else(|| InferenceError::Backend(format!("token not found: {}", token)))
    }
}

fn backend(e: candle_core::Error) -> InferenceError {
    InferenceError::Backend(e.to_string())
}

/// Validate and convert the downloaded mel filter bank for this model's
/// mel-bin count.
fn read_mel_filters(bytes: &[u8], config: &Config) -> Result<Vec<f32>> {
    let expected_len = config.num_mel_bins * (m::N_FFT / 2 + 1);
    if bytes.len() < expected_len * 4 {
        return Err(anyhow!(
            "Mel filter bank too small: {} bytes, expected at least {}",
            bytes.len(),
            expected_len * 4
        ));
    }

    let filters: Vec<f32> = bytes
        .chunks_exact(4)
        .take(expected_len)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("base".parse::<ModelSize>().unwrap(), ModelSize::Base);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_display_roundtrip() {
        for size in [
            ModelSize::Tiny,
            ModelSize::Base,
            ModelSize::Small,
            ModelSize::Medium,
            ModelSize::Large,
        ] {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
        }
    }

    #[test]
    fn test_mel_filter_validation_rejects_short_bank() {
        // The field set mirrors openai/whisper-base config.json; extra keys
        // in the real file are ignored by the deserializer, so listing the
        // superset here is safe.
        let config: Config = serde_json::from_value(serde_json::json!({
            "num_mel_bins": 80,
            "max_source_positions": 1500,
            "max_target_positions": 448,
            "d_model": 512,
            "encoder_attention_heads": 8,
            "encoder_layers": 6,
            "encoder_ffn_dim": 2048,
            "decoder_attention_heads": 8,
            "decoder_layers": 6,
            "decoder_ffn_dim": 2048,
            "vocab_size": 51865,
            "suppress_tokens": []
        }))
        .unwrap();

        assert!(read_mel_filters(&[0u8; 128], &config).is_err());
    }
}
