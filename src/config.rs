use std::env;
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_MODEL_ID: &str = "google/flan-t5-small";

/// Architecture hyperparameters read from the checkpoint's `config.json`
/// (HuggingFace T5 layout).
#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
    pub d_model: usize,
    pub d_kv: usize,
    pub d_ff: usize,
    pub num_layers: usize,
    pub num_decoder_layers: Option<usize>,
    pub num_heads: usize,
    pub relative_attention_num_buckets: usize,
    #[serde(default = "default_rel_max_distance")]
    pub relative_attention_max_distance: usize,
    pub layer_norm_epsilon: f64,
    #[serde(default = "default_feed_forward_proj")]
    pub feed_forward_proj: String,
    pub vocab_size: usize,
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    pub pad_token_id: u32,
    #[serde(default = "default_tie_word_embeddings")]
    pub tie_word_embeddings: bool,
}

fn default_rel_max_distance() -> usize {
    128
}

fn default_feed_forward_proj() -> String {
    "relu".to_string()
}

fn default_tie_word_embeddings() -> bool {
    true
}

impl ModelConfig {
    /// Older checkpoints omit `num_decoder_layers` when both stacks match.
    pub fn decoder_layers(&self) -> usize {
        self.num_decoder_layers.unwrap_or(self.num_layers)
    }

    pub fn is_gated_act(&self) -> bool {
        self.feed_forward_proj.starts_with("gated-")
    }

    pub fn activation_name(&self) -> &str {
        self.feed_forward_proj
            .strip_prefix("gated-")
            .unwrap_or(&self.feed_forward_proj)
    }
}

/// Process-level configuration resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local directory holding the model assets. Takes precedence over
    /// `model_id` when set.
    pub model_dir: Option<PathBuf>,
    /// HuggingFace Hub repository to fetch assets from.
    pub model_id: String,
    pub host: String,
    pub port: u16,
    pub beam_width: usize,
    pub max_new_tokens: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let model_dir = env::var_os("MODEL_DIR").map(PathBuf::from);
        let model_id = env::var("MODEL_ID").unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().context("PORT must be a valid port number")?,
            Err(_) => 3000,
        };
        let beam_width = match env::var("BEAM_WIDTH") {
            Ok(raw) => raw.parse().context("BEAM_WIDTH must be a positive integer")?,
            Err(_) => 4,
        };
        let max_new_tokens = match env::var("MAX_NEW_TOKENS") {
            Ok(raw) => raw.parse().context("MAX_NEW_TOKENS must be a positive integer")?,
            Err(_) => 128,
        };

        Ok(Self {
            model_dir,
            model_id,
            host,
            port,
            beam_width,
            max_new_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"{
        "architectures": ["T5ForConditionalGeneration"],
        "d_ff": 1024,
        "d_kv": 64,
        "d_model": 512,
        "decoder_start_token_id": 0,
        "eos_token_id": 1,
        "feed_forward_proj": "gated-gelu",
        "layer_norm_epsilon": 1e-06,
        "model_type": "t5",
        "num_decoder_layers": 8,
        "num_heads": 6,
        "num_layers": 8,
        "pad_token_id": 0,
        "relative_attention_max_distance": 128,
        "relative_attention_num_buckets": 32,
        "tie_word_embeddings": false,
        "vocab_size": 32128
    }"#;

    #[test]
    fn parses_hf_config_json() {
        let cfg: ModelConfig = serde_json::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(cfg.d_model, 512);
        assert_eq!(cfg.decoder_layers(), 8);
        assert!(cfg.is_gated_act());
        assert_eq!(cfg.activation_name(), "gelu");
        assert!(!cfg.tie_word_embeddings);
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let cfg: ModelConfig = serde_json::from_str(
            r#"{
                "d_ff": 2048, "d_kv": 64, "d_model": 512,
                "decoder_start_token_id": 0, "eos_token_id": 1, "pad_token_id": 0,
                "layer_norm_epsilon": 1e-06, "num_heads": 8, "num_layers": 6,
                "relative_attention_num_buckets": 32, "vocab_size": 32128
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.decoder_layers(), 6);
        assert_eq!(cfg.relative_attention_max_distance, 128);
        assert_eq!(cfg.feed_forward_proj, "relu");
        assert!(!cfg.is_gated_act());
        assert!(cfg.tie_word_embeddings);
    }
}
