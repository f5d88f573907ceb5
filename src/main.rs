use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use candle_core::safetensors::MmapedSafetensors;
use candle_core::Device;
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;
use tracing_subscriber::EnvFilter;

use medichat_serve::api::server::create_router;
use medichat_serve::app_state::AppState;
use medichat_serve::config::{ModelConfig, ServerConfig};
use medichat_serve::features::{self, AttributeScaler};
use medichat_serve::llm::inference::{GenerationParams, SpecialTokens};
use medichat_serve::llm::models::T5Model;

struct ModelAssets {
    weights: PathBuf,
    config: PathBuf,
    tokenizer: PathBuf,
    scaler: Option<PathBuf>,
}

fn locate_assets(config: &ServerConfig) -> anyhow::Result<ModelAssets> {
    if let Some(dir) = &config.model_dir {
        let scaler = dir.join("scaler.json");
        Ok(ModelAssets {
            weights: dir.join("model.safetensors"),
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            scaler: scaler.exists().then_some(scaler),
        })
    } else {
        let api = Api::new()?;
        let repo = api.model(config.model_id.clone());
        Ok(ModelAssets {
            weights: repo.get("model.safetensors")?,
            config: repo.get("config.json")?,
            tokenizer: repo.get("tokenizer.json")?,
            scaler: repo.get("scaler.json").ok(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server_config = ServerConfig::from_env()?;
    tracing::info!(model = %server_config.model_id, "loading model assets");
    let assets = locate_assets(&server_config)?;

    let model_config: ModelConfig = serde_json::from_reader(
        File::open(&assets.config).context("opening model config.json")?,
    )?;
    let weights = unsafe { MmapedSafetensors::new(&assets.weights)? };
    let tokenizer = Tokenizer::from_file(&assets.tokenizer).map_err(|e| anyhow::anyhow!(e))?;

    let scaler: AttributeScaler = match &assets.scaler {
        Some(path) => {
            serde_json::from_reader(File::open(path).context("opening scaler.json")?)?
        }
        None => {
            tracing::warn!("no scaler.json found, attribute scaling disabled");
            AttributeScaler::identity(&features::DEFAULT_FEATURES)
        }
    };

    let device = Device::cuda_if_available(0)?;
    let model = T5Model::new(&weights, &model_config, &device)?;
    tracing::info!(
        encoder_layers = model_config.num_layers,
        decoder_layers = model_config.decoder_layers(),
        "model loaded"
    );

    let state = Arc::new(AppState {
        model: Box::new(model),
        tokenizer,
        scaler,
        device,
        model_name: server_config.model_id.clone(),
        generation: GenerationParams {
            beam_width: server_config.beam_width,
            max_new_tokens: server_config.max_new_tokens,
            length_penalty: 1.0,
        },
        special: SpecialTokens {
            decoder_start: model_config.decoder_start_token_id,
            eos: model_config.eos_token_id,
        },
    });

    let app = create_router(state);

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
