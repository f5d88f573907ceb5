use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};
use candle_nn::var_builder::SimpleBackend;

use crate::config::ModelConfig;
use crate::llm::attention::create_causal_mask;
use crate::llm::decoder::DecoderLayer;
use crate::llm::embedding::EmbeddingLayer;
use crate::llm::encoder::EncoderLayer;
use crate::llm::layer::Layer;
use crate::llm::lm_head::LMHeadLayer;
use crate::llm::rms_norm::RMSNormLayer;

/// Encoder-decoder model seam. The server and the generation loop only talk
/// through this, so tests can substitute a scripted stand-in.
pub trait Model {
    /// Run the encoder once over the prompt, `(1, src_len) -> (1, src_len, d_model)`.
    fn encode(&self, input_ids: &Tensor) -> CandleResult<Tensor>;
    /// Run the decoder over the full target prefix and return vocabulary
    /// logits, `(1, tgt_len) -> (1, tgt_len, vocab_size)`.
    fn decode(&self, decoder_input_ids: &Tensor, encoder_output: &Tensor) -> CandleResult<Tensor>;
}

/// T5-family model loaded from a HuggingFace safetensors checkpoint.
pub struct T5Model {
    device: Device,
    shared: EmbeddingLayer,
    encoder_layers: Vec<EncoderLayer>,
    encoder_norm: RMSNormLayer,
    decoder_layers: Vec<DecoderLayer>,
    decoder_norm: RMSNormLayer,
    lm_head: LMHeadLayer,
}

impl T5Model {
    pub fn new(
        weights: &MmapedSafetensors,
        config: &ModelConfig,
        device: &Device,
    ) -> CandleResult<Self> {
        let shared = EmbeddingLayer::new(weights, device, "shared")?;

        let encoder_layers = (0..config.num_layers)
            .map(|idx| EncoderLayer::new(weights, &format!("encoder.block.{}", idx), config, device))
            .collect::<CandleResult<Vec<_>>>()?;

        let encoder_norm = RMSNormLayer::new(
            weights,
            "encoder.final_layer_norm",
            device,
            config.layer_norm_epsilon,
        )?;

        let decoder_layers = (0..config.decoder_layers())
            .map(|idx| DecoderLayer::new(weights, &format!("decoder.block.{}", idx), config, device))
            .collect::<CandleResult<Vec<_>>>()?;

        let decoder_norm = RMSNormLayer::new(
            weights,
            "decoder.final_layer_norm",
            device,
            config.layer_norm_epsilon,
        )?;

        let lm_head = if !config.tie_word_embeddings && weights.contains_tensor("lm_head.weight") {
            LMHeadLayer::new(weights, "lm_head", device)?
        } else {
            LMHeadLayer::tied(shared.weight(), config.d_model, device)
        };

        Ok(Self {
            device: device.clone(),
            shared,
            encoder_layers,
            encoder_norm,
            decoder_layers,
            decoder_norm,
            lm_head,
        })
    }
}

impl Model for T5Model {
    fn encode(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        let input_ids = input_ids.to_device(&self.device)?;
        let seq_len = input_ids.dim(1)?;

        let Some(first_layer) = self.encoder_layers.first() else {
            candle_core::bail!("encoder has no layers");
        };
        // Block 0 owns the bias table; all blocks share the resulting bias.
        let position_bias = first_layer.self_attn.compute_bias(seq_len, seq_len)?;

        let mut hidden_states = self.shared.forward(&input_ids)?;
        for layer in &self.encoder_layers {
            hidden_states = layer.forward(&hidden_states, Some(&position_bias))?;
        }

        self.encoder_norm.forward(&hidden_states)
    }

    fn decode(&self, decoder_input_ids: &Tensor, encoder_output: &Tensor) -> CandleResult<Tensor> {
        let decoder_input_ids = decoder_input_ids.to_device(&self.device)?;
        let seq_len = decoder_input_ids.dim(1)?;

        let Some(first_layer) = self.decoder_layers.first() else {
            candle_core::bail!("decoder has no layers");
        };
        let position_bias = first_layer.self_attn.compute_bias(seq_len, seq_len)?;
        let causal_mask = create_causal_mask(seq_len, &self.device)?;
        let self_attn_bias = position_bias.broadcast_add(&causal_mask)?;

        let mut hidden_states = self.shared.forward(&decoder_input_ids)?;
        for layer in &self.decoder_layers {
            hidden_states = layer.forward(&hidden_states, encoder_output, Some(&self_attn_bias))?;
        }

        let normed = self.decoder_norm.forward(&hidden_states)?;
        self.lm_head.forward(&normed)
    }
}
