use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::config::ModelConfig;
use crate::llm::activation::Activation;
use crate::llm::attention::AttentionLayer;
use crate::llm::layer::Layer;
use crate::llm::mlp::MlpLayer;
use crate::llm::rms_norm::RMSNormLayer;

/// One encoder block: pre-norm self-attention and feed-forward, each with a
/// residual connection.
pub struct EncoderLayer {
    pub self_attn: AttentionLayer,
    mlp: MlpLayer,
    self_attn_norm: RMSNormLayer,
    mlp_norm: RMSNormLayer,
}

impl EncoderLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        config: &ModelConfig,
        device: &Device,
    ) -> CandleResult<Self> {
        // Block 0 additionally carries the relative bias table; the
        // attention layer picks it up when present in the checkpoint.
        let self_attn = AttentionLayer::new(
            weights,
            &format!("{}.layer.0.SelfAttention", prefix),
            config.num_heads,
            config.d_kv,
            config.relative_attention_num_buckets,
            config.relative_attention_max_distance,
            true,
            device.clone(),
        )?;

        let self_attn_norm = RMSNormLayer::new(
            weights,
            &format!("{}.layer.0.layer_norm", prefix),
            device,
            config.layer_norm_epsilon,
        )?;

        let mlp = MlpLayer::new(
            weights,
            &format!("{}.layer.1.DenseReluDense", prefix),
            config.is_gated_act(),
            Activation::parse(config.activation_name())?,
            device.clone(),
        )?;

        let mlp_norm = RMSNormLayer::new(
            weights,
            &format!("{}.layer.1.layer_norm", prefix),
            device,
            config.layer_norm_epsilon,
        )?;

        Ok(Self {
            self_attn,
            mlp,
            self_attn_norm,
            mlp_norm,
        })
    }

    pub fn forward(&self, input: &Tensor, position_bias: Option<&Tensor>) -> CandleResult<Tensor> {
        let normed = self.self_attn_norm.forward(input)?;
        let attn_output = self.self_attn.forward(&normed, &normed, position_bias)?;
        let attn_residual = input.add(&attn_output)?;

        let normed = self.mlp_norm.forward(&attn_residual)?;
        let mlp_output = self.mlp.forward(&normed)?;
        attn_residual.add(&mlp_output)
    }
}
