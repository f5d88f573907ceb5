use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::config::ModelConfig;
use crate::llm::activation::Activation;
use crate::llm::attention::AttentionLayer;
use crate::llm::layer::Layer;
use crate::llm::mlp::MlpLayer;
use crate::llm::rms_norm::RMSNormLayer;

/// One decoder block: causal self-attention, cross-attention over the
/// encoder output, then feed-forward. All three are pre-norm with residuals.
pub struct DecoderLayer {
    pub self_attn: AttentionLayer,
    cross_attn: AttentionLayer,
    mlp: MlpLayer,
    self_attn_norm: RMSNormLayer,
    cross_attn_norm: RMSNormLayer,
    mlp_norm: RMSNormLayer,
}

impl DecoderLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        config: &ModelConfig,
        device: &Device,
    ) -> CandleResult<Self> {
        let self_attn = AttentionLayer::new(
            weights,
            &format!("{}.layer.0.SelfAttention", prefix),
            config.num_heads,
            config.d_kv,
            config.relative_attention_num_buckets,
            config.relative_attention_max_distance,
            false,
            device.clone(),
        )?;

        let self_attn_norm = RMSNormLayer::new(
            weights,
            &format!("{}.layer.0.layer_norm", prefix),
            device,
            config.layer_norm_epsilon,
        )?;

        // Cross-attention carries no relative bias table.
        let cross_attn = AttentionLayer::new(
            weights,
            &format!("{}.layer.1.EncDecAttention", prefix),
            config.num_heads,
            config.d_kv,
            config.relative_attention_num_buckets,
            config.relative_attention_max_distance,
            false,
            device.clone(),
        )?;

        let cross_attn_norm = RMSNormLayer::new(
            weights,
            &format!("{}.layer.1.layer_norm", prefix),
            device,
            config.layer_norm_epsilon,
        )?;

        let mlp = MlpLayer::new(
            weights,
            &format!("{}.layer.2.DenseReluDense", prefix),
            config.is_gated_act(),
            Activation::parse(config.activation_name())?,
            device.clone(),
        )?;

        let mlp_norm = RMSNormLayer::new(
            weights,
            &format!("{}.layer.2.layer_norm", prefix),
            device,
            config.layer_norm_epsilon,
        )?;

        Ok(Self {
            self_attn,
            cross_attn,
            mlp,
            self_attn_norm,
            cross_attn_norm,
            mlp_norm,
        })
    }

    /// `self_attn_bias` carries the relative position bias plus the causal
    /// mask, computed once per forward pass in the model.
    pub fn forward(
        &self,
        input: &Tensor,
        encoder_output: &Tensor,
        self_attn_bias: Option<&Tensor>,
    ) -> CandleResult<Tensor> {
        let normed = self.self_attn_norm.forward(input)?;
        let attn_output = self.self_attn.forward(&normed, &normed, self_attn_bias)?;
        let attn_residual = input.add(&attn_output)?;

        let normed = self.cross_attn_norm.forward(&attn_residual)?;
        let cross_output = self.cross_attn.forward(&normed, encoder_output, None)?;
        let cross_residual = attn_residual.add(&cross_output)?;

        let normed = self.mlp_norm.forward(&cross_residual)?;
        let mlp_output = self.mlp.forward(&normed)?;
        cross_residual.add(&mlp_output)
    }
}
