use candle_core::{safetensors::MmapedSafetensors, Device, Result as CandleResult, Tensor};

use crate::llm::layer::Layer;

/// Token embedding table. T5 shares a single table (`shared.weight`) between
/// the encoder input, the decoder input and (when tied) the LM head.
pub struct EmbeddingLayer {
    weights: Tensor,
    device: Device,
}

impl EmbeddingLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        device: &Device,
        prefix: &str,
    ) -> CandleResult<Self> {
        let weights = weights_map
            .load(&format!("{}.weight", prefix), device)?
            .to_dtype(candle_core::DType::F32)?;

        Ok(Self {
            weights,
            device: device.clone(),
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weights
    }
}

impl Layer for EmbeddingLayer {
    fn forward(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        let input_ids = input_ids.to_device(&self.device)?;

        let (batch_size, seq_length) = input_ids.dims2()?;

        let flat_input = input_ids.reshape(&[batch_size * seq_length])?;

        let flat_embeddings = self.weights.index_select(&flat_input, 0)?;

        let embeddings =
            flat_embeddings.reshape(&[batch_size, seq_length, self.weights.dim(1)?])?;

        Ok(embeddings)
    }
}
