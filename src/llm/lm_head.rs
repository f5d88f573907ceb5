use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::llm::layer::Layer;

/// Projects decoder hidden states onto the vocabulary. When the checkpoint
/// ties the head to the shared embedding, T5 rescales the decoder output by
/// `d_model^-0.5` before the projection.
pub struct LMHeadLayer {
    weights: Tensor,
    scale: Option<f64>,
    device: Device,
}

impl LMHeadLayer {
    pub fn new(weights: &MmapedSafetensors, prefix: &str, device: &Device) -> CandleResult<Self> {
        let weights = weights
            .load(&format!("{}.weight", prefix), device)?
            .to_dtype(candle_core::DType::F32)?;
        Ok(Self {
            weights,
            scale: None,
            device: device.clone(),
        })
    }

    pub fn tied(embedding: &Tensor, d_model: usize, device: &Device) -> Self {
        Self {
            weights: embedding.clone(),
            scale: Some((d_model as f64).powf(-0.5)),
            device: device.clone(),
        }
    }
}

impl Layer for LMHeadLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let mut input = input.to_device(&self.device)?;
        if let Some(scale) = self.scale {
            input = input.affine(scale, 0.0)?;
        }
        input.broadcast_matmul(&self.weights.t()?)
    }
}
