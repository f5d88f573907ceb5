use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::llm::activation::Activation;
use crate::llm::layer::Layer;
use crate::llm::linear::LinearLayer;

/// T5 `DenseReluDense` block. The gated variant (`gated-gelu` etc.) splits
/// the input projection into an activated half (`wi_0`) and a linear half
/// (`wi_1`) that are multiplied together.
pub struct MlpLayer {
    wi: LinearLayer,
    wi_gate: Option<LinearLayer>,
    wo: LinearLayer,
    activation: Activation,
    device: Device,
}

impl MlpLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        gated: bool,
        activation: Activation,
        device: Device,
    ) -> CandleResult<Self> {
        let (wi, wi_gate) = if gated {
            let gate =
                LinearLayer::new(weights_map, &format!("{}.wi_0", prefix), device.clone())?;
            let linear =
                LinearLayer::new(weights_map, &format!("{}.wi_1", prefix), device.clone())?;
            (linear, Some(gate))
        } else {
            (
                LinearLayer::new(weights_map, &format!("{}.wi", prefix), device.clone())?,
                None,
            )
        };
        let wo = LinearLayer::new(weights_map, &format!("{}.wo", prefix), device.clone())?;

        Ok(Self {
            wi,
            wi_gate,
            wo,
            activation,
            device,
        })
    }
}

impl Layer for MlpLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let hidden = match &self.wi_gate {
            Some(gate) => {
                let activated = self.activation.apply(&gate.forward(&input)?)?;
                let linear = self.wi.forward(&input)?;
                activated.mul(&linear)?
            }
            None => self.activation.apply(&self.wi.forward(&input)?)?,
        };
        self.wo.forward(&hidden)
    }
}
