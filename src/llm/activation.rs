use candle_core::{Result as CandleResult, Tensor};

#[derive(Debug, Clone, Copy)]
pub enum Activation {
    Gelu,
    Relu,
    Silu,
}

impl Activation {
    pub fn parse(name: &str) -> CandleResult<Self> {
        match name {
            "gelu" | "gelu_new" => Ok(Activation::Gelu),
            "relu" => Ok(Activation::Relu),
            "silu" => Ok(Activation::Silu),
            other => candle_core::bail!("unsupported activation function: {other}"),
        }
    }

    pub fn apply(&self, input: &Tensor) -> CandleResult<Tensor> {
        match self {
            Activation::Gelu => input.gelu(),
            Activation::Relu => input.relu(),
            Activation::Silu => input.silu(),
        }
    }
}
