use candle_core::Device;
use tokenizers::Tokenizer;

use crate::features::AttributeScaler;
use crate::llm::inference::{GenerationParams, SpecialTokens};
use crate::llm::models::Model;

pub struct AppState {
    pub model: Box<dyn Model + Send + Sync>,
    pub tokenizer: Tokenizer,
    pub scaler: AttributeScaler,
    pub device: Device,
    pub model_name: String,
    pub generation: GenerationParams,
    pub special: SpecialTokens,
}
