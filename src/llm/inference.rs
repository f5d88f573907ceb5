use std::cmp::Ordering;

use candle_core::{DType, Device, IndexOp, Result as CandleResult, Tensor};
use candle_nn::ops::log_softmax;

use crate::llm::models::Model;

/// Hard ceiling regardless of what the request asks for.
pub const MAX_NEW_TOKENS_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct SpecialTokens {
    pub decoder_start: u32,
    pub eos: u32,
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub beam_width: usize,
    pub max_new_tokens: usize,
    pub length_penalty: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            beam_width: 4,
            max_new_tokens: 128,
            length_penalty: 1.0,
        }
    }
}

struct Beam {
    tokens: Vec<i64>,
    score: f64,
}

/// Beam-search decode: encode the prompt once, then grow `beam_width`
/// candidate sequences, retiring each beam when it emits EOS. Finished beams
/// compete on length-normalized log-probability. Returns the generated ids
/// without the decoder start token or the trailing EOS.
pub fn generate(
    input_ids: &[u32],
    model: &dyn Model,
    device: &Device,
    params: &GenerationParams,
    special: &SpecialTokens,
) -> CandleResult<Vec<u32>> {
    let beam_width = params.beam_width.max(1);
    let max_new_tokens = params.max_new_tokens.min(MAX_NEW_TOKENS_LIMIT);
    let eos = special.eos as i64;

    let src = input_ids.iter().map(|&id| id as i64).collect::<Vec<i64>>();
    let input_tensor = Tensor::from_slice(&src, &[1, src.len()], device)?;
    let encoder_output = model.encode(&input_tensor)?;

    let mut live = vec![Beam {
        tokens: vec![special.decoder_start as i64],
        score: 0.0,
    }];
    let mut finished: Vec<(Vec<i64>, f64)> = Vec::new();

    let penalized = |score: f64, tokens: &[i64]| {
        let generated = tokens.len().saturating_sub(1).max(1);
        score / (generated as f64).powf(params.length_penalty)
    };

    for _ in 0..max_new_tokens {
        let mut candidates: Vec<Beam> = Vec::new();
        for beam in &live {
            let decoder_input =
                Tensor::from_slice(&beam.tokens, &[1, beam.tokens.len()], device)?;
            let logits = model.decode(&decoder_input, &encoder_output)?;
            let next_token_logits = logits.i((0, logits.dim(1)? - 1))?;
            let log_probs =
                log_softmax(&next_token_logits.to_dtype(DType::F32)?, 0)?.to_vec1::<f32>()?;

            let mut order = (0..log_probs.len()).collect::<Vec<usize>>();
            order.sort_unstable_by(|&a, &b| {
                log_probs[b]
                    .partial_cmp(&log_probs[a])
                    .unwrap_or(Ordering::Equal)
            });

            for &token in order.iter().take(beam_width) {
                let mut tokens = beam.tokens.clone();
                tokens.push(token as i64);
                candidates.push(Beam {
                    tokens,
                    score: beam.score + log_probs[token] as f64,
                });
            }
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        live = Vec::new();
        for candidate in candidates {
            if candidate.tokens.last().copied() == Some(eos) {
                let score = penalized(candidate.score, &candidate.tokens);
                finished.push((candidate.tokens, score));
            } else {
                live.push(candidate);
                if live.len() == beam_width {
                    break;
                }
            }
        }

        if live.is_empty() {
            break;
        }
    }

    // Beams still running at the token limit compete as-is.
    for beam in live {
        let score = penalized(beam.score, &beam.tokens);
        finished.push((beam.tokens, score));
    }

    let (best, _) = finished
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .ok_or_else(|| candle_core::Error::msg("beam search produced no candidates"))?;

    let mut output = best
        .into_iter()
        .skip(1)
        .map(|token| token as u32)
        .collect::<Vec<u32>>();
    if output.last().copied() == Some(special.eos) {
        output.pop();
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic stand-in: at decoder position `p` the logits favor
    /// `script[p]`, then EOS once the script runs out.
    struct ScriptedModel {
        script: Vec<u32>,
        vocab_size: usize,
        eos: u32,
    }

    impl Model for ScriptedModel {
        fn encode(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
            let (batch, seq_len) = input_ids.dims2()?;
            Tensor::zeros((batch, seq_len, 4), DType::F32, input_ids.device())
        }

        fn decode(
            &self,
            decoder_input_ids: &Tensor,
            _encoder_output: &Tensor,
        ) -> CandleResult<Tensor> {
            let (batch, seq_len) = decoder_input_ids.dims2()?;
            let mut logits = vec![0f32; batch * seq_len * self.vocab_size];
            for position in 0..seq_len {
                let favored = self.script.get(position).copied().unwrap_or(self.eos);
                logits[position * self.vocab_size + favored as usize] = 8.0;
            }
            Tensor::from_vec(logits, (batch, seq_len, self.vocab_size), decoder_input_ids.device())
        }
    }

    fn special() -> SpecialTokens {
        SpecialTokens {
            decoder_start: 0,
            eos: 1,
        }
    }

    #[test]
    fn follows_the_highest_probability_path() {
        let model = ScriptedModel {
            script: vec![3, 4, 2],
            vocab_size: 6,
            eos: 1,
        };
        let params = GenerationParams {
            max_new_tokens: 8,
            ..GenerationParams::default()
        };
        let output = generate(&[5, 1], &model, &Device::Cpu, &params, &special()).unwrap();
        assert_eq!(output, vec![3, 4, 2]);
    }

    #[test]
    fn strips_start_and_eos_tokens() {
        let model = ScriptedModel {
            script: vec![2],
            vocab_size: 4,
            eos: 1,
        };
        let params = GenerationParams {
            max_new_tokens: 8,
            ..GenerationParams::default()
        };
        let output = generate(&[3], &model, &Device::Cpu, &params, &special()).unwrap();
        assert_eq!(output, vec![2]);
        assert!(!output.contains(&special().decoder_start));
        assert!(!output.contains(&special().eos));
    }

    #[test]
    fn respects_the_token_budget() {
        // Never emits EOS, so the budget is the only stop condition.
        let model = ScriptedModel {
            script: vec![2; 64],
            vocab_size: 4,
            eos: 1,
        };
        let params = GenerationParams {
            max_new_tokens: 5,
            ..GenerationParams::default()
        };
        let output = generate(&[3], &model, &Device::Cpu, &params, &special()).unwrap();
        assert_eq!(output.len(), 5);
    }

    #[test]
    fn empty_budget_yields_empty_output() {
        let model = ScriptedModel {
            script: vec![2],
            vocab_size: 4,
            eos: 1,
        };
        let params = GenerationParams {
            max_new_tokens: 0,
            ..GenerationParams::default()
        };
        let output = generate(&[3], &model, &Device::Cpu, &params, &special()).unwrap();
        assert!(output.is_empty());
    }
}
