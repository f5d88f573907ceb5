use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};
use candle_nn::var_builder::SimpleBackend;

use crate::llm::layer::Layer;
use crate::llm::linear::LinearLayer;

/// Multi-head attention in the T5 style: no query scaling, scores offset by
/// a learned relative-position bias. The bias table lives on block 0 of each
/// stack and is shared by the other blocks, so `forward` takes the already
/// computed bias rather than owning it per layer.
pub struct AttentionLayer {
    q_proj: LinearLayer,
    k_proj: LinearLayer,
    v_proj: LinearLayer,
    o_proj: LinearLayer,
    relative_bias: Option<Tensor>,
    bidirectional: bool,
    num_buckets: usize,
    max_distance: usize,
    n_heads: usize,
    d_kv: usize,
    device: Device,
}

impl AttentionLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        n_heads: usize,
        d_kv: usize,
        num_buckets: usize,
        max_distance: usize,
        bidirectional: bool,
        device: Device,
    ) -> CandleResult<Self> {
        let q_proj = LinearLayer::new(weights, &format!("{}.q", prefix), device.clone())?;
        let k_proj = LinearLayer::new(weights, &format!("{}.k", prefix), device.clone())?;
        let v_proj = LinearLayer::new(weights, &format!("{}.v", prefix), device.clone())?;
        let o_proj = LinearLayer::new(weights, &format!("{}.o", prefix), device.clone())?;

        let bias_name = format!("{}.relative_attention_bias.weight", prefix);
        let relative_bias = if weights.contains_tensor(&bias_name) {
            Some(
                weights
                    .load(&bias_name, &device)?
                    .to_dtype(candle_core::DType::F32)?,
            )
        } else {
            None
        };

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            relative_bias,
            bidirectional,
            num_buckets,
            max_distance,
            n_heads,
            d_kv,
            device,
        })
    }

    /// Build the `(1, n_heads, q_len, k_len)` position bias from this layer's
    /// bias table. Only valid on block 0 of a stack.
    pub fn compute_bias(&self, q_len: usize, k_len: usize) -> CandleResult<Tensor> {
        let Some(bias_table) = &self.relative_bias else {
            candle_core::bail!("attention layer carries no relative position bias table");
        };

        let mut buckets = Vec::with_capacity(q_len * k_len);
        for q in 0..q_len {
            for k in 0..k_len {
                buckets.push(relative_position_bucket(
                    k as i64 - q as i64,
                    self.bidirectional,
                    self.num_buckets,
                    self.max_distance,
                ));
            }
        }

        let bucket_ids = Tensor::from_vec(buckets, q_len * k_len, &self.device)?;
        let values = bias_table.index_select(&bucket_ids, 0)?; // (q_len * k_len, n_heads)
        let bias = values
            .reshape((q_len, k_len, self.n_heads))?
            .permute((2, 0, 1))?
            .contiguous()?
            .unsqueeze(0)?; // (1, n_heads, q_len, k_len)

        Ok(bias)
    }

    /// `scores_bias` is the relative position bias, with the causal mask
    /// already folded in for decoder self-attention. Cross-attention passes
    /// `None`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        key_value: &Tensor,
        scores_bias: Option<&Tensor>,
    ) -> CandleResult<Tensor> {
        let hidden = hidden.to_device(&self.device)?;
        let key_value = key_value.to_device(&self.device)?;

        let q = self.q_proj.forward(&hidden)?;
        let k = self.k_proj.forward(&key_value)?;
        let v = self.v_proj.forward(&key_value)?;

        let (b_sz, q_len, _) = hidden.shape().dims3()?;
        let k_len = key_value.dim(1)?;
        let inner_dim = self.n_heads * self.d_kv;

        let q = q
            .reshape((b_sz, q_len, self.n_heads, self.d_kv))?
            .transpose(1, 2)?
            .contiguous()?; // (b_sz, n_heads, q_len, d_kv)
        let k = k
            .reshape((b_sz, k_len, self.n_heads, self.d_kv))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((b_sz, k_len, self.n_heads, self.d_kv))?
            .transpose(1, 2)?
            .contiguous()?;

        // T5 folds the 1/sqrt(d) factor into the trained weights, so the raw
        // dot product is used as-is.
        let mut attn_scores = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        if let Some(bias) = scores_bias {
            attn_scores = attn_scores.broadcast_add(bias)?;
        }

        let attn_probs = candle_nn::ops::softmax(&attn_scores, candle_core::D::Minus1)?;

        let context = attn_probs.matmul(&v)?;
        let context = context
            .transpose(1, 2)?
            .contiguous()?
            .reshape(&[b_sz, q_len, inner_dim])?;

        self.o_proj.forward(&context)
    }
}

/// Additive causal mask for decoder self-attention, `(1, 1, seq_len, seq_len)`.
pub fn create_causal_mask(seq_len: usize, device: &Device) -> CandleResult<Tensor> {
    let mask = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect::<Vec<f32>>();

    let mask_tensor = Tensor::from_vec(mask, (seq_len, seq_len), device)?;
    let mask_tensor = mask_tensor.unsqueeze(0)?.unsqueeze(0)?;

    Ok(mask_tensor)
}

/// Map a relative position (key index minus query index) to a bias bucket.
/// Half the buckets cover exact offsets, the rest grow logarithmically out to
/// `max_distance`; bidirectional attention splits the range by sign.
pub fn relative_position_bucket(
    relative_position: i64,
    bidirectional: bool,
    num_buckets: usize,
    max_distance: usize,
) -> u32 {
    let mut num_buckets = num_buckets as i64;
    let mut bucket = 0i64;
    let mut position = relative_position;

    if bidirectional {
        num_buckets /= 2;
        if position > 0 {
            bucket += num_buckets;
        }
        position = position.abs();
    } else {
        position = -position.min(0);
    }

    let max_exact = num_buckets / 2;
    let offset = if position < max_exact {
        position
    } else {
        let log_ratio = (position as f64 / max_exact as f64).ln()
            / (max_distance as f64 / max_exact as f64).ln();
        let large = max_exact as f64 + log_ratio * (num_buckets - max_exact) as f64;
        (large as i64).min(num_buckets - 1)
    };

    (bucket + offset) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bidirectional_buckets_split_by_sign() {
        assert_eq!(relative_position_bucket(0, true, 32, 128), 0);
        assert_eq!(relative_position_bucket(-1, true, 32, 128), 1);
        assert_eq!(relative_position_bucket(1, true, 32, 128), 17);
        assert_eq!(relative_position_bucket(7, true, 32, 128), 23);
    }

    #[test]
    fn distant_positions_saturate() {
        assert_eq!(relative_position_bucket(-200, true, 32, 128), 15);
        assert_eq!(relative_position_bucket(200, true, 32, 128), 31);
    }

    #[test]
    fn causal_buckets_clamp_future_positions() {
        assert_eq!(relative_position_bucket(1, false, 32, 128), 0);
        assert_eq!(relative_position_bucket(0, false, 32, 128), 0);
        assert_eq!(relative_position_bucket(-1, false, 32, 128), 1);
        assert_eq!(relative_position_bucket(-100, false, 32, 128), 30);
    }

    #[test]
    fn causal_mask_blocks_future_tokens() {
        let mask = create_causal_mask(3, &Device::Cpu).unwrap();
        assert_eq!(mask.dims(), [1, 1, 3, 3]);
        let rows = mask.squeeze(0).unwrap().squeeze(0).unwrap();
        let values = rows.to_vec2::<f32>().unwrap();
        assert_eq!(values[0][0], 0.0);
        assert_eq!(values[0][1], f32::NEG_INFINITY);
        assert_eq!(values[2][1], 0.0);
    }
}
