use candle_core::{IndexOp, Result, Tensor};
use candle_nn::{embedding, layer_norm, ops, Embedding, LayerNorm, Linear, Module, VarBuilder};
use rand::{thread_rng, Rng};

use super::block::Block;
use crate::config::Config;

/// GPT Language Model
pub struct GPT {
    wte: Embedding,   // token embeddings
    wpe: Embedding,   // position embeddings
    h: Vec<Block>,    // transformer blocks
    ln_f: LayerNorm,  // final layer norm
    lm_head: Linear,  // output projection, weight-tied to wte
    drop: f32,
    n_positions: usize,
    device: candle_core::Device,
}

impl GPT {
    /// Create a new GPT model
    ///
    /// The language-modeling head shares its weight matrix with the token
    /// embedding, so no `lm_head` parameter is ever created or stored.
    pub fn new(config: &Config, vb: VarBuilder) -> Result<Self> {
        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;

        let mut h = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            h.push(Block::new(
                config.n_embd,
                config.n_head,
                config.n_positions,
                config.dropout,
                vb.pp(format!("h.{}", i)),
            )?);
        }

        let ln_f = layer_norm(config.n_embd, 1e-5, vb.pp("ln_f"))?;

        let lm_head = Linear::new(wte.embeddings().clone(), None);

        Ok(Self {
            wte,
            wpe,
            h,
            ln_f,
            lm_head,
            drop: config.dropout,
            n_positions: config.n_positions,
            device: vb.device().clone(),
        })
    }

    /// Maximum sequence length the model can attend over
    pub fn n_positions(&self) -> usize {
        self.n_positions
    }

    /// Forward pass
    ///
    /// Returns logits of shape (batch, seq_len, vocab_size) and, when targets
    /// are given, the cross-entropy loss over all positions.
    pub fn forward(
        &self,
        idx: &Tensor,
        targets: Option<&Tensor>,
        training: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (b, t) = idx.dims2()?;
        if t > self.n_positions {
            candle_core::bail!(
                "cannot forward sequence of length {}, maximum is {}",
                t,
                self.n_positions
            );
        }

        // Token embeddings
        let tok_emb = self.wte.forward(idx)?;

        // Position embeddings, broadcast over the batch
        let pos = Tensor::arange(0i64, t as i64, &self.device)?.unsqueeze(0)?;
        let pos_emb = self.wpe.forward(&pos)?;

        let mut x = tok_emb.broadcast_add(&pos_emb)?;

        // Dropout (if training)
        if training && self.drop > 0.0 {
            x = ops::dropout(&x, self.drop)?;
        }

        // Pass through transformer blocks
        for block in &self.h {
            x = block.forward(&x, training)?;
        }

        // Final layer norm
        x = self.ln_f.forward(&x)?;

        // Language modeling head: x @ wte.weight^T
        let logits = self.lm_head.forward(&x)?;

        // Calculate loss if targets provided
        let loss = if let Some(targets) = targets {
            let vocab_size = logits.dims()[2];
            let logits_view = logits.reshape((b * t, vocab_size))?;
            let targets_view = targets.reshape((b * t,))?;

            Some(candle_nn::loss::cross_entropy(&logits_view, &targets_view)?)
        } else {
            None
        };

        Ok((logits, loss))
    }

    /// Generate text autoregressively
    ///
    /// Completes the conditioning sequence with `max_new_tokens` tokens,
    /// feeding each prediction back into the model. The conditioning window
    /// is cropped to the last `n_positions` tokens when the sequence grows
    /// past the context size.
    pub fn generate(
        &self,
        idx: &Tensor,
        max_new_tokens: usize,
        temperature: f64,
        top_k: Option<usize>,
    ) -> Result<Tensor> {
        let mut idx = idx.clone();
        let mut rng = thread_rng();

        for _ in 0..max_new_tokens {
            // Crop idx to the last n_positions tokens if necessary
            let seq_len = idx.dims()[1];
            let idx_cond = if seq_len <= self.n_positions {
                idx.clone()
            } else {
                idx.i((.., seq_len - self.n_positions..))?
            };

            // Forward pass
            let (logits, _) = self.forward(&idx_cond, None, false)?;

            // Logits for the last position only
            let last = logits.i((.., logits.dims()[1] - 1, ..))?;

            // Scale by temperature
            let last = if temperature != 1.0 {
                (last / temperature)?
            } else {
                last
            };

            // Convert to probabilities
            let probs = ops::softmax_last_dim(&last)?;

            // Sample the next token for every row of the batch
            let rows = probs.to_vec2::<f32>()?;
            let next_ids: Vec<i64> = rows
                .iter()
                .map(|row| sample_from_probs(row, top_k, &mut rng) as i64)
                .collect();
            let batch = next_ids.len();
            let idx_next = Tensor::from_vec(next_ids, (batch, 1), &self.device)?;

            // Append sampled indices to the running sequence
            idx = Tensor::cat(&[&idx, &idx_next], 1)?;
        }

        Ok(idx)
    }
}

/// Sample an index from a probability distribution, optionally restricted to
/// the k most likely candidates
fn sample_from_probs(probs: &[f32], top_k: Option<usize>, rng: &mut impl Rng) -> usize {
    let mut indices: Vec<usize> = (0..probs.len()).collect();
    indices.sort_by(|&a, &b| {
        probs[b]
            .partial_cmp(&probs[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // k == 0 or k >= vocab means no filtering
    if let Some(k) = top_k {
        if k > 0 && k < indices.len() {
            indices.truncate(k);
        }
    }

    // Renormalize over the kept candidates and draw
    let total: f32 = indices.iter().map(|&i| probs[i]).sum();
    if total <= 0.0 {
        return indices[0];
    }

    let mut sample = rng.gen::<f32>() * total;
    for &i in &indices {
        sample -= probs[i];
        if sample <= 0.0 {
            return i;
        }
    }

    indices[indices.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ModelSize};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn tiny_config() -> Config {
        let mut config = Config::new(ModelSize::Small, 42);
        config.vocab_size = 32;
        config.n_embd = 16;
        config.n_layer = 2;
        config.n_head = 2;
        config.n_positions = 16;
        config.dropout = 0.0;
        config.device = Some(Device::Cpu);
        config
    }

    fn tiny_model(config: &Config) -> (GPT, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = GPT::new(config, vb).unwrap();
        (model, varmap)
    }

    #[test]
    fn test_forward_shape() {
        let config = tiny_config();
        let (model, _varmap) = tiny_model(&config);

        let idx = Tensor::zeros((2, 8), DType::I64, &Device::Cpu).unwrap();
        let (logits, loss) = model.forward(&idx, None, false).unwrap();

        assert_eq!(logits.dims(), &[2, 8, 32]);
        assert!(loss.is_none());
    }

    #[test]
    fn test_forward_loss_is_finite() {
        let config = tiny_config();
        let (model, _varmap) = tiny_model(&config);

        let idx = Tensor::zeros((2, 8), DType::I64, &Device::Cpu).unwrap();
        let targets = Tensor::ones((2, 8), DType::I64, &Device::Cpu).unwrap();
        let (_logits, loss) = model.forward(&idx, Some(&targets), true).unwrap();

        let loss = loss.unwrap().to_scalar::<f32>().unwrap();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn test_forward_rejects_long_sequence() {
        let config = tiny_config();
        let (model, _varmap) = tiny_model(&config);

        let idx = Tensor::zeros((1, 17), DType::I64, &Device::Cpu).unwrap();
        assert!(model.forward(&idx, None, false).is_err());
    }

    #[test]
    fn test_generate_appends_tokens() {
        let config = tiny_config();
        let (model, _varmap) = tiny_model(&config);

        let idx = Tensor::zeros((1, 4), DType::I64, &Device::Cpu).unwrap();
        let out = model.generate(&idx, 5, 1.0, Some(10)).unwrap();

        assert_eq!(out.dims(), &[1, 9]);
    }

    #[test]
    fn test_generate_crops_past_context() {
        let config = tiny_config();
        let (model, _varmap) = tiny_model(&config);

        // 10 prompt tokens + 10 generated pushes past n_positions = 16
        let idx = Tensor::zeros((1, 10), DType::I64, &Device::Cpu).unwrap();
        let out = model.generate(&idx, 10, 0.8, Some(5)).unwrap();

        assert_eq!(out.dims(), &[1, 20]);
    }

    #[test]
    fn test_no_separate_lm_head_parameter() {
        let config = tiny_config();
        let (_model, varmap) = tiny_model(&config);

        let data = varmap.data().lock().unwrap();
        assert!(data.keys().all(|name| !name.contains("lm_head")));
        assert!(data.contains_key("wte.weight"));
    }

    #[test]
    fn test_sample_peaked_distribution() {
        let mut rng = thread_rng();
        let probs = vec![0.0, 0.0, 1.0, 0.0];
        for _ in 0..20 {
            assert_eq!(sample_from_probs(&probs, None, &mut rng), 2);
        }
    }

    #[test]
    fn test_sample_top_k_one_is_argmax() {
        let mut rng = thread_rng();
        let probs = vec![0.1, 0.4, 0.2, 0.3];
        for _ in 0..20 {
            assert_eq!(sample_from_probs(&probs, Some(1), &mut rng), 1);
        }
    }

    #[test]
    fn test_sample_top_k_excludes_tail() {
        let mut rng = thread_rng();
        let probs = vec![0.4, 0.3, 0.2, 0.1];
        for _ in 0..50 {
            let picked = sample_from_probs(&probs, Some(2), &mut rng);
            assert!(picked == 0 || picked == 1, "sampled outside top-2: {}", picked);
        }
    }

    #[test]
    fn test_sample_top_k_zero_disables_filtering() {
        let mut rng = thread_rng();
        let probs = vec![0.0, 0.0, 0.0, 1.0];
        assert_eq!(sample_from_probs(&probs, Some(0), &mut rng), 3);
    }
}
