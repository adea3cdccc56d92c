use candle_core::{Result, Tensor, D};
use candle_nn::{linear, ops, Linear, Module, VarBuilder};

/// Causal self-attention layer
pub struct CausalSelfAttention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    bias: Tensor,
    dropout_p: f32,
}

impl CausalSelfAttention {
    pub fn new(
        n_embd: usize,
        n_head: usize,
        n_positions: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        assert_eq!(n_embd % n_head, 0, "n_embd must be divisible by n_head");

        let c_attn = linear(n_embd, 3 * n_embd, vb.pp("c_attn"))?;
        let c_proj = linear(n_embd, n_embd, vb.pp("c_proj"))?;

        // Lower-triangular causal mask, kept as a plain tensor so it is
        // never treated as a trainable parameter
        let mut mask_data = vec![0f32; n_positions * n_positions];
        for i in 0..n_positions {
            for j in 0..=i {
                mask_data[i * n_positions + j] = 1.0;
            }
        }

        let bias = Tensor::from_vec(mask_data, (1, 1, n_positions, n_positions), vb.device())?;

        Ok(Self {
            c_attn,
            c_proj,
            n_head,
            bias,
            dropout_p: dropout,
        })
    }

    pub fn forward(&self, x: &Tensor, training: bool) -> Result<Tensor> {
        let (b, t, c) = x.dims3()?;
        let head_dim = c / self.n_head;

        // Query, key, values for all heads in one projection
        let qkv = self.c_attn.forward(x)?;
        let q = qkv.narrow(D::Minus1, 0, c)?;
        let k = qkv.narrow(D::Minus1, c, c)?;
        let v = qkv.narrow(D::Minus1, 2 * c, c)?;

        // (B, T, C) -> (B, n_head, T, head_dim)
        let q = q
            .reshape((b, t, self.n_head, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((b, t, self.n_head, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((b, t, self.n_head, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // Attention scores
        let scale = 1.0 / (head_dim as f64).sqrt();
        let att = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?.contiguous()?)? * scale)?;

        // Mask out positions after the current one
        let mask = self
            .bias
            .narrow(2, 0, t)?
            .narrow(3, 0, t)?
            .broadcast_as(att.shape())?;
        let neg_inf = Tensor::new(f32::NEG_INFINITY, att.device())?.broadcast_as(att.shape())?;
        let att = mask.eq(0f32)?.where_cond(&neg_inf, &att)?;

        // Softmax over the key dimension
        let att = ops::softmax_last_dim(&att)?;

        // Dropout (if training)
        let att = if training && self.dropout_p > 0.0 {
            ops::dropout(&att, self.dropout_p)?
        } else {
            att
        };

        // Attention output back to (B, T, C)
        let y = att.matmul(&v)?;
        let y = y.transpose(1, 2)?.contiguous()?.reshape((b, t, c))?;

        // Output projection
        let y = self.c_proj.forward(&y)?;

        // Residual dropout (if training)
        let y = if training && self.dropout_p > 0.0 {
            ops::dropout(&y, self.dropout_p)?
        } else {
            y
        };

        Ok(y)
    }
}
