// ============================================================
// Layer 5 — Feed-Forward and Encoder Block (from scratch)
// ============================================================
// Post-norm BERT block: each sub-layer's output is added back
// onto its input, then normalised.
//
//   x  ──► attention ──► (+x) ──► layernorm1 ──► x'
//   x' ──► mlp       ──► (+x') ─► layernorm2 ──► out
//
// The MLP widens to intermediate_size, applies GELU and
// projects back:  dropout(lin2(gelu(lin1(x)))).

use burn::{
    module::Ignored,
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
};

use crate::domain::error::BertError;
use crate::ml::attention::MultiHeadedSelfAttention;
use crate::ml::config::BertConfig;
use crate::ml::init::ParamInit;
use crate::ml::layers::{gelu, LayerNorm};
use crate::ml::native::{NativeOps, OpsHandle};

pub fn bert_mlp<B: Backend>(
    ops:      &dyn NativeOps<B>,
    x:        Tensor<B, 3>,
    linear_1: &Linear<B>,
    linear_2: &Linear<B>,
    dropout:  &Dropout,
) -> Tensor<B, 3> {
    let hidden = gelu(ops, ops.linear(linear_1, x));
    dropout.forward(ops.linear(linear_2, hidden))
}

// ─── BertMlp ─────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertMlp<B: Backend> {
    pub lin1: Linear<B>,
    pub lin2: Linear<B>,
    dropout:  Dropout,
    ops:      Ignored<OpsHandle>,
}

impl<B: Backend> BertMlp<B> {
    pub fn new(
        hidden_size:       usize,
        intermediate_size: usize,
        dropout:           f64,
        init:              &mut ParamInit,
        ops:               OpsHandle,
        device:            &B::Device,
    ) -> Self {
        Self {
            lin1:    init.linear(hidden_size, intermediate_size, device),
            lin2:    init.linear(intermediate_size, hidden_size, device),
            dropout: DropoutConfig::new(dropout).init(),
            ops:     Ignored(ops),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        bert_mlp(&self.ops.0, x, &self.lin1, &self.lin2, &self.dropout)
    }
}

// ─── BertBlock ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertBlock<B: Backend> {
    pub attention:  MultiHeadedSelfAttention<B>,
    pub layernorm1: LayerNorm<B>,
    pub mlp:        BertMlp<B>,
    pub layernorm2: LayerNorm<B>,
}

impl<B: Backend> BertBlock<B> {
    pub fn new(
        config: &BertConfig,
        init:   &mut ParamInit,
        ops:    OpsHandle,
        device: &B::Device,
    ) -> Result<Self, BertError> {
        let h = config.hidden_size;
        let attention = MultiHeadedSelfAttention::new(
            h, config.num_heads, config.dropout, init, ops.clone(), device,
        )?;
        let layernorm1 = LayerNorm::new(&[h], config.layer_norm_eps, ops.clone(), device);
        let mlp = BertMlp::new(h, config.intermediate_size, config.dropout, init, ops.clone(), device);
        let layernorm2 = LayerNorm::new(&[h], config.layer_norm_eps, ops, device);
        Ok(Self { attention, layernorm1, mlp, layernorm2 })
    }

    /// `[batch, seq, hidden]` → same shape.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.layernorm1.forward(x.clone() + self.attention.forward(x));
        self.layernorm2.forward(x.clone() + self.mlp.forward(x))
    }
}
