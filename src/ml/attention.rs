// ============================================================
// Layer 5 — Multi-Head Self-Attention (from scratch)
// ============================================================
// Two free functions and the layer that composes them:
//
//   raw_attention_pattern   x → Q, K → scores
//                           [batch, heads, query, key], PRE-softmax,
//                           scaled by 1/√head_size
//
//   bert_attention          scores → softmax over key axis
//                           → dropout → Σ weights · V per head
//                           → merge heads → output projection
//
// Heads are split by reshaping the hidden axis to
// [heads, head_size] and moving heads next to batch, so every
// head is one batched matmul:
//
//   [b, s, hidden] → [b, s, h, d] → [b, h, s, d]
//
// Reference: Vaswani et al. (2017) §3.2.2, Devlin et al. (2019)

use burn::{
    module::Ignored,
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
};

use crate::domain::error::BertError;
use crate::ml::init::ParamInit;
use crate::ml::native::{NativeOps, OpsHandle};

/// `[b, s, h·d]` → `[b, h, s, d]`
fn split_heads<B: Backend>(x: Tensor<B, 3>, num_heads: usize) -> Tensor<B, 4> {
    let [batch, seq, hidden] = x.dims();
    x.reshape([batch, seq, num_heads, hidden / num_heads]).swap_dims(1, 2)
}

/// `[b, h, s, d]` → `[b, s, h·d]`
fn merge_heads<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, heads, seq, head_size] = x.dims();
    x.swap_dims(1, 2).reshape([batch, seq, heads * head_size])
}

pub fn check_heads(hidden_size: usize, num_heads: usize) -> Result<usize, BertError> {
    if num_heads == 0 || hidden_size % num_heads != 0 {
        return Err(BertError::InvalidConfig(format!(
            "hidden_size ({hidden_size}) must be divisible by num_heads ({num_heads})"
        )));
    }
    Ok(hidden_size / num_heads)
}

/// Scaled dot-product scores, before softmax.
///
/// Returns `[batch, num_heads, query_pos, key_pos]`.
pub fn raw_attention_pattern<B: Backend>(
    ops:               &dyn NativeOps<B>,
    token_activations: Tensor<B, 3>,
    num_heads:         usize,
    project_query:     &Linear<B>,
    project_key:       &Linear<B>,
) -> Tensor<B, 4> {
    let head_size = token_activations.dims()[2] / num_heads;

    let q = split_heads(ops.linear(project_query, token_activations.clone()), num_heads);
    let k = split_heads(ops.linear(project_key, token_activations), num_heads);

    q.matmul(k.transpose()).div_scalar((head_size as f64).sqrt())
}

/// Mix value vectors by the softmaxed pattern and project out.
///
/// `attention_pattern` is `[batch, num_heads, query_pos, key_pos]`,
/// softmax runs over `key_pos`. Output has the input's shape.
pub fn bert_attention<B: Backend>(
    ops:               &dyn NativeOps<B>,
    token_activations: Tensor<B, 3>,
    num_heads:         usize,
    attention_pattern: Tensor<B, 4>,
    project_value:     &Linear<B>,
    project_output:    &Linear<B>,
    dropout:           &Dropout,
) -> Tensor<B, 3> {
    let weights = dropout.forward(ops.softmax(attention_pattern));
    let values  = split_heads(ops.linear(project_value, token_activations), num_heads);

    // [b,h,q,k] @ [b,h,k,d] → [b,h,q,d]
    let mixed = merge_heads(weights.matmul(values));
    ops.linear(project_output, mixed)
}

// ─── MultiHeadedSelfAttention ────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct MultiHeadedSelfAttention<B: Backend> {
    pub project_query:  Linear<B>,
    pub project_key:    Linear<B>,
    pub project_value:  Linear<B>,
    pub project_output: Linear<B>,
    dropout:            Dropout,
    num_heads:          usize,
    ops:                Ignored<OpsHandle>,
}

impl<B: Backend> MultiHeadedSelfAttention<B> {
    pub fn new(
        hidden_size: usize,
        num_heads:   usize,
        dropout:     f64,
        init:        &mut ParamInit,
        ops:         OpsHandle,
        device:      &B::Device,
    ) -> Result<Self, BertError> {
        check_heads(hidden_size, num_heads)?;
        Ok(Self {
            project_query:  init.linear(hidden_size, hidden_size, device),
            project_key:    init.linear(hidden_size, hidden_size, device),
            project_value:  init.linear(hidden_size, hidden_size, device),
            project_output: init.linear(hidden_size, hidden_size, device),
            dropout:        DropoutConfig::new(dropout).init(),
            num_heads,
            ops:            Ignored(ops),
        })
    }

    /// Post-softmax weights, `[batch, heads, query, key]`.
    #[cfg(test)]
    pub fn attention_probs(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let pattern = self.pattern(x);
        self.ops.softmax(pattern)
    }

    fn pattern(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        raw_attention_pattern(
            &self.ops.0, x, self.num_heads, &self.project_query, &self.project_key,
        )
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let pattern = self.pattern(x.clone());
        bert_attention(
            &self.ops.0,
            x,
            self.num_heads,
            pattern,
            &self.project_value,
            &self.project_output,
            &self.dropout,
        )
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tolerance::Tolerance;
    use crate::ml::harness::{assert_no_delegation, assert_tensors_close};
    use crate::ml::native::{BurnOps, CountingOps, Primitive};
    use crate::ml::params::{tensor_values, Parameterized};
    use crate::ml::reference;
    use burn::backend::NdArray;

    type TB = NdArray;

    const HIDDEN: usize = 768;
    const HEADS:  usize = 12;

    fn activations(seed: u64, batch: usize, seq: usize) -> Tensor<TB, 3> {
        ParamInit::seeded(seed).uniform([batch, seq, HIDDEN], 1.0, &Default::default())
    }

    #[test]
    fn attention_pattern_matches_reference() {
        let device = Default::default();
        let mut init = ParamInit::seeded(0);
        let project_query: Linear<TB> = init.linear(HIDDEN, HIDDEN, &device);
        let project_key:   Linear<TB> = init.linear(HIDDEN, HIDDEN, &device);
        let x = activations(1, 2, 3);

        let ours = raw_attention_pattern(&BurnOps, x.clone(), HEADS, &project_query, &project_key);
        let theirs = reference::raw_attention_pattern(&BurnOps, x, HEADS, &project_query, &project_key);
        assert_eq!(ours.dims(), [2, HEADS, 3, 3]);
        assert_tensors_close(ours, theirs, Tolerance::DEFAULT);
    }

    #[test]
    fn attention_fn_matches_reference() {
        let device = Default::default();
        let mut init = ParamInit::seeded(0);
        let project_value:  Linear<TB> = init.linear(HIDDEN, HIDDEN, &device);
        let project_output: Linear<TB> = init.linear(HIDDEN, HIDDEN, &device);
        let pattern: Tensor<TB, 4> = init.uniform([2, HEADS, 3, 3], 1.0, &device).abs();
        let dropout = DropoutConfig::new(0.1).init();
        let x = activations(2, 2, 3);

        let ours = bert_attention(
            &BurnOps, x.clone(), HEADS, pattern.clone(), &project_value, &project_output, &dropout,
        );
        let theirs = reference::multi_head_self_attention(
            &BurnOps, x, HEADS, pattern, &project_value, &project_output, &dropout,
        );
        assert_tensors_close(ours, theirs, Tolerance::DEFAULT);
    }

    #[test]
    fn layer_matches_reference_layer() {
        let device = Default::default();
        let ours = MultiHeadedSelfAttention::<TB>::new(
            HIDDEN, HEADS, 0.0, &mut ParamInit::seeded(0), BurnOps::handle(), &device,
        )
        .unwrap();
        let theirs = reference::SelfAttentionLayer::<TB>::new(
            HIDDEN, HEADS, 0.0, &mut ParamInit::seeded(0), BurnOps::handle(), &device,
        );
        let x = ParamInit::seeded(5).uniform([2, 3, HIDDEN], 1.0, &device).abs();
        assert_tensors_close(ours.forward(x.clone()), theirs.forward(x), Tolerance::DEFAULT);
    }

    #[test]
    fn output_shape_equals_input_shape() {
        let device = Default::default();
        let attn = MultiHeadedSelfAttention::<TB>::new(
            64, 4, 0.1, &mut ParamInit::seeded(0), BurnOps::handle(), &device,
        )
        .unwrap();
        let x = ParamInit::seeded(1).uniform([3, 7, 64], 1.0, &device);
        assert_eq!(attn.forward(x).dims(), [3, 7, 64]);
    }

    #[test]
    fn softmax_weights_sum_to_one_per_query() {
        let device = Default::default();
        let attn = MultiHeadedSelfAttention::<TB>::new(
            64, 4, 0.0, &mut ParamInit::seeded(0), BurnOps::handle(), &device,
        )
        .unwrap();
        let x = ParamInit::seeded(1).normal([2, 5, 64], 1.0, &device);
        let probs = tensor_values(attn.attention_probs(x)).unwrap();

        // [2, 4, 5, 5]: every run of 5 is one query's distribution
        for row in probs.chunks(5) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "row sums to {sum}");
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn uses_handle_for_projections_and_softmax() {
        let device = Default::default();
        let counter = CountingOps::new();
        let attn = MultiHeadedSelfAttention::<TB>::new(
            32, 4, 0.0, &mut ParamInit::seeded(0), counter.handle(), &device,
        )
        .unwrap();
        let _ = attn.forward(ParamInit::seeded(1).normal([1, 3, 32], 1.0, &device));
        assert_eq!(counter.calls(Primitive::Linear), 4);
        assert_eq!(counter.calls(Primitive::Softmax), 1);
        assert_no_delegation(&counter);
    }

    #[test]
    fn indivisible_heads_fail_at_construction() {
        let result = MultiHeadedSelfAttention::<TB>::new(
            100, 12, 0.0, &mut ParamInit::seeded(0), BurnOps::handle(), &Default::default(),
        );
        assert!(matches!(result, Err(BertError::InvalidConfig(_))));
    }

    #[test]
    fn parameter_paths() {
        let attn = MultiHeadedSelfAttention::<TB>::new(
            8, 2, 0.0, &mut ParamInit::seeded(0), BurnOps::handle(), &Default::default(),
        )
        .unwrap();
        assert_eq!(
            attn.parameter_paths(),
            [
                "project_query.weight", "project_query.bias",
                "project_key.weight", "project_key.bias",
                "project_value.weight", "project_value.bias",
                "project_output.weight", "project_output.bias",
            ],
        );
    }
}
