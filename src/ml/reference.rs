// ============================================================
// Layer 5 — Reference BERT (oracle)
// ============================================================
// The trusted implementation the from-scratch tree is measured
// against. It mirrors every from-scratch function and layer
// signature but:
//
//   • calls the handle's trusted composites (layer_norm,
//     embedding, gelu) instead of rebuilding them
//   • computes attention one head at a time by slicing the hidden
//     axis and concatenating, instead of a batched reshape
//   • names its parameters in the external checkpoint scheme:
//
//       embedding.{token,position,token_type}_embedding.weight
//       transformer.N.attention.pattern.project_{query,key}.*
//       transformer.N.attention.{project_value,project_out}.*
//       transformer.N.layer_norm.*
//       transformer.N.residual.{mlp1,mlp2,layer_norm}.*
//       lm_head.{mlp,layer_norm,unembedding}.*
//       classification_head.*
//
// Parameters are drawn from ParamInit in the same order as the
// from-scratch tree, so the same seed builds identical weights.

use burn::{
    module::{Ignored, Param},
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
};

use crate::domain::error::BertError;
use crate::ml::config::BertConfig;
use crate::ml::init::ParamInit;
use crate::ml::layers::check_indices;
use crate::ml::native::{NativeOps, OpsHandle};

// ─── Functions ───────────────────────────────────────────────────────────────
pub fn gelu<B: Backend, const D: usize>(ops: &dyn NativeOps<B>, x: Tensor<B, D>) -> Tensor<B, D> {
    let dims = x.dims();
    ops.gelu(x.reshape([dims.iter().product::<usize>()])).reshape(dims)
}

/// Pre-softmax scores `[batch, heads, query, key]`, one head at a time.
pub fn raw_attention_pattern<B: Backend>(
    ops:               &dyn NativeOps<B>,
    token_activations: Tensor<B, 3>,
    num_heads:         usize,
    project_query:     &Linear<B>,
    project_key:       &Linear<B>,
) -> Tensor<B, 4> {
    let [batch, seq, hidden] = token_activations.dims();
    let head_size = hidden / num_heads;
    let scale = (head_size as f64).sqrt();

    let q = ops.linear(project_query, token_activations.clone());
    let k = ops.linear(project_key, token_activations);

    let heads: Vec<Tensor<B, 4>> = (0..num_heads)
        .map(|h| {
            let cols = h * head_size..(h + 1) * head_size;
            let q_h = q.clone().slice([0..batch, 0..seq, cols.clone()]);
            let k_h = k.clone().slice([0..batch, 0..seq, cols]);
            q_h.matmul(k_h.swap_dims(1, 2)).div_scalar(scale).unsqueeze_dim::<4>(1)
        })
        .collect();
    Tensor::cat(heads, 1)
}

/// Softmax the pattern, mix values per head, concatenate, project.
pub fn multi_head_self_attention<B: Backend>(
    ops:               &dyn NativeOps<B>,
    token_activations: Tensor<B, 3>,
    num_heads:         usize,
    attention_pattern: Tensor<B, 4>,
    project_value:     &Linear<B>,
    project_out:       &Linear<B>,
    dropout:           &Dropout,
) -> Tensor<B, 3> {
    let [batch, seq, hidden] = token_activations.dims();
    let head_size = hidden / num_heads;

    let probs = dropout.forward(ops.softmax(attention_pattern));
    let v = ops.linear(project_value, token_activations);

    let heads: Vec<Tensor<B, 3>> = (0..num_heads)
        .map(|h| {
            let p_h = probs.clone().slice([0..batch, h..h + 1, 0..seq, 0..seq]).reshape([batch, seq, seq]);
            let v_h = v.clone().slice([0..batch, 0..seq, h * head_size..(h + 1) * head_size]);
            p_h.matmul(v_h)
        })
        .collect();
    ops.linear(project_out, Tensor::cat(heads, 2))
}

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

// ─── RefLayerNorm ────────────────────────────────────────────────────────────
/// Layer norm over the last axis via the trusted composite.
#[derive(Module, Debug)]
pub struct RefLayerNorm<B: Backend> {
    pub weight: Param<Tensor<B, 1>>,
    pub bias:   Param<Tensor<B, 1>>,
    eps:        f64,
    ops:        Ignored<OpsHandle>,
}

impl<B: Backend> RefLayerNorm<B> {
    pub fn new(d: usize, eps: f64, ops: OpsHandle, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([d], device)),
            bias:   Param::from_tensor(Tensor::zeros([d], device)),
            eps,
            ops:    Ignored(ops),
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let dims = x.dims();
        let d = dims[D - 1];
        let rows = dims.iter().product::<usize>() / d;
        self.ops
            .layer_norm(x.reshape([rows, d]), self.weight.val(), self.bias.val(), self.eps)
            .reshape(dims)
    }
}

// ─── RefEmbedding ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct RefEmbedding<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
    ops:        Ignored<OpsHandle>,
}

impl<B: Backend> RefEmbedding<B> {
    pub fn new(n: usize, dim: usize, init: &mut ParamInit, ops: OpsHandle, device: &B::Device) -> Self {
        Self { weight: Param::from_tensor(init.embedding_table(n, dim, device)), ops: Ignored(ops) }
    }

    pub fn forward(&self, indices: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>, BertError> {
        check_indices(&indices, self.weight.dims()[0])?;
        Ok(self.ops.embedding(self.weight.val(), indices))
    }
}

// ─── Attention ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct AttentionPattern<B: Backend> {
    pub project_query: Linear<B>,
    pub project_key:   Linear<B>,
    num_heads:         usize,
    ops:               Ignored<OpsHandle>,
}

impl<B: Backend> AttentionPattern<B> {
    pub fn new(
        hidden:    usize,
        num_heads: usize,
        init:      &mut ParamInit,
        ops:       OpsHandle,
        device:    &B::Device,
    ) -> Self {
        Self {
            project_query: init.linear(hidden, hidden, device),
            project_key:   init.linear(hidden, hidden, device),
            num_heads,
            ops: Ignored(ops),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        raw_attention_pattern(&self.ops.0, x, self.num_heads, &self.project_query, &self.project_key)
    }
}

#[derive(Module, Debug)]
pub struct SelfAttentionLayer<B: Backend> {
    pub pattern:       AttentionPattern<B>,
    pub project_value: Linear<B>,
    pub project_out:   Linear<B>,
    dropout:           Dropout,
    num_heads:         usize,
    ops:               Ignored<OpsHandle>,
}

impl<B: Backend> SelfAttentionLayer<B> {
    pub fn new(
        hidden:    usize,
        num_heads: usize,
        dropout:   f64,
        init:      &mut ParamInit,
        ops:       OpsHandle,
        device:    &B::Device,
    ) -> Self {
        let pattern = AttentionPattern::new(hidden, num_heads, init, ops.clone(), device);
        Self {
            pattern,
            project_value: init.linear(hidden, hidden, device),
            project_out:   init.linear(hidden, hidden, device),
            dropout:       DropoutConfig::new(dropout).init(),
            num_heads,
            ops: Ignored(ops),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let pattern = self.pattern.forward(x.clone());
        multi_head_self_attention(
            &self.ops.0,
            x,
            self.num_heads,
            pattern,
            &self.project_value,
            &self.project_out,
            &self.dropout,
        )
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────
/// `layer_norm(x + mlp2(gelu(mlp1(x))))`
#[derive(Module, Debug)]
pub struct ResidualMlp<B: Backend> {
    pub mlp1:       Linear<B>,
    pub mlp2:       Linear<B>,
    pub layer_norm: RefLayerNorm<B>,
    dropout:        Dropout,
    ops:            Ignored<OpsHandle>,
}

impl<B: Backend> ResidualMlp<B> {
    pub fn new(config: &BertConfig, init: &mut ParamInit, ops: OpsHandle, device: &B::Device) -> Self {
        Self {
            mlp1:       init.linear(config.hidden_size, config.intermediate_size, device),
            mlp2:       init.linear(config.intermediate_size, config.hidden_size, device),
            layer_norm: RefLayerNorm::new(config.hidden_size, config.layer_norm_eps, ops.clone(), device),
            dropout:    DropoutConfig::new(config.dropout).init(),
            ops:        Ignored(ops),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let mlp = bert_mlp(&self.ops.0, x.clone(), &self.mlp1, &self.mlp2, &self.dropout);
        self.layer_norm.forward(x + mlp)
    }
}

#[derive(Module, Debug)]
pub struct ReferenceBlock<B: Backend> {
    pub attention:  SelfAttentionLayer<B>,
    pub layer_norm: RefLayerNorm<B>,
    pub residual:   ResidualMlp<B>,
}

impl<B: Backend> ReferenceBlock<B> {
    pub fn new(config: &BertConfig, init: &mut ParamInit, ops: OpsHandle, device: &B::Device) -> Self {
        let attention = SelfAttentionLayer::new(
            config.hidden_size, config.num_heads, config.dropout, init, ops.clone(), device,
        );
        let layer_norm = RefLayerNorm::new(config.hidden_size, config.layer_norm_eps, ops.clone(), device);
        let residual   = ResidualMlp::new(config, init, ops, device);
        Self { attention, layer_norm, residual }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.layer_norm.forward(x.clone() + self.attention.forward(x));
        self.residual.forward(x)
    }
}

// ─── Embedding front-end ─────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ReferenceEmbedding<B: Backend> {
    pub token_embedding:      RefEmbedding<B>,
    pub position_embedding:   RefEmbedding<B>,
    pub token_type_embedding: RefEmbedding<B>,
    pub layer_norm:           RefLayerNorm<B>,
    dropout:                  Dropout,
}

impl<B: Backend> ReferenceEmbedding<B> {
    pub fn new(config: &BertConfig, init: &mut ParamInit, ops: OpsHandle, device: &B::Device) -> Self {
        let h = config.hidden_size;
        Self {
            token_embedding:      RefEmbedding::new(config.vocab_size, h, init, ops.clone(), device),
            position_embedding:   RefEmbedding::new(config.max_position_embeddings, h, init, ops.clone(), device),
            token_type_embedding: RefEmbedding::new(config.type_vocab_size, h, init, ops.clone(), device),
            layer_norm:           RefLayerNorm::new(h, config.layer_norm_eps, ops, device),
            dropout:              DropoutConfig::new(config.dropout).init(),
        }
    }

    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 3>, BertError> {
        let [batch, seq] = input_ids.dims();
        let max = self.position_embedding.weight.dims()[0];
        if seq > max {
            return Err(BertError::SequenceTooLong { seq_len: seq, max });
        }
        let device = input_ids.device();
        let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &device)
            .unsqueeze::<2>()
            .repeat_dim(0, batch);
        let token_types = token_type_ids.unwrap_or_else(|| Tensor::zeros([batch, seq], &device));

        let x = self.token_embedding.forward(input_ids)?
            + self.position_embedding.forward(positions)?
            + self.token_type_embedding.forward(token_types)?;
        Ok(self.dropout.forward(self.layer_norm.forward(x)))
    }
}

// ─── LM head ─────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LmHead<B: Backend> {
    pub mlp:         Linear<B>,
    pub layer_norm:  RefLayerNorm<B>,
    pub unembedding: Linear<B>,
    ops:             Ignored<OpsHandle>,
}

impl<B: Backend> LmHead<B> {
    pub fn new(config: &BertConfig, init: &mut ParamInit, ops: OpsHandle, device: &B::Device) -> Self {
        Self {
            mlp:         init.linear(config.hidden_size, config.hidden_size, device),
            layer_norm:  RefLayerNorm::new(config.hidden_size, config.layer_norm_eps, ops.clone(), device),
            unembedding: init.linear(config.hidden_size, config.vocab_size, device),
            ops:         Ignored(ops),
        }
    }

    pub fn forward(&self, h: Tensor<B, 3>) -> Tensor<B, 3> {
        let ops = &self.ops.0;
        let x = self.layer_norm.forward(gelu(ops, ops.linear(&self.mlp, h)));
        ops.linear(&self.unembedding, x)
    }
}

// ─── ReferenceBert ───────────────────────────────────────────────────────────
pub struct ReferenceOutput<B: Backend> {
    /// `[batch, seq, vocab]`
    pub logits:         Tensor<B, 3>,
    /// `[batch, num_classes]` when the config asks for a classifier
    pub classification: Option<Tensor<B, 2>>,
}

#[derive(Module, Debug)]
pub struct ReferenceBert<B: Backend> {
    pub embedding:           ReferenceEmbedding<B>,
    pub transformer:         Vec<ReferenceBlock<B>>,
    pub lm_head:             LmHead<B>,
    pub classification_head: Option<Linear<B>>,
    dropout:                 Dropout,
    ops:                     Ignored<OpsHandle>,
}

impl<B: Backend> ReferenceBert<B> {
    pub fn new(
        config: &BertConfig,
        init:   &mut ParamInit,
        ops:    OpsHandle,
        device: &B::Device,
    ) -> Result<Self, BertError> {
        config.validate()?;
        let embedding = ReferenceEmbedding::new(config, init, ops.clone(), device);
        let transformer = (0..config.num_layers)
            .map(|_| ReferenceBlock::new(config, init, ops.clone(), device))
            .collect();
        let lm_head = LmHead::new(config, init, ops.clone(), device);
        let classification_head = config
            .num_classes
            .map(|n| init.linear(config.hidden_size, n, device));
        Ok(Self {
            embedding,
            transformer,
            lm_head,
            classification_head,
            dropout: DropoutConfig::new(config.dropout).init(),
            ops:     Ignored(ops),
        })
    }

    /// Final hidden states `[batch, seq, hidden]`.
    pub fn encode(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 3>, BertError> {
        let mut x = self.embedding.forward(input_ids, token_type_ids)?;
        for block in &self.transformer {
            x = block.forward(x);
        }
        Ok(x)
    }

    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<ReferenceOutput<B>, BertError> {
        let h = self.encode(input_ids, token_type_ids)?;
        let classification = self.classification_head.as_ref().map(|head| {
            let [batch, _, hidden] = h.dims();
            let cls = self.dropout.forward(h.clone().slice([0..batch, 0..1, 0..hidden]));
            let logits = self.ops.linear(head, cls);
            let classes = logits.dims()[2];
            logits.reshape([batch, classes])
        });
        Ok(ReferenceOutput { logits: self.lm_head.forward(h), classification })
    }
}
