// ============================================================
// Layer 5 — BERT Encoder (from scratch)
// ============================================================
// input_ids [batch, seq]
//   └─► BertEmbedding   token + position + token_type → LN → dropout
//   └─► BertBlock × N   post-norm attention + MLP
//   └─► LM head         unembed(layer_norm(gelu(lin(h))))
//        → logits [batch, seq, vocab]
//
// BertWithClassify adds one projection on the first position:
//   classification_head(dropout(h[:, 0])) → [batch, num_classes]
//
// Parameter paths (what the KeyMapper targets):
//   embed.{token_embedding,pos_embedding,token_type_embedding,layer_norm}.*
//   blocks.N.{attention,layernorm1,mlp,layernorm2}.*
//   lin.*, layer_norm.*, unembed.*
// and for the classifier, the same under `bert.` plus
// classification_head.*
//
// An empty batch or an empty sequence short-circuits to an empty
// output of the right shape.

use burn::{
    module::Ignored,
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
};

use crate::domain::error::BertError;
use crate::ml::block::BertBlock;
use crate::ml::config::BertConfig;
use crate::ml::init::ParamInit;
use crate::ml::layers::{is_empty, Embedding, Gelu, LayerNorm};
use crate::ml::native::{NativeOps, OpsHandle};

// ─── BertEmbedding ───────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertEmbedding<B: Backend> {
    pub token_embedding:      Embedding<B>,
    pub pos_embedding:        Embedding<B>,
    pub token_type_embedding: Embedding<B>,
    pub layer_norm:           LayerNorm<B>,
    dropout:                  Dropout,
}

impl<B: Backend> BertEmbedding<B> {
    pub fn new(config: &BertConfig, init: &mut ParamInit, ops: OpsHandle, device: &B::Device) -> Self {
        let h = config.hidden_size;
        Self {
            token_embedding:      Embedding::new(config.vocab_size, h, init, ops.clone(), device),
            pos_embedding:        Embedding::new(config.max_position_embeddings, h, init, ops.clone(), device),
            token_type_embedding: Embedding::new(config.type_vocab_size, h, init, ops.clone(), device),
            layer_norm:           LayerNorm::new(&[h], config.layer_norm_eps, ops, device),
            dropout:              DropoutConfig::new(config.dropout).init(),
        }
    }

    /// `token_type_ids` defaults to all zeros (single segment).
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 3>, BertError> {
        let [batch_size, seq_len] = input_ids.dims();
        let max = self.pos_embedding.num_embeddings();
        if seq_len > max {
            return Err(BertError::SequenceTooLong { seq_len, max });
        }
        if let Some(types) = &token_type_ids {
            if types.dims() != [batch_size, seq_len] {
                return Err(BertError::ShapeMismatch {
                    context:  "token_type_ids".into(),
                    expected: vec![batch_size, seq_len],
                    actual:   types.dims().to_vec(),
                });
            }
        }

        let device = input_ids.device();
        if is_empty(&[batch_size, seq_len]) {
            let hidden = self.token_embedding.embedding_dim();
            return Ok(Tensor::zeros([batch_size, seq_len, hidden], &device));
        }

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .repeat_dim(0, batch_size);
        let token_types = token_type_ids.unwrap_or_else(|| Tensor::zeros([batch_size, seq_len], &device));

        let tokens: Tensor<B, 3>    = self.token_embedding.forward(input_ids)?;
        let positions: Tensor<B, 3> = self.pos_embedding.forward(positions)?;
        let types: Tensor<B, 3>     = self.token_type_embedding.forward(token_types)?;
        Ok(self.dropout.forward(self.layer_norm.forward(tokens + positions + types)))
    }
}

// ─── Bert ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Bert<B: Backend> {
    pub embed:      BertEmbedding<B>,
    pub blocks:     Vec<BertBlock<B>>,
    pub lin:        Linear<B>,
    pub gelu:       Gelu,
    pub layer_norm: LayerNorm<B>,
    pub unembed:    Linear<B>,
    ops:            Ignored<OpsHandle>,
}

impl<B: Backend> Bert<B> {
    /// Validates `config` before allocating any parameter.
    pub fn new(
        config: &BertConfig,
        init:   &mut ParamInit,
        ops:    OpsHandle,
        device: &B::Device,
    ) -> Result<Self, BertError> {
        config.validate()?;
        let h = config.hidden_size;

        let embed = BertEmbedding::new(config, init, ops.clone(), device);
        let blocks = (0..config.num_layers)
            .map(|_| BertBlock::new(config, init, ops.clone(), device))
            .collect::<Result<Vec<_>, _>>()?;
        let lin        = init.linear(h, h, device);
        let layer_norm = LayerNorm::new(&[h], config.layer_norm_eps, ops.clone(), device);
        let unembed    = init.linear(h, config.vocab_size, device);

        Ok(Self { embed, blocks, lin, gelu: Gelu::new(ops.clone()), layer_norm, unembed, ops: Ignored(ops) })
    }

    /// Final hidden states `[batch, seq, hidden]`, before the LM head.
    pub fn encode(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 3>, BertError> {
        let mut x = self.embed.forward(input_ids, token_type_ids)?;
        if is_empty(&x.dims()) {
            return Ok(x);
        }
        for block in &self.blocks {
            x = block.forward(x);
        }
        Ok(x)
    }

    /// Vocabulary logits for hidden states.
    pub fn lm_head(&self, h: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch_size, seq_len, _] = h.dims();
        if is_empty(&[batch_size, seq_len]) {
            let vocab = self.unembed.weight.dims()[1];
            return Tensor::zeros([batch_size, seq_len, vocab], &h.device());
        }
        let x = self.gelu.forward(self.ops.linear(&self.lin, h));
        self.ops.linear(&self.unembed, self.layer_norm.forward(x))
    }

    /// input_ids: [batch, seq] → logits: [batch, seq, vocab]
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 3>, BertError> {
        Ok(self.lm_head(self.encode(input_ids, token_type_ids)?))
    }
}

// ─── BertWithClassify ────────────────────────────────────────────────────────
pub struct BertClassifyOutput<B: Backend> {
    /// `[batch, seq, vocab]`
    pub logits:   Tensor<B, 3>,
    /// `[batch, num_classes]`
    pub classifs: Tensor<B, 2>,
}

/// Bert plus a classifier on position 0.
#[derive(Module, Debug)]
pub struct BertWithClassify<B: Backend> {
    pub bert:                Bert<B>,
    pub classification_head: Linear<B>,
    dropout:                 Dropout,
}

impl<B: Backend> BertWithClassify<B> {
    /// `config.num_classes` must be set.
    pub fn new(
        config: &BertConfig,
        init:   &mut ParamInit,
        ops:    OpsHandle,
        device: &B::Device,
    ) -> Result<Self, BertError> {
        let num_classes = config.num_classes.ok_or_else(|| {
            BertError::InvalidConfig("BertWithClassify needs num_classes".into())
        })?;
        let bert = Bert::new(config, init, ops, device)?;
        Ok(Self {
            bert,
            classification_head: init.linear(config.hidden_size, num_classes, device),
            dropout:             DropoutConfig::new(config.dropout).init(),
        })
    }

    /// Class scores `[batch, num_classes]`; the LM head never runs.
    pub fn classify(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 2>, BertError> {
        self.classify_hidden(self.bert.encode(input_ids, token_type_ids)?)
    }

    /// Both heads over one encoder pass.
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<BertClassifyOutput<B>, BertError> {
        let h = self.bert.encode(input_ids, token_type_ids)?;
        let classifs = self.classify_hidden(h.clone())?;
        Ok(BertClassifyOutput { logits: self.bert.lm_head(h), classifs })
    }

    fn classify_hidden(&self, h: Tensor<B, 3>) -> Result<Tensor<B, 2>, BertError> {
        let [batch_size, seq_len, hidden] = h.dims();
        let num_classes = self.classification_head.weight.dims()[1];
        if batch_size == 0 {
            return Ok(Tensor::zeros([0, num_classes], &h.device()));
        }
        if seq_len == 0 {
            return Err(BertError::EmptyInput("classification reads position 0".into()));
        }

        // Position 0 summarises the sequence
        let first = self.dropout.forward(h.slice([0..batch_size, 0..1, 0..hidden]));
        let classifs = self.bert.ops.linear(&self.classification_head, first);
        Ok(classifs.reshape([batch_size, num_classes]))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::data::{batcher::IdBatcher, sequences::RandomSequences};
    use crate::domain::{key_mapper::KeyMapper, tolerance::Tolerance};
    use crate::ml::harness::{assert_no_delegation, assert_tensors_close};
    use crate::domain::state_dict::ParamData;
    use crate::ml::native::{BurnOps, CountingOps, Primitive};
    use crate::ml::params::{tensor_values, Parameterized};
    use crate::ml::reference::ReferenceBert;

    type TB = burn::backend::NdArray;

    fn small() -> BertConfig {
        BertConfig::new(100, 32, 64, 2, 4, 24, 2)
    }

    fn ids(rows: Vec<Vec<u32>>) -> Tensor<TB, 2, Int> {
        IdBatcher::new(Default::default()).batch(&rows).unwrap()
    }

    fn pair(config: &BertConfig, seed: u64) -> (Bert<TB>, ReferenceBert<TB>) {
        let device = Default::default();
        let ours   = Bert::new(config, &mut ParamInit::seeded(seed), BurnOps::handle(), &device).unwrap();
        let theirs = ReferenceBert::new(config, &mut ParamInit::seeded(seed), BurnOps::handle(), &device).unwrap();
        (ours, theirs)
    }

    #[test]
    fn seeded_logits_match_reference() {
        let (ours, theirs) = pair(&small(), 0);
        let input = ids(RandomSequences::seeded(9).next_batch(2, 7, 100));

        let logits = ours.forward(input.clone(), None).unwrap();
        assert_eq!(logits.dims(), [2, 7, 100]);
        assert_tensors_close(logits, theirs.forward(input, None).unwrap().logits, Tolerance::DEFAULT);
    }

    #[test]
    fn token_types_reach_the_output() {
        let (ours, theirs) = pair(&small(), 0);
        let input = ids(vec![vec![5, 6, 7, 8]]);
        let types = ids(vec![vec![0, 0, 1, 1]]);

        let with_types = ours.forward(input.clone(), Some(types.clone())).unwrap();
        let without    = ours.forward(input.clone(), None).unwrap();
        assert!(crate::ml::harness::check_tensors_close(with_types.clone(), without, Tolerance::DEFAULT).is_err());

        let oracle = theirs.forward(input, Some(types)).unwrap().logits;
        assert_tensors_close(with_types, oracle, Tolerance::DEFAULT);
    }

    #[test]
    fn classifier_matches_reference() {
        let config = small().with_num_classes(Some(3));
        let device = Default::default();
        let ours   = BertWithClassify::<TB>::new(&config, &mut ParamInit::seeded(4), BurnOps::handle(), &device).unwrap();
        let theirs = ReferenceBert::<TB>::new(&config, &mut ParamInit::seeded(4), BurnOps::handle(), &device).unwrap();
        let input = ids(RandomSequences::seeded(1).next_batch(3, 5, 100));

        let out    = ours.forward(input.clone(), None).unwrap();
        let oracle = theirs.forward(input, None).unwrap();
        assert_eq!(out.classifs.dims(), [3, 3]);
        assert_tensors_close(out.logits, oracle.logits, Tolerance::DEFAULT);
        let expected = oracle.classification.expect("oracle built with a classifier");
        assert_tensors_close(out.classifs, expected, Tolerance::DEFAULT);
    }

    #[test]
    fn classifier_requires_num_classes() {
        let result = BertWithClassify::<TB>::new(&small(), &mut ParamInit::seeded(0), BurnOps::handle(), &Default::default());
        assert!(matches!(result, Err(BertError::InvalidConfig(_))));
    }

    #[test]
    fn full_model_never_calls_trusted_composites() {
        let counter = CountingOps::new();
        let config = small().with_num_classes(Some(2));
        let model = BertWithClassify::<TB>::new(&config, &mut ParamInit::seeded(0), counter.handle(), &Default::default())
            .unwrap();
        let _ = model.forward(ids(vec![vec![1, 2, 3, 4, 5]]), None).unwrap();

        assert_no_delegation(&counter);
        assert_eq!(counter.calls(Primitive::GatherRows), 3);
        assert_eq!(counter.calls(Primitive::Softmax), 2);
        assert_eq!(counter.calls(Primitive::Erf), 2 + 1);
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let result = Bert::<TB>::new(
            &BertConfig { num_heads: 3, ..small() }, &mut ParamInit::seeded(0), BurnOps::handle(), &Default::default(),
        );
        assert!(matches!(result, Err(BertError::InvalidConfig(_))));
    }

    #[test]
    fn overlong_sequence_and_bad_ids_are_errors() {
        let (ours, _) = pair(&small(), 0);
        let long = Tensor::<TB, 2, Int>::zeros([1, 25], &Default::default());
        assert!(matches!(ours.forward(long, None), Err(BertError::SequenceTooLong { seq_len: 25, max: 24 })));
        assert!(matches!(
            ours.forward(ids(vec![vec![1, 100]]), None),
            Err(BertError::IndexOutOfRange { index: 100, num_embeddings: 100 }),
        ));
    }

    #[test]
    fn mapped_reference_keys_cover_the_tree_exactly() {
        let (ours, theirs) = pair(&small(), 0);
        let mapper = KeyMapper::bert();

        let mapped: BTreeSet<String> = theirs.parameter_paths().iter().filter_map(|k| mapper.map_or_drop(k)).collect();
        let expected: BTreeSet<String> = ours.parameter_paths().into_iter().collect();
        assert_eq!(mapped, expected);
        assert_eq!(ours.num_params(), theirs.num_params());
    }

    #[test]
    fn transplanted_weights_reproduce_reference_logits() {
        let config = small();
        let device = Default::default();
        // Different seeds: agreement below can only come from the transplant
        let mut ours   = Bert::<TB>::new(&config, &mut ParamInit::seeded(2), BurnOps::handle(), &device).unwrap();
        let mut theirs = ReferenceBert::<TB>::new(&config, &mut ParamInit::seeded(1), BurnOps::handle(), &device).unwrap();

        let pretrained = ParamInit::seeded(3).perturb_state(&theirs.state_dict().unwrap(), 0.05);
        theirs.load_state_dict(pretrained.clone()).unwrap();
        ours.load_state_dict(KeyMapper::bert().map_state(pretrained).unwrap()).unwrap();

        let mut rng = RandomSequences::seeded(10);
        for _ in 0..10 {
            let input = ids(rng.next_batch(1, 20, config.vocab_size));
            assert_tensors_close(
                ours.forward(input.clone(), None).unwrap(),
                theirs.forward(input, None).unwrap().logits,
                Tolerance::PRETRAINED,
            );
        }
    }

    #[test]
    fn transplant_with_missing_key_leaves_model_untouched() {
        let (mut ours, theirs) = pair(&small(), 0);
        let before = ours.state_dict().unwrap();

        let mut mapped = KeyMapper::bert().map_state(theirs.state_dict().unwrap()).unwrap();
        mapped.remove("blocks.1.layernorm2.bias");
        match ours.load_state_dict(mapped) {
            Err(BertError::UnmappedKey { missing, unexpected }) => {
                assert_eq!(missing, vec!["blocks.1.layernorm2.bias".to_string()]);
                assert!(unexpected.is_empty());
            }
            other => panic!("expected UnmappedKey, got {other:?}"),
        }
        assert_eq!(ours.state_dict().unwrap(), before);
    }

    #[test]
    fn colliding_external_keys_are_refused() {
        let (ours, theirs) = pair(&small(), 0);
        let before = ours.state_dict().unwrap();

        // Already in scratch naming, so it maps onto itself and lands on
        // the same path as transformer.0.attention.project_out.weight
        let mut state = theirs.state_dict().unwrap();
        let shape = state["transformer.0.attention.project_out.weight"].shape.clone();
        let n: usize = shape.iter().product();
        state.insert(
            "blocks.0.attention.project_output.weight".into(),
            ParamData::new(shape, vec![123.0; n]),
        );

        match KeyMapper::bert().map_state(state) {
            Err(BertError::DuplicateKey { target, first, second }) => {
                assert_eq!(target, "blocks.0.attention.project_output.weight");
                assert_eq!(first, "blocks.0.attention.project_output.weight");
                assert_eq!(second, "transformer.0.attention.project_out.weight");
            }
            other => panic!("expected DuplicateKey, got {:?}", other.map(|m| m.len())),
        }
        assert_eq!(ours.state_dict().unwrap(), before);
    }

    #[test]
    fn empty_input_gives_empty_logits() {
        let counter = CountingOps::new();
        let config = small();
        let model = Bert::<TB>::new(&config, &mut ParamInit::seeded(0), counter.handle(), &Default::default()).unwrap();

        for shape in [[2, 0], [0, 5], [0, 0]] {
            let input = Tensor::<TB, 2, Int>::zeros(shape, &Default::default());
            let logits = model.forward(input, None).unwrap();
            assert_eq!(logits.dims(), [shape[0], shape[1], config.vocab_size]);
        }
        assert!(counter.snapshot().is_empty());

        let empty_rows = ids(vec![vec![], vec![]]);
        assert_eq!(model.forward(empty_rows, None).unwrap().dims(), [2, 0, 100]);
    }

    #[test]
    fn mismatched_token_types_are_an_error() {
        let (ours, _) = pair(&small(), 0);
        let result = ours.forward(ids(vec![vec![1, 2, 3]]), Some(ids(vec![vec![0, 1]])));
        assert!(matches!(result, Err(BertError::ShapeMismatch { .. })));
    }

    #[test]
    fn classify_skips_the_lm_head() {
        let config = small().with_num_classes(Some(3));
        let counter = CountingOps::new();
        let model = BertWithClassify::<TB>::new(&config, &mut ParamInit::seeded(4), counter.handle(), &Default::default())
            .unwrap();
        let input = ids(RandomSequences::seeded(1).next_batch(2, 5, 100));

        let classifs = model.classify(input.clone(), None).unwrap();
        assert_eq!(classifs.dims(), [2, 3]);
        // 6 projections per block, then the classifier; no lin / unembed
        assert_eq!(counter.calls(Primitive::Linear), 2 * 6 + 1);
        // GELU only inside the blocks
        assert_eq!(counter.calls(Primitive::Erf), 2);

        let both = model.forward(input, None).unwrap();
        assert_eq!(tensor_values(classifs).unwrap(), tensor_values(both.classifs).unwrap());
    }

    #[test]
    fn classify_of_empty_input() {
        let config = small().with_num_classes(Some(3));
        let model = BertWithClassify::<TB>::new(&config, &mut ParamInit::seeded(0), BurnOps::handle(), &Default::default())
            .unwrap();
        let none = Tensor::<TB, 2, Int>::zeros([0, 4], &Default::default());
        assert_eq!(model.classify(none, None).unwrap().dims(), [0, 3]);

        let no_positions = Tensor::<TB, 2, Int>::zeros([2, 0], &Default::default());
        assert!(matches!(model.classify(no_positions, None), Err(BertError::EmptyInput(_))));
    }

    #[test]
    fn classifier_paths_nest_the_encoder() {
        let config = small().with_num_classes(Some(2));
        let model = BertWithClassify::<TB>::new(&config, &mut ParamInit::seeded(0), BurnOps::handle(), &Default::default())
            .unwrap();
        let paths = model.parameter_paths();
        assert_eq!(paths.first().map(String::as_str), Some("bert.embed.token_embedding.weight"));
        assert_eq!(paths.last().map(String::as_str), Some("classification_head.bias"));
        assert_eq!(paths.len(), model.bert.parameter_paths().len() + 2);
    }

    // ── bert-base sized ──────────────────────────────────────────────────────
    #[test]
    #[ignore = "bert-base sized; run with --ignored"]
    fn bert_base_hello_there_matches_reference() {
        let (ours, theirs) = pair(&BertConfig::bert_base(), 0);
        // bert-base-cased ids for `[CLS] hello there [SEP]`
        let input = ids(vec![vec![101, 19082, 1175, 102]]);
        assert_tensors_close(
            ours.forward(input.clone(), None).unwrap(),
            theirs.forward(input, None).unwrap().logits,
            Tolerance::DEFAULT,
        );
    }

    #[test]
    #[ignore = "bert-base sized; run with --ignored"]
    fn bert_base_transplant_matches_reference() {
        let config = BertConfig::bert_base();
        let device = Default::default();
        let mut ours = Bert::<TB>::new(&config, &mut ParamInit::seeded(1), BurnOps::handle(), &device).unwrap();
        let theirs   = ReferenceBert::<TB>::new(&config, &mut ParamInit::seeded(0), BurnOps::handle(), &device).unwrap();

        ours.load_state_dict(KeyMapper::bert().map_state(theirs.state_dict().unwrap()).unwrap()).unwrap();
        let mut rng = RandomSequences::seeded(2);
        for _ in 0..10 {
            let input = ids(rng.next_batch(1, 20, config.vocab_size));
            assert_tensors_close(
                ours.forward(input.clone(), None).unwrap(),
                theirs.forward(input, None).unwrap().logits,
                Tolerance::PRETRAINED,
            );
        }
    }
}
