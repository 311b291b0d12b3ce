// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here. Two BERT trees are built from the
// same seeded draws:
//
//   reference.rs — the oracle: trusted composites (layer_norm,
//                  embedding, gelu) reached through the native
//                  handle, external parameter names
//
//   layers.rs    — LayerNorm, Embedding, GELU from building blocks
//   attention.rs — attention pattern and multi-head self-attention
//   block.rs     — feed-forward MLP and post-norm encoder block
//   model.rs     — embedding front-end, Bert stack, LM head and
//                  the classification wrapper
//
// Support:
//
//   native.rs    — the native-ops handle and its call counter
//   init.rs      — seeded parameter draws shared by both trees
//   params.rs    — parameter walking, state dicts, atomic loads
//   config.rs    — BertConfig
//   harness.rs   — closeness and delegation checks
//
// Reference: Devlin et al. (2019) BERT

pub mod native;
pub mod init;
pub mod params;
pub mod config;
pub mod harness;

pub mod layers;
pub mod attention;
pub mod block;
pub mod model;

/// Oracle tree the from-scratch layers are checked against
pub mod reference;
