// ============================================================
// Layer 4 — Input Pipeline
// ============================================================
// Everything that turns ids into model input:
//
//   tokenizer ids / RandomSequences   → Vec<Vec<u32>>
//       │
//       ▼
//   IdBatcher                         → Tensor<B, 2, Int>  [batch, seq]
//
// Tokenisation itself lives in infra::tokenizer_store; this
// layer only sees ids.

/// Seeded random id sequences
pub mod sequences;

/// Stacks id rows into an Int tensor
pub mod batcher;
