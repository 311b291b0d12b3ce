// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure in the core is deterministic: the same inputs
// and the same seed always fail the same way. There is no
// transient class and nothing to retry.
//
//   ShapeMismatch       — two tensors (or a parameter and its
//                         incoming value) disagree on shape
//   ToleranceViolation  — values outside rtol/atol
//   UnmappedKey         — a loaded path has no destination, or a
//                         parameter received no value
//   DuplicateKey        — two external paths rename onto one
//   DelegationDetected  — a from-scratch layer called the trusted
//                         native primitive it is meant to replace
//
// Library layers return `Result<_, BertError>`; the application
// and CLI layers wrap it in anyhow with context.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BertError {
    #[error("shape mismatch in {context}: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        context:  String,
        expected: Vec<usize>,
        actual:   Vec<usize>,
    },

    #[error(
        "{violations} of {total} values not close (rtol={rtol:e}, atol={atol:e}); \
         worst at flat index {worst_index}: expected {worst_expected}, found {worst_actual}\n\
         Expected:\n{expected_summary}\nFound:\n{actual_summary}"
    )]
    ToleranceViolation {
        rtol:             f64,
        atol:             f64,
        violations:       usize,
        total:            usize,
        worst_index:      usize,
        worst_expected:   f32,
        worst_actual:     f32,
        expected_summary: String,
        actual_summary:   String,
    },

    #[error("unmapped parameters: unexpected {unexpected:?}, missing {missing:?}")]
    UnmappedKey {
        /// Loaded paths with no parameter at that path
        unexpected: Vec<String>,
        /// Parameters left without a value
        missing:    Vec<String>,
    },

    #[error("`{first}` and `{second}` both map onto `{target}`")]
    DuplicateKey {
        target: String,
        first:  String,
        second: String,
    },

    #[error("`{primitive}` delegated to the native implementation {calls} time(s)")]
    DelegationDetected { primitive: String, calls: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("index {index} outside embedding table of {num_embeddings} rows")]
    IndexOutOfRange { index: i64, num_embeddings: usize },

    #[error("sequence length {seq_len} exceeds max_position_embeddings {max}")]
    SequenceTooLong { seq_len: usize, max: usize },

    #[error("cannot read tensor data: {0}")]
    TensorData(String),

    #[error("empty input: {0}")]
    EmptyInput(String),
}
