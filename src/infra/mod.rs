// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-system concerns shared by the use cases:
//
//   tokenizer_store.rs — loads an external tokenizer.json and
//                        encodes text to ids with special tokens
//
//   report_store.rs    — writes parity_report.json and appends
//                        a summary row to parity_history.csv
//
// Model configs are read through burn's Config::load, so they
// need no store of their own.

/// External tokenizer loading and encoding
pub mod tokenizer_store;

/// Parity report persistence (JSON + CSV history)
pub mod report_store;
