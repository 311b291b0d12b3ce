// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and functions that define what the system
// IS, independent of any tensor framework:
//
//   error.rs       — the error taxonomy shared by every layer
//   state_dict.rs  — backend-free parameter snapshots
//   key_mapper.rs  — reference → from-scratch parameter names
//   tolerance.rs   — shape and closeness checks on plain slices
//
// Rules for this layer:
//   - NO burn types allowed here
//   - NO file I/O
//   - Only structs, enums, traits and pure functions
//
// Everything here is unit-testable without building a model.

/// Error taxonomy (thiserror)
pub mod error;

/// Parameter snapshots keyed by dotted path
pub mod state_dict;

/// Ordered rewrite rules for parameter paths
pub mod key_mapper;

/// Numeric closeness and compact tensor summaries
pub mod tolerance;
