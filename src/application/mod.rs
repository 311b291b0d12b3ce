// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one goal at a time.
//
// Rules for this layer:
//   - No tensor math or layer code here (that's Layer 5)
//   - No printing here (that's Layer 1)
//   - File access goes through Layer 6
//   - Only workflow coordination

// Student vs oracle parity runs
pub mod parity_use_case;

// External → from-scratch parameter name lookup
pub mod keymap_use_case;
