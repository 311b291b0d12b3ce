// ============================================================
// Layer 3 — State Dict
// ============================================================
// A framework-free snapshot of a parameter tree: dotted path →
// (shape, row-major f32 values). This is the currency passed
// between the reference tree, the KeyMapper and the
// from-scratch tree during a weight transplant.
//
// BTreeMap keeps iteration order stable, so error messages and
// reports list paths in the same order on every run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One parameter's values, detached from any backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamData {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamData {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), values.len());
        Self { shape, values }
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }
}

/// Dotted parameter path → values.
pub type StateDict = BTreeMap<String, ParamData>;

/// Total number of scalar parameters in a state dict.
pub fn parameter_count(state: &StateDict) -> usize {
    state.values().map(ParamData::numel).sum()
}
