// ============================================================
// Layer 5 — Equivalence Harness
// ============================================================
// The burn-facing half of the parity harness:
//
//   1. shape equality       — hard failure with both shapes
//   2. numeric closeness    — |student - oracle| <= atol + rtol·|oracle|
//   3. no delegation        — a CountingOps handle saw zero calls to
//                             layer_norm / embedding / gelu
//
// The arithmetic lives in domain::tolerance so it can be tested
// on plain slices; this file only moves tensors off the device.
// `check_*` return errors for the application layer, `assert_*`
// panic with the same message for tests.

use burn::prelude::*;

use crate::domain::{
    error::BertError,
    tolerance::{self, TensorSnapshot, Tolerance},
};
use crate::ml::native::{CountingOps, Primitive};
use crate::ml::params::tensor_values;

pub fn snapshot<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<TensorSnapshot, BertError> {
    let shape = tensor.dims().to_vec();
    Ok(TensorSnapshot::new(shape, tensor_values(tensor)?))
}

pub fn check_tensors_close<B: Backend, const D: usize>(
    student: Tensor<B, D>,
    oracle:  Tensor<B, D>,
    tol:     Tolerance,
) -> Result<(), BertError> {
    // Shapes first: pulling a mismatched tensor off the device is wasted work
    tolerance::check_shape("harness", &student.dims(), &oracle.dims())?;
    tolerance::check_close(&snapshot(student)?, &snapshot(oracle)?, tol)
}

/// Panicking form of [`check_tensors_close`] for tests.
#[cfg(test)]
#[track_caller]
pub fn assert_tensors_close<B: Backend, const D: usize>(
    student: Tensor<B, D>,
    oracle:  Tensor<B, D>,
    tol:     Tolerance,
) {
    if let Err(e) = check_tensors_close(student, oracle, tol) {
        panic!("{e}");
    }
}

/// Outcome of one student/oracle comparison, kept for reports.
#[derive(Debug)]
pub struct Comparison {
    /// `None` when the shapes differ
    pub max_abs_diff: Option<f32>,
    pub violation:    Option<BertError>,
}

impl Comparison {
    pub fn passed(&self) -> bool {
        self.violation.is_none()
    }
}

/// Like [`check_tensors_close`], but records the largest
/// difference alongside the verdict instead of stopping at it.
pub fn compare<B: Backend, const D: usize>(
    student: Tensor<B, D>,
    oracle:  Tensor<B, D>,
    tol:     Tolerance,
) -> Result<Comparison, BertError> {
    let (student, oracle) = (snapshot(student)?, snapshot(oracle)?);
    if let Err(e) = tolerance::check_shape("harness", &student.shape, &oracle.shape) {
        return Ok(Comparison { max_abs_diff: None, violation: Some(e) });
    }
    Ok(Comparison {
        max_abs_diff: Some(tolerance::max_abs_diff(&student, &oracle)),
        violation:    tolerance::check_close(&student, &oracle, tol).err(),
    })
}

/// Fails if any trusted composite ran through `counter`.
pub fn check_no_delegation(counter: &CountingOps) -> Result<(), BertError> {
    for primitive in Primitive::REIMPLEMENTED {
        let calls = counter.calls(primitive);
        if calls > 0 {
            return Err(BertError::DelegationDetected {
                primitive: primitive.to_string(),
                calls,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[track_caller]
pub fn assert_no_delegation(counter: &CountingOps) {
    if let Err(e) = check_no_delegation(counter) {
        panic!("{e}");
    }
}
