// ============================================================
// Layer 3 — Numeric Closeness
// ============================================================
// The comparison half of the equivalence harness, kept free of
// any tensor framework so it can be tested on plain slices.
//
// Closeness rule (same as numpy/torch allclose):
//
//     |student - oracle| <= atol + rtol * |oracle|
//
// checked for every element. NaN on either side is never close.
//
// Failure messages carry a compact summary of each tensor
// (shape, min/max/mean/std and the first few values) rather
// than a full dump — a 10x20x28996 logit tensor is not
// something anyone wants in a test log.

use serde::{Deserialize, Serialize};

use crate::domain::error::BertError;

/// Number of leading values printed in a summary
const PEEK_VALUES: usize = 6;

// ─── Tolerance ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    /// Single layers and seeded end-to-end runs.
    pub const DEFAULT: Tolerance = Tolerance { rtol: 1e-4, atol: 1e-5 };

    /// Transplanted pretrained weights: error accumulates across
    /// every block, so the absolute floor is relaxed.
    pub const PRETRAINED: Tolerance = Tolerance { rtol: 1e-4, atol: 1e-4 };

    pub fn is_close(&self, actual: f32, expected: f32) -> bool {
        let (a, e) = (actual as f64, expected as f64);
        // NaN fails the comparison below on its own
        (a - e).abs() <= self.atol + self.rtol * e.abs()
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ─── TensorSnapshot ──────────────────────────────────────────────────────────
/// A tensor pulled off its device: shape plus row-major values.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSnapshot {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorSnapshot {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    /// Compact one-line description: shape, range, moments, head.
    pub fn summary(&self) -> String {
        let n = self.values.len();
        if n == 0 {
            return format!("shape={:?} (empty)", self.shape);
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0f64;
        for &v in &self.values {
            let v = v as f64;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        let mean = sum / n as f64;
        let var  = self.values.iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>() / n as f64;

        let head: Vec<String> = self.values.iter()
            .take(PEEK_VALUES)
            .map(|v| format!("{v:.5}"))
            .collect();
        let ellipsis = if n > PEEK_VALUES { ", ..." } else { "" };

        format!(
            "shape={:?} min={:.5} max={:.5} mean={:.5} std={:.5} values=[{}{}]",
            self.shape, min, max, mean, var.sqrt(), head.join(", "), ellipsis,
        )
    }
}

// ─── Assertions ──────────────────────────────────────────────────────────────
/// Shape equality. `context` names what is being compared.
pub fn check_shape(context: &str, actual: &[usize], expected: &[usize]) -> Result<(), BertError> {
    if actual != expected {
        return Err(BertError::ShapeMismatch {
            context:  context.to_string(),
            expected: expected.to_vec(),
            actual:   actual.to_vec(),
        });
    }
    Ok(())
}

/// Shape equality followed by elementwise closeness.
pub fn check_close(
    actual:   &TensorSnapshot,
    expected: &TensorSnapshot,
    tol:      Tolerance,
) -> Result<(), BertError> {
    check_shape("harness", &actual.shape, &expected.shape)?;

    let mut violations = 0usize;
    let mut worst: Option<(usize, f64)> = None;

    for (i, (&a, &e)) in actual.values.iter().zip(&expected.values).enumerate() {
        if tol.is_close(a, e) {
            continue;
        }
        violations += 1;
        // Rank violations by how far past the allowed band they are;
        // NaN outranks everything.
        let excess = {
            let d = (a as f64 - e as f64).abs() - (tol.atol + tol.rtol * (e as f64).abs());
            if d.is_nan() { f64::INFINITY } else { d }
        };
        if worst.map_or(true, |(_, w)| excess > w) {
            worst = Some((i, excess));
        }
    }

    match worst {
        None => Ok(()),
        Some((worst_index, _)) => Err(BertError::ToleranceViolation {
            rtol:             tol.rtol,
            atol:             tol.atol,
            violations,
            total:            expected.values.len(),
            worst_index,
            worst_expected:   expected.values[worst_index],
            worst_actual:     actual.values[worst_index],
            expected_summary: expected.summary(),
            actual_summary:   actual.summary(),
        }),
    }
}

/// Largest absolute elementwise difference (shapes assumed equal).
pub fn max_abs_diff(actual: &TensorSnapshot, expected: &TensorSnapshot) -> f32 {
    actual.values.iter()
        .zip(&expected.values)
        .map(|(a, e)| (a - e).abs())
        .fold(0.0f32, f32::max)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn snap(shape: &[usize], values: &[f32]) -> TensorSnapshot {
        TensorSnapshot::new(shape.to_vec(), values.to_vec())
    }

    #[test]
    fn identical_tensors_are_close() {
        let a = snap(&[2, 2], &[1.0, -2.0, 3.5, 0.0]);
        assert!(check_close(&a, &a.clone(), Tolerance::DEFAULT).is_ok());
    }

    #[test]
    fn shape_mismatch_is_reported_before_values() {
        let a = snap(&[4],    &[1.0, 2.0, 3.0, 4.0]);
        let b = snap(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        match check_close(&a, &b, Tolerance::DEFAULT) {
            Err(BertError::ShapeMismatch { expected, actual, .. }) => {
                assert_eq!(expected, vec![2, 2]);
                assert_eq!(actual, vec![4]);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn relative_term_scales_with_expected_magnitude() {
        let tol = Tolerance::DEFAULT;
        // 1000 * 1e-4 = 0.1 of slack
        assert!(tol.is_close(1000.05, 1000.0));
        assert!(!tol.is_close(1000.2, 1000.0));
        // near zero only atol applies
        assert!(tol.is_close(5e-6, 0.0));
        assert!(!tol.is_close(5e-5, 0.0));
    }

    #[test]
    fn pretrained_preset_relaxes_only_atol() {
        assert_eq!(Tolerance::PRETRAINED.rtol, Tolerance::DEFAULT.rtol);
        assert!(Tolerance::PRETRAINED.is_close(5e-5, 0.0));
    }

    #[test]
    fn nan_is_never_close() {
        let a = snap(&[2], &[f32::NAN, 1.0]);
        let b = snap(&[2], &[0.0, 1.0]);
        match check_close(&a, &b, Tolerance::DEFAULT) {
            Err(BertError::ToleranceViolation { violations, worst_index, .. }) => {
                assert_eq!(violations, 1);
                assert_eq!(worst_index, 0);
            }
            other => panic!("expected ToleranceViolation, got {other:?}"),
        }
    }

    #[test]
    fn violation_points_at_worst_element() {
        let a = snap(&[3], &[0.0, 0.5, 0.1]);
        let b = snap(&[3], &[0.0, 0.0, 0.0]);
        match check_close(&a, &b, Tolerance::DEFAULT) {
            Err(BertError::ToleranceViolation { violations, worst_index, total, .. }) => {
                assert_eq!(violations, 2);
                assert_eq!(worst_index, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected ToleranceViolation, got {other:?}"),
        }
    }

    #[test]
    fn summary_is_compact() {
        let values: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let s = snap(&[10, 100], &values).summary();
        assert!(s.starts_with("shape=[10, 100]"));
        assert!(s.contains("min=0.00000"));
        assert!(s.contains("max=999.00000"));
        assert!(s.ends_with(", ...]"));
        assert!(s.len() < 200);
    }

    #[test]
    fn max_abs_diff_finds_largest_gap() {
        let a = snap(&[3], &[1.0, 2.0, 3.0]);
        let b = snap(&[3], &[1.0, 2.5, 2.9]);
        assert!((max_abs_diff(&a, &b) - 0.5).abs() < 1e-6);
    }
}
