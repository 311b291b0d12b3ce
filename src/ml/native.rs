// ============================================================
// Layer 5 — Native Primitive Handle
// ============================================================
// Every layer reaches burn's built-in math through a handle
// instead of calling it directly. The handle exposes two kinds
// of entry point:
//
//   building blocks   — linear, softmax, gather_rows, row_mean, erf
//                       (the from-scratch layers are allowed these)
//   trusted composites — layer_norm, embedding, gelu
//                       (burn's own versions of what the from-scratch
//                        layers reimplement; only the reference tree
//                        may call them)
//
// BurnOps forwards straight to burn. CountingOps does the same
// but records every call, so a test can hand it to a model and
// then prove the trusted composites were never touched while
// the building blocks were (i.e. the handle really was in use).
//
// Layers store an OpsHandle, a backend-free enum, inside burn's
// `Ignored` wrapper: it rides along with the module tree without
// being a parameter, and survives `valid()` onto the inner
// backend unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use burn::{
    nn::Linear,
    prelude::*,
    tensor::activation,
};

// ─── Primitive ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Primitive {
    Linear,
    Softmax,
    GatherRows,
    RowMean,
    Erf,
    LayerNorm,
    Embedding,
    Gelu,
}

impl Primitive {
    /// Trusted composites the from-scratch layers must never call.
    pub const REIMPLEMENTED: [Primitive; 3] =
        [Primitive::LayerNorm, Primitive::Embedding, Primitive::Gelu];

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Linear     => "linear",
            Primitive::Softmax    => "softmax",
            Primitive::GatherRows => "gather_rows",
            Primitive::RowMean    => "row_mean",
            Primitive::Erf        => "erf",
            Primitive::LayerNorm  => "layer_norm",
            Primitive::Embedding  => "embedding",
            Primitive::Gelu       => "gelu",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── NativeOps ───────────────────────────────────────────────────────────────
/// burn's built-in math, behind an injectable handle.
///
/// Ranks are fixed so the trait stays object safe; callers
/// reshape to and from these.
pub trait NativeOps<B: Backend>: Send + Sync + fmt::Debug {
    /// `x @ W + b` over the last axis.
    fn linear(&self, layer: &Linear<B>, x: Tensor<B, 3>) -> Tensor<B, 3>;

    /// Softmax over the last axis.
    fn softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Rows of `table` at `indices`: `[n] -> [n, cols]`.
    fn gather_rows(&self, table: Tensor<B, 2>, indices: Tensor<B, 1, Int>) -> Tensor<B, 2>;

    /// Mean of each row: `[rows, n] -> [rows, 1]`.
    fn row_mean(&self, x: Tensor<B, 2>) -> Tensor<B, 2>;

    fn erf(&self, x: Tensor<B, 1>) -> Tensor<B, 1>;

    /// Trusted layer norm over the last axis of `[rows, n]`.
    fn layer_norm(
        &self,
        x:      Tensor<B, 2>,
        weight: Tensor<B, 1>,
        bias:   Tensor<B, 1>,
        eps:    f64,
    ) -> Tensor<B, 2>;

    /// Trusted embedding lookup: `[batch, seq] -> [batch, seq, dim]`.
    fn embedding(&self, table: Tensor<B, 2>, indices: Tensor<B, 2, Int>) -> Tensor<B, 3>;

    /// Trusted GELU.
    fn gelu(&self, x: Tensor<B, 1>) -> Tensor<B, 1>;
}

// ─── OpsHandle ───────────────────────────────────────────────────────────────
/// The handle every layer holds.
#[derive(Debug, Clone, Default)]
pub enum OpsHandle {
    #[default]
    Burn,
    Counting(CountingOps),
}

impl OpsHandle {
    fn native<B: Backend>(&self) -> &dyn NativeOps<B> {
        match self {
            OpsHandle::Burn            => &BurnOps,
            OpsHandle::Counting(count) => count,
        }
    }
}

impl<B: Backend> NativeOps<B> for OpsHandle {
    fn linear(&self, layer: &Linear<B>, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.native().linear(layer, x)
    }

    fn softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.native().softmax(x)
    }

    fn gather_rows(&self, table: Tensor<B, 2>, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.native().gather_rows(table, indices)
    }

    fn row_mean(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.native().row_mean(x)
    }

    fn erf(&self, x: Tensor<B, 1>) -> Tensor<B, 1> {
        self.native().erf(x)
    }

    fn layer_norm(
        &self,
        x:      Tensor<B, 2>,
        weight: Tensor<B, 1>,
        bias:   Tensor<B, 1>,
        eps:    f64,
    ) -> Tensor<B, 2> {
        self.native().layer_norm(x, weight, bias, eps)
    }

    fn embedding(&self, table: Tensor<B, 2>, indices: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.native().embedding(table, indices)
    }

    fn gelu(&self, x: Tensor<B, 1>) -> Tensor<B, 1> {
        self.native().gelu(x)
    }
}

// ─── BurnOps ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
pub struct BurnOps;

impl BurnOps {
    pub fn handle() -> OpsHandle {
        OpsHandle::Burn
    }
}

impl<B: Backend> NativeOps<B> for BurnOps {
    fn linear(&self, layer: &Linear<B>, x: Tensor<B, 3>) -> Tensor<B, 3> {
        layer.forward(x)
    }

    fn softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        activation::softmax(x, 3)
    }

    fn gather_rows(&self, table: Tensor<B, 2>, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        table.select(0, indices)
    }

    fn row_mean(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.mean_dim(1)
    }

    fn erf(&self, x: Tensor<B, 1>) -> Tensor<B, 1> {
        x.erf()
    }

    fn layer_norm(
        &self,
        x:      Tensor<B, 2>,
        weight: Tensor<B, 1>,
        bias:   Tensor<B, 1>,
        eps:    f64,
    ) -> Tensor<B, 2> {
        // Same arithmetic as burn::nn::LayerNorm::forward
        let (var, mean) = x.clone().var_mean_bias(1);
        x.sub(mean)
            .div(var.add_scalar(eps).sqrt())
            .mul(weight.unsqueeze())
            .add(bias.unsqueeze())
    }

    fn embedding(&self, table: Tensor<B, 2>, indices: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        burn::tensor::module::embedding(table, indices)
    }

    fn gelu(&self, x: Tensor<B, 1>) -> Tensor<B, 1> {
        activation::gelu(x)
    }
}

// ─── CountingOps ─────────────────────────────────────────────────────────────
/// BurnOps that remembers how often each primitive ran.
///
/// Clones share one set of counters, so a test can keep a clone
/// and read the counts after the model has consumed the other.
#[derive(Debug, Clone, Default)]
pub struct CountingOps {
    calls: Arc<Mutex<BTreeMap<Primitive, usize>>>,
}

impl CountingOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> OpsHandle {
        OpsHandle::Counting(self.clone())
    }

    pub fn calls(&self, primitive: Primitive) -> usize {
        self.counts().get(&primitive).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<Primitive, usize> {
        self.counts().clone()
    }

    #[cfg(test)]
    pub fn reset(&self) {
        self.counts().clear();
    }

    fn record(&self, primitive: Primitive) {
        *self.counts().entry(primitive).or_insert(0) += 1;
    }

    // A panic while counting leaves the map consistent, so a
    // poisoned lock still holds every call recorded so far.
    fn counts(&self) -> MutexGuard<'_, BTreeMap<Primitive, usize>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: Backend> NativeOps<B> for CountingOps {
    fn linear(&self, layer: &Linear<B>, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.record(Primitive::Linear);
        BurnOps.linear(layer, x)
    }

    fn softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.record(Primitive::Softmax);
        BurnOps.softmax(x)
    }

    fn gather_rows(&self, table: Tensor<B, 2>, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.record(Primitive::GatherRows);
        BurnOps.gather_rows(table, indices)
    }

    fn row_mean(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.record(Primitive::RowMean);
        BurnOps.row_mean(x)
    }

    fn erf(&self, x: Tensor<B, 1>) -> Tensor<B, 1> {
        self.record(Primitive::Erf);
        BurnOps.erf(x)
    }

    fn layer_norm(
        &self,
        x:      Tensor<B, 2>,
        weight: Tensor<B, 1>,
        bias:   Tensor<B, 1>,
        eps:    f64,
    ) -> Tensor<B, 2> {
        self.record(Primitive::LayerNorm);
        BurnOps.layer_norm(x, weight, bias, eps)
    }

    fn embedding(&self, table: Tensor<B, 2>, indices: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.record(Primitive::Embedding);
        BurnOps.embedding(table, indices)
    }

    fn gelu(&self, x: Tensor<B, 1>) -> Tensor<B, 1> {
        self.record(Primitive::Gelu);
        BurnOps.gelu(x)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn counting_ops_records_per_primitive() {
        let device = Default::default();
        let counter = CountingOps::new();
        let ops = counter.handle();

        let x = Tensor::<TB, 1>::from_floats([0.0, 1.0, -1.0], &device);
        let _ = ops.erf(x.clone());
        let _ = ops.erf(x.clone());
        let _ = ops.gelu(x);

        assert_eq!(counter.calls(Primitive::Erf), 2);
        assert_eq!(counter.calls(Primitive::Gelu), 1);
        assert_eq!(counter.calls(Primitive::LayerNorm), 0);

        counter.reset();
        assert!(counter.snapshot().is_empty());
    }

    #[test]
    fn counts_survive_a_poisoned_lock() {
        let device = Default::default();
        let counter = CountingOps::new();
        let ops = counter.handle();
        let _ = ops.erf(Tensor::<TB, 1>::zeros([2], &device));

        let shared = counter.clone();
        let panicked = std::thread::spawn(move || {
            let _guard = shared.calls.lock().unwrap();
            panic!("poison the counter");
        })
        .join();
        assert!(panicked.is_err());
        assert!(counter.calls.is_poisoned());

        let _ = ops.erf(Tensor::<TB, 1>::zeros([2], &device));
        assert_eq!(counter.calls(Primitive::Erf), 2);
        assert_eq!(counter.snapshot().get(&Primitive::Erf), Some(&2));
        counter.reset();
        assert_eq!(counter.calls(Primitive::Erf), 0);
    }

    #[test]
    fn burn_handle_records_nothing() {
        let device = Default::default();
        let counter = CountingOps::new();
        let ops = BurnOps::handle();
        let _ = NativeOps::<TB>::gelu(&ops, Tensor::zeros([3], &device));
        assert!(counter.snapshot().is_empty());
        assert!(matches!(ops, OpsHandle::Burn));
    }

    #[test]
    fn row_mean_keeps_the_reduced_axis() {
        let device = Default::default();
        let x = Tensor::<TB, 2>::from_floats([[1.0, 3.0], [2.0, 4.0]], &device);
        let mean = NativeOps::<TB>::row_mean(&BurnOps, x);
        assert_eq!(mean.dims(), [2, 1]);
        let values = mean.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn primitive_names_are_stable() {
        let names: Vec<&str> = Primitive::REIMPLEMENTED.iter().map(Primitive::name).collect();
        assert_eq!(names, ["layer_norm", "embedding", "gelu"]);
    }
}
