// ============================================================
// Layer 5 — Seeded Parameter Initialisation
// ============================================================
// Parity between the from-scratch tree and the reference tree
// depends on both drawing the same random numbers in the same
// order. Rather than seeding a global generator and hoping
// nothing else touches it, every constructor takes a ParamInit
// explicitly: same seed + same construction order = same
// parameters, and two parity checks never share RNG state.
//
// Schemes (PyTorch defaults, which the checkpoint layout assumes):
//   Linear     weight, bias ~ U(-1/√d_in, 1/√d_in)
//   Embedding  weight       ~ N(0, 1)
//   LayerNorm  weight = 1, bias = 0   (no draws)

use burn::{
    module::Param,
    nn::{Linear, LinearConfig},
    prelude::*,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::domain::state_dict::{ParamData, StateDict};

pub struct ParamInit {
    rng: StdRng,
}

impl ParamInit {
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// `U(-bound, bound)`; a zero bound yields zeros.
    pub fn uniform<B: Backend, const D: usize>(
        &mut self,
        shape:  [usize; D],
        bound:  f32,
        device: &B::Device,
    ) -> Tensor<B, D> {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = if bound > 0.0 {
            (0..n).map(|_| self.rng.gen_range(-bound..bound)).collect()
        } else {
            vec![0.0; n]
        };
        Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape(shape)
    }

    /// `N(0, std²)`.
    pub fn normal<B: Backend, const D: usize>(
        &mut self,
        shape:  [usize; D],
        std:    f32,
        device: &B::Device,
    ) -> Tensor<B, D> {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n)
            .map(|_| {
                let z: f32 = self.rng.sample(StandardNormal);
                z * std
            })
            .collect();
        Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape(shape)
    }

    /// A `d_in -> d_out` projection with weight stored `[d_in, d_out]`.
    pub fn linear<B: Backend>(&mut self, d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
        let bound = 1.0 / (d_in as f32).sqrt();
        let weight = self.uniform::<B, 2>([d_in, d_out], bound, device);
        let bias   = self.uniform::<B, 1>([d_out], bound, device);

        let mut linear = LinearConfig::new(d_in, d_out).init(device);
        linear.weight = Param::from_tensor(weight);
        linear.bias   = Some(Param::from_tensor(bias));
        linear
    }

    /// Embedding table `[num_embeddings, dim]`.
    pub fn embedding_table<B: Backend>(
        &mut self,
        num_embeddings: usize,
        dim:            usize,
        device:         &B::Device,
    ) -> Tensor<B, 2> {
        self.normal([num_embeddings, dim], 1.0, device)
    }

    /// Copy of `state` with `N(0, scale²)` noise on every value.
    ///
    /// Stands in for externally trained weights: unlike a fresh
    /// init, LayerNorm scales and shifts stop being ones and zeros.
    pub fn perturb_state(&mut self, state: &StateDict, scale: f32) -> StateDict {
        state
            .iter()
            .map(|(path, param)| {
                let values = param
                    .values
                    .iter()
                    .map(|v| {
                        let z: f32 = self.rng.sample(StandardNormal);
                        v + z * scale
                    })
                    .collect();
                (path.clone(), ParamData::new(param.shape.clone(), values))
            })
            .collect()
    }
}
