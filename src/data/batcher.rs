// ============================================================
// Layer 4 — Token Id Batcher
// ============================================================
// Stacks equal-length id sequences into one [batch, seq_len]
// Int tensor on the target device:
//
//   [s1_t1, ..., s1_tS, s2_t1, ..., sN_tS] + shape [N, S] → TensorData
//
// The shape travels with the data instead of through a reshape,
// so zero rows or zero-length rows give a [0, S] or [N, 0]
// tensor. Ids widen to i64; no u32 id can wrap negative.
//
// Nothing is padded here. Ragged input is an error, because a
// silently padded row would change the logits being compared.
//
// Reference: Burn Book §4 (Batcher)

use burn::{prelude::*, tensor::TensorData};

use crate::domain::error::BertError;

#[derive(Clone, Debug)]
pub struct IdBatcher<B: Backend> {
    /// The device to create tensors on
    pub device: B::Device,
}

impl<B: Backend> IdBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// `rows` → `[rows.len(), seq_len]`.
    pub fn batch(&self, rows: &[Vec<u32>]) -> Result<Tensor<B, 2, Int>, BertError> {
        let seq_len = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != seq_len) {
            return Err(BertError::ShapeMismatch {
                context:  format!("batch row {i}"),
                expected: vec![seq_len],
                actual:   vec![row.len()],
            });
        }

        let flat: Vec<i64> = rows.iter().flat_map(|r| r.iter().map(|&id| i64::from(id))).collect();
        let data = TensorData::new(flat, [rows.len(), seq_len]);
        Ok(Tensor::<B, 2, Int>::from_data(data, &self.device))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn stacks_rows_in_order() {
        let batcher = IdBatcher::<TB>::new(Default::default());
        let t = batcher.batch(&[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        assert_eq!(t.dims(), [2, 3]);
        let values: Vec<i64> = t.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let batcher = IdBatcher::<TB>::new(Default::default());
        match batcher.batch(&[vec![1, 2, 3], vec![4, 5]]) {
            Err(BertError::ShapeMismatch { context, expected, actual }) => {
                assert_eq!(context, "batch row 1");
                assert_eq!(expected, vec![3]);
                assert_eq!(actual, vec![2]);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn no_rows_is_an_empty_batch() {
        let batcher = IdBatcher::<TB>::new(Default::default());
        assert_eq!(batcher.batch(&[]).unwrap().dims(), [0, 0]);
    }

    #[test]
    fn empty_rows_keep_the_batch_axis() {
        let batcher = IdBatcher::<TB>::new(Default::default());
        assert_eq!(batcher.batch(&[vec![], vec![]]).unwrap().dims(), [2, 0]);
    }

    #[test]
    fn large_ids_do_not_wrap() {
        let batcher = IdBatcher::<TB>::new(Default::default());
        let t = batcher.batch(&[vec![u32::MAX, 1 << 31]]).unwrap();
        let values: Vec<i64> = t.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(values, vec![i64::from(u32::MAX), 1 << 31]);
    }
}
