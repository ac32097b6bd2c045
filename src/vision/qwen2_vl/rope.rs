// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Multimodal rotary position ids
//!
//! Qwen2-VL assigns every token a (temporal, height, width) position.
//! Text tokens use the same value in all three axes. Image tokens are laid
//! out on the merged patch grid, offset from the text position before the
//! image. Padding gets position 1 and does not advance the counter.

use ndarray::Array3;

use crate::errors::GenerationError;

/// Prefill positions and the per-row offset used for decode steps
#[derive(Debug, Clone, PartialEq)]
pub struct RopeIndex {
    /// `[3, batch, seq]`
    pub position_ids: Array3<i64>,
    /// Next position minus padded sequence length, per row
    pub deltas: Vec<i64>,
}

/// Compute prefill positions for left padded rows
///
/// `image_grids` holds the `[t, h, w]` patch grid of every image in order
/// of appearance across rows.
pub fn rope_index(
    input_ids: &[Vec<u32>],
    attention_mask: &[Vec<i64>],
    image_grids: &[[usize; 3]],
    image_token_id: u32,
    merge_size: usize,
) -> Result<RopeIndex, GenerationError> {
    let batch = input_ids.len();
    let seq_len = input_ids.first().map(Vec::len).unwrap_or(0);
    let mut position_ids = Array3::<i64>::ones((3, batch, seq_len));
    let mut deltas = Vec::with_capacity(batch);
    let mut grids = image_grids.iter();

    for (b, (ids, mask)) in input_ids.iter().zip(attention_mask).enumerate() {
        let mut next: i64 = 0;
        let mut s = 0;
        while s < seq_len {
            if mask[s] == 0 {
                s += 1;
                continue;
            }

            if ids[s] != image_token_id {
                for axis in 0..3 {
                    position_ids[[axis, b, s]] = next;
                }
                next += 1;
                s += 1;
                continue;
            }

            let [t, h, w] = *grids.next().ok_or(GenerationError::ImageTokenMismatch {
                expected: 0,
                found: 1,
            })?;
            let (gh, gw) = (h / merge_size, w / merge_size);
            let run = t * gh * gw;
            let available = ids[s..].iter().take_while(|&&id| id == image_token_id).count();
            if available < run {
                return Err(GenerationError::ImageTokenMismatch {
                    expected: run,
                    found: available,
                });
            }

            let mut k = s;
            for ti in 0..t {
                for hi in 0..gh {
                    for wi in 0..gw {
                        position_ids[[0, b, k]] = next + ti as i64;
                        position_ids[[1, b, k]] = next + hi as i64;
                        position_ids[[2, b, k]] = next + wi as i64;
                        k += 1;
                    }
                }
            }
            next += t.max(gh).max(gw) as i64;
            s += run;
        }
        deltas.push(next - seq_len as i64);
    }

    Ok(RopeIndex {
        position_ids,
        deltas,
    })
}

/// Positions of the single token fed at a decode step
pub fn decode_positions(deltas: &[i64], past_len: usize) -> Array3<i64> {
    Array3::from_shape_fn((3, deltas.len(), 1), |(_, b, _)| past_len as i64 + deltas[b])
}
