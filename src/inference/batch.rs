// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Batched model input
//!
//! Rows are left padded to a common length so every row's last prompt
//! token sits at the same position and generation appends in lockstep.

use ndarray::Array2;

use crate::errors::GenerationError;
use crate::models::device::Device;
use crate::vision::preprocessing::ImageTensors;

/// Token ids, masks and image tensors for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct BatchedInput {
    input_ids: Vec<Vec<u32>>,
    attention_mask: Vec<Vec<i64>>,
    images: Vec<ImageTensors>,
    device: Device,
}

impl BatchedInput {
    /// Left pad `rows` with `pad_token_id` and bind them to `device`
    pub fn new(
        rows: Vec<Vec<u32>>,
        pad_token_id: u32,
        images: Vec<ImageTensors>,
        device: Device,
    ) -> Result<Self, GenerationError> {
        if rows.is_empty() {
            return Err(GenerationError::Model("batch has no rows".to_string()));
        }

        let seq_len = rows.iter().map(Vec::len).max().unwrap_or(0);
        if seq_len == 0 {
            return Err(GenerationError::Tokenize(
                "prompt encoded to zero tokens".to_string(),
            ));
        }

        let mut input_ids = Vec::with_capacity(rows.len());
        let mut attention_mask = Vec::with_capacity(rows.len());
        for row in rows {
            let pad = seq_len - row.len();
            let mut ids = vec![pad_token_id; pad];
            ids.extend_from_slice(&row);
            let mut mask = vec![0i64; pad];
            mask.resize(seq_len, 1);
            input_ids.push(ids);
            attention_mask.push(mask);
        }

        Ok(Self {
            input_ids,
            attention_mask,
            images,
            device,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.len()
    }

    /// Padded length shared by all rows
    pub fn seq_len(&self) -> usize {
        self.input_ids.first().map(Vec::len).unwrap_or(0)
    }

    pub fn input_ids(&self) -> &[Vec<u32>] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[Vec<i64>] {
        &self.attention_mask
    }

    pub fn images(&self) -> &[ImageTensors] {
        &self.images
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of echoed tokens at the head of each generated row
    pub fn input_lengths(&self) -> Vec<usize> {
        self.input_ids.iter().map(Vec::len).collect()
    }

    /// Input ids as an `[batch, seq]` i64 tensor
    pub fn ids_array(&self) -> Array2<i64> {
        Array2::from_shape_fn((self.batch_size(), self.seq_len()), |(b, s)| {
            self.input_ids[b][s] as i64
        })
    }

    /// Attention mask as an `[batch, seq]` i64 tensor
    pub fn mask_array(&self) -> Array2<i64> {
        Array2::from_shape_fn((self.batch_size(), self.seq_len()), |(b, s)| {
            self.attention_mask[b][s]
        })
    }
}
