// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Qwen2-VL language decoder
//!
//! Two graphs: `embed_tokens` maps ids to embeddings, and the merged
//! decoder runs one forward pass over embeddings with a key/value cache.
//! The first pass is the full prompt, later passes feed one token per row.

use std::path::Path;

use ndarray::{s, Array2, Array3, Array4, ArrayD, Axis, Ix2, Ix3};
use ort::value::DynValue;
use tracing::{debug, info};

use super::onnx::Graph;
use crate::errors::{GenerationError, LoadError};
use crate::models::device::{Device, Precision};

const PAST_PREFIX: &str = "past_key_values.";
const PRESENT_PREFIX: &str = "present.";

/// Per-layer key and value tensors, `[batch, kv_heads, past, head_dim]`
#[derive(Debug, Clone)]
pub struct KvCache {
    layers: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl KvCache {
    /// Empty cache with a zero-length past axis
    pub fn empty(num_layers: usize, batch: usize, kv_heads: usize, head_dim: usize) -> Self {
        let empty = || Array4::<f32>::zeros((batch, kv_heads, 0, head_dim)).into_dyn();
        Self {
            layers: (0..num_layers).map(|_| (empty(), empty())).collect(),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Positions already held by the cache
    pub fn past_len(&self) -> usize {
        self.layers
            .first()
            .map(|(key, _)| key.shape().get(2).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Token embedding graph plus merged decoder graph
#[derive(Debug, Clone)]
pub struct LanguageDecoder {
    embed: Graph,
    decoder: Graph,
    num_layers: usize,
    kv_heads: usize,
    head_dim: usize,
}

impl LanguageDecoder {
    pub fn load(
        embed_path: &Path,
        decoder_path: &Path,
        device: Device,
        precision: Precision,
        kv_heads: usize,
        head_dim: usize,
    ) -> Result<Self, LoadError> {
        info!("Loading embed_tokens from {}", embed_path.display());
        let embed = Graph::load("embed_tokens", embed_path, device, precision)?;
        info!("Loading decoder from {}", decoder_path.display());
        let decoder = Graph::load("decoder", decoder_path, device, precision)?;

        let num_layers = decoder
            .input_names()
            .iter()
            .filter(|name| name.starts_with(PAST_PREFIX) && name.ends_with(".key"))
            .count();
        debug!("Decoder has {} cached layers", num_layers);

        Ok(Self {
            embed,
            decoder,
            num_layers,
            kv_heads,
            head_dim,
        })
    }

    pub fn empty_cache(&self, batch: usize) -> KvCache {
        KvCache::empty(self.num_layers, batch, self.kv_heads, self.head_dim)
    }

    /// Embed `[batch, seq]` ids into `[batch, seq, hidden]`
    pub fn embed(&self, input_ids: Array2<i64>) -> Result<Array3<f32>, GenerationError> {
        let ids = self.embed.int_input(input_ids)?;
        let output_name = self.embed.first_output("inputs_embeds");

        let mut session = self.embed.lock()?;
        let outputs = session
            .run(ort::inputs!["input_ids" => ids])
            .map_err(|source| self.embed.runtime_error(source))?;
        let value = outputs
            .get(output_name.as_str())
            .ok_or_else(|| self.embed.missing_output(&output_name))?;
        let embeds = self.embed.float_output(value)?;
        let shape = embeds.shape().to_vec();
        embeds
            .into_dimensionality::<Ix3>()
            .map_err(|_| GenerationError::Shape {
                stage: "embed_tokens",
                detail: format!("expected [batch, seq, hidden], got {:?}", shape),
            })
    }

    /// One decoder pass; returns the last position's logits `[batch, vocab]`
    ///
    /// `cache` is replaced by the graph's present key/values.
    pub fn forward(
        &self,
        inputs_embeds: Array3<f32>,
        attention_mask: &Array2<i64>,
        position_ids: Array3<i64>,
        cache: &mut KvCache,
    ) -> Result<Array2<f32>, GenerationError> {
        let first_pass = cache.past_len() == 0;
        let mut inputs: Vec<(String, DynValue)> = vec![
            (
                "inputs_embeds".to_string(),
                self.decoder.float_input(inputs_embeds)?,
            ),
            (
                "attention_mask".to_string(),
                self.decoder.int_input(attention_mask.clone())?,
            ),
            (
                "position_ids".to_string(),
                self.decoder.int_input(position_ids)?,
            ),
        ];
        for (layer, (key, value)) in cache.layers.iter().enumerate() {
            inputs.push((
                format!("{}{}.key", PAST_PREFIX, layer),
                self.decoder.float_input(key.clone())?,
            ));
            inputs.push((
                format!("{}{}.value", PAST_PREFIX, layer),
                self.decoder.float_input(value.clone())?,
            ));
        }
        if self.decoder.has_input("use_cache_branch") {
            let branch = ort::value::Value::from_array(ndarray::arr1(&[!first_pass]))
                .map_err(|source| self.decoder.runtime_error(source))?;
            inputs.push(("use_cache_branch".to_string(), branch.into_dyn()));
        }

        let mut session = self.decoder.lock()?;
        let outputs = session
            .run(inputs)
            .map_err(|source| self.decoder.runtime_error(source))?;

        let logits_value = outputs
            .get("logits")
            .ok_or_else(|| self.decoder.missing_output("logits"))?;
        let logits = self.decoder.float_output(logits_value)?;
        if logits.ndim() != 3 {
            return Err(GenerationError::Shape {
                stage: "decoder",
                detail: format!("expected [batch, seq, vocab] logits, got {:?}", logits.shape()),
            });
        }
        let last = logits.shape()[1] - 1;
        let last_logits = logits
            .index_axis(Axis(1), last)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .map_err(|e| GenerationError::Shape {
                stage: "decoder",
                detail: e.to_string(),
            })?;

        let mut layers = Vec::with_capacity(cache.num_layers());
        for layer in 0..cache.num_layers() {
            let key_name = format!("{}{}.key", PRESENT_PREFIX, layer);
            let value_name = format!("{}{}.value", PRESENT_PREFIX, layer);
            let key = outputs
                .get(key_name.as_str())
                .ok_or_else(|| self.decoder.missing_output(&key_name))?;
            let value = outputs
                .get(value_name.as_str())
                .ok_or_else(|| self.decoder.missing_output(&value_name))?;
            layers.push((self.decoder.float_output(key)?, self.decoder.float_output(value)?));
        }
        cache.layers = layers;

        Ok(last_logits)
    }
}

/// Index of the largest logit in each row
pub fn argmax_rows(logits: &Array2<f32>) -> Vec<u32> {
    logits
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0 as u32
        })
        .collect()
}

/// Replace embeddings at image pad positions with image features, in order
pub fn splice_image_features(
    embeds: &mut Array3<f32>,
    input_ids: &[Vec<u32>],
    image_token_id: u32,
    features: &Array2<f32>,
) -> Result<(), GenerationError> {
    let found = input_ids
        .iter()
        .flatten()
        .filter(|&&id| id == image_token_id)
        .count();
    if found != features.nrows() {
        return Err(GenerationError::ImageTokenMismatch {
            expected: features.nrows(),
            found,
        });
    }
    if features.nrows() > 0 && features.ncols() != embeds.shape()[2] {
        return Err(GenerationError::Shape {
            stage: "vision_encoder",
            detail: format!(
                "feature width {} does not match embedding width {}",
                features.ncols(),
                embeds.shape()[2]
            ),
        });
    }

    let mut next = features.rows().into_iter();
    for (b, row) in input_ids.iter().enumerate() {
        for (pos, &id) in row.iter().enumerate() {
            if id != image_token_id {
                continue;
            }
            if let Some(feature) = next.next() {
                embeds.slice_mut(s![b, pos, ..]).assign(&feature);
            }
        }
    }
    Ok(())
}
