// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Qwen2-VL model combining the vision encoder and language decoder
//!
//! Generation:
//! 1. Encode all images into merged patch features
//! 2. Embed the prompt and splice the features in at the image pad tokens
//! 3. Compute multimodal rotary positions for the prompt
//! 4. Greedy decode with a key/value cache until every row emits EOS or
//!    the token budget runs out

use std::path::PathBuf;

use ndarray::{concatenate, Array2, Axis};
use tracing::{debug, info};

use super::config::Qwen2VlConfig;
use super::decoder::{argmax_rows, splice_image_features, LanguageDecoder};
use super::encoder::VisionEncoder;
use super::rope::{decode_positions, rope_index};
use crate::errors::{GenerationError, LoadError};
use crate::inference::batch::BatchedInput;
use crate::models::device::{Device, Placement, Precision};
use crate::models::provisioner::{GeneratedSequence, VisionLanguageModel};

/// Local paths of the three ONNX graphs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qwen2VlFiles {
    pub vision_encoder: PathBuf,
    pub embed_tokens: PathBuf,
    pub decoder: PathBuf,
}

/// Token ids the generation loop needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTokens {
    pub image_token_id: u32,
    pub pad_token_id: u32,
    pub eos_token_ids: Vec<u32>,
}

/// Qwen2-VL exported to ONNX, run with ONNX Runtime
#[derive(Debug)]
pub struct Qwen2VlModel {
    encoder: VisionEncoder,
    decoder: LanguageDecoder,
    placement: Placement,
    tokens: GenerationTokens,
    merge_size: usize,
}

impl Qwen2VlModel {
    pub fn load(
        files: &Qwen2VlFiles,
        config: &Qwen2VlConfig,
        tokens: GenerationTokens,
        placement: Placement,
    ) -> Result<Self, LoadError> {
        if !config.is_supported() {
            return Err(LoadError::UnsupportedArchitecture(config.model_type.clone()));
        }

        info!("Loading Qwen2-VL graphs on {}", placement);
        let encoder = VisionEncoder::load(&files.vision_encoder, placement.device, placement.precision)?;
        let decoder = LanguageDecoder::load(
            &files.embed_tokens,
            &files.decoder,
            placement.device,
            placement.precision,
            config.num_key_value_heads,
            config.head_dim(),
        )?;
        info!("✅ Qwen2-VL model loaded");

        Ok(Self {
            encoder,
            decoder,
            placement,
            tokens,
            merge_size: config.vision_config.spatial_merge_size,
        })
    }
}

impl VisionLanguageModel for Qwen2VlModel {
    fn device(&self) -> Device {
        self.placement.device
    }

    fn precision(&self) -> Precision {
        self.placement.precision
    }

    fn generate(
        &self,
        input: &BatchedInput,
        max_new_tokens: usize,
    ) -> Result<Vec<GeneratedSequence>, GenerationError> {
        let batch = input.batch_size();
        let mut sequences: Vec<GeneratedSequence> = input.input_ids().to_vec();
        if max_new_tokens == 0 {
            return Ok(sequences);
        }

        let mut embeds = self.decoder.embed(input.ids_array())?;
        if !input.images().is_empty() {
            let features = self.encoder.encode(input.images())?;
            splice_image_features(
                &mut embeds,
                input.input_ids(),
                self.tokens.image_token_id,
                &features,
            )?;
        }

        let grids: Vec<[usize; 3]> = input.images().iter().map(|i| i.grid_thw).collect();
        let rope = rope_index(
            input.input_ids(),
            input.attention_mask(),
            &grids,
            self.tokens.image_token_id,
            self.merge_size,
        )?;

        let mut cache = self.decoder.empty_cache(batch);
        let mut mask = input.mask_array();
        let logits = self.decoder.forward(embeds, &mask, rope.position_ids, &mut cache)?;
        let first = argmax_rows(&logits);

        greedy_decode(&mut sequences, max_new_tokens, &self.tokens, first, |previous| {
            let ids = Array2::from_shape_fn((batch, 1), |(b, _)| previous[b] as i64);
            let embeds = self.decoder.embed(ids)?;
            mask = concatenate(Axis(1), &[mask.view(), Array2::ones((batch, 1)).view()])
                .map_err(|e| GenerationError::Shape {
                    stage: "decoder",
                    detail: e.to_string(),
                })?;
            let positions = decode_positions(&rope.deltas, cache.past_len());
            let logits = self.decoder.forward(embeds, &mask, positions, &mut cache)?;
            Ok(argmax_rows(&logits))
        })?;

        Ok(sequences)
    }
}

/// Token appended to each row for one step
///
/// Rows that already emitted EOS get the pad token. A row whose pick is an
/// EOS id keeps it and is marked finished.
fn select_step(finished: &mut [bool], candidates: Vec<u32>, tokens: &GenerationTokens) -> Vec<u32> {
    candidates
        .into_iter()
        .zip(finished.iter_mut())
        .map(|(candidate, done)| {
            if *done {
                return tokens.pad_token_id;
            }
            if tokens.eos_token_ids.contains(&candidate) {
                *done = true;
            }
            candidate
        })
        .collect()
}

/// Greedy loop over a source of per-row argmax tokens
///
/// `first` holds the picks from the prompt forward pass. `next` runs one
/// decode step for the tokens just appended and returns the next picks. It
/// is not called once every row has finished or the budget is spent.
/// Returns the number of tokens appended per row.
fn greedy_decode<F>(
    sequences: &mut [GeneratedSequence],
    max_new_tokens: usize,
    tokens: &GenerationTokens,
    first: Vec<u32>,
    mut next: F,
) -> Result<usize, GenerationError>
where
    F: FnMut(&[u32]) -> Result<Vec<u32>, GenerationError>,
{
    let mut finished = vec![false; sequences.len()];
    let mut candidates = first;

    for step in 0..max_new_tokens {
        if candidates.len() != sequences.len() {
            return Err(GenerationError::Shape {
                stage: "decoder",
                detail: format!(
                    "{} next tokens for {} rows",
                    candidates.len(),
                    sequences.len()
                ),
            });
        }

        let chosen = select_step(&mut finished, candidates, tokens);
        for (sequence, &token) in sequences.iter_mut().zip(&chosen) {
            sequence.push(token);
        }

        if finished.iter().all(|&done| done) {
            debug!("All rows finished after {} tokens", step + 1);
            return Ok(step + 1);
        }
        if step + 1 == max_new_tokens {
            break;
        }
        candidates = next(&chosen)?;
    }

    debug!("Token budget of {} reached", max_new_tokens);
    Ok(max_new_tokens)
}
