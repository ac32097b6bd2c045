// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Inference engine
//!
//! Combines the rendered prompt and preprocessed images into one batch
//! bound to the model's device and runs a single bounded generation.
//! There is no timeout and no retry: a failed call fails the run.

use tracing::{debug, info};

use super::chat_template::RenderedPrompt;
use crate::errors::GenerationError;
use crate::models::preprocessor::Preprocessor;
use crate::models::provisioner::{GeneratedSequence, ModelHandle};
use crate::vision::preprocessing::VisionInputs;

/// Raw generation output plus what is needed to strip the echo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRun {
    /// One sequence per batch row, input echo included
    pub sequences: Vec<GeneratedSequence>,
    /// Echoed prefix length of each sequence
    pub input_lengths: Vec<usize>,
}

impl GeneratedRun {
    /// Tokens generated beyond the echo, summed over rows
    pub fn new_tokens(&self) -> usize {
        self.sequences
            .iter()
            .zip(&self.input_lengths)
            .map(|(sequence, &len)| sequence.len().saturating_sub(len))
            .sum()
    }
}

/// Runs generation for a loaded model and its preprocessor
pub struct InferenceEngine<'a> {
    handle: &'a ModelHandle,
    preprocessor: &'a Preprocessor,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(handle: &'a ModelHandle, preprocessor: &'a Preprocessor) -> Self {
        Self {
            handle,
            preprocessor,
        }
    }

    /// Batch the inputs on the model's device and generate
    ///
    /// `max_new_tokens` is a hard bound; rows may stop earlier on EOS.
    pub fn generate(
        &self,
        prompt: &RenderedPrompt,
        vision: VisionInputs,
        max_new_tokens: usize,
    ) -> Result<GeneratedRun, GenerationError> {
        let device = self.handle.device();
        let batch = self
            .preprocessor
            .batch(std::slice::from_ref(prompt), vision, device)?;
        let input_lengths = batch.input_lengths();
        info!(
            "Generating up to {} tokens for {} prompt tokens on {}",
            max_new_tokens,
            batch.seq_len(),
            device
        );

        let sequences = self.handle.generate(&batch, max_new_tokens)?;
        if sequences.len() != batch.batch_size() {
            return Err(GenerationError::BatchSizeMismatch {
                expected: batch.batch_size(),
                actual: sequences.len(),
            });
        }

        let run = GeneratedRun {
            sequences,
            input_lengths,
        };
        debug!("Generated {} new tokens", run.new_tokens());
        Ok(run)
    }
}
