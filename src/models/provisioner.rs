// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model provisioning contracts
//!
//! A provisioner turns a model identifier into a runnable model handle and
//! the preprocessor paired with it. Loading is fatal on failure and happens
//! once per run; nothing is cached between runs beyond what the registry
//! keeps on disk.

use std::fmt;

use tracing::info;

use super::device::{Device, Precision};
use super::preprocessor::Preprocessor;
use crate::errors::{GenerationError, LoadError};
use crate::inference::batch::BatchedInput;

/// Token ids of one generated row: the full input row followed by new tokens
pub type GeneratedSequence = Vec<u32>;

/// A loaded vision-language model able to run bounded generation
#[cfg_attr(test, mockall::automock)]
pub trait VisionLanguageModel: Send {
    /// Device the model's tensors live on
    fn device(&self) -> Device;

    /// Precision the model was loaded in
    fn precision(&self) -> Precision;

    /// Greedy generation of at most `max_new_tokens` per row
    ///
    /// Every returned sequence starts with its (padded) input row. A row
    /// stops early once it emits an end-of-sequence token, which is kept.
    fn generate(
        &self,
        input: &BatchedInput,
        max_new_tokens: usize,
    ) -> Result<Vec<GeneratedSequence>, GenerationError>;
}

/// Loaded model plus the identifier it was resolved from
pub struct ModelHandle {
    model_id: String,
    model: Box<dyn VisionLanguageModel>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .field("device", &self.model.device())
            .field("precision", &self.model.precision())
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    pub fn new(model_id: impl Into<String>, model: Box<dyn VisionLanguageModel>) -> Self {
        Self {
            model_id: model_id.into(),
            model,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn device(&self) -> Device {
        self.model.device()
    }

    pub fn precision(&self) -> Precision {
        self.model.precision()
    }

    pub fn generate(
        &self,
        input: &BatchedInput,
        max_new_tokens: usize,
    ) -> Result<Vec<GeneratedSequence>, GenerationError> {
        self.model.generate(input, max_new_tokens)
    }
}

/// Model handle and preprocessor known to come from the same identifier
#[derive(Debug)]
pub struct LoadedModel {
    pub handle: ModelHandle,
    pub preprocessor: Preprocessor,
}

impl LoadedModel {
    pub fn new(handle: ModelHandle, preprocessor: Preprocessor) -> Result<Self, LoadError> {
        if handle.model_id() != preprocessor.model_id() {
            return Err(LoadError::IdentifierMismatch {
                model: handle.model_id().to_string(),
                preprocessor: preprocessor.model_id().to_string(),
            });
        }
        Ok(Self {
            handle,
            preprocessor,
        })
    }
}

/// Resolves a model identifier to a runnable model and its preprocessor
#[cfg_attr(test, mockall::automock)]
pub trait ModelProvisioner {
    fn load(&self, model_id: &str) -> Result<(ModelHandle, Preprocessor), LoadError>;
}

/// Load `model_id` and check that both halves belong to it
pub fn load_paired<P: ModelProvisioner + ?Sized>(
    provisioner: &P,
    model_id: &str,
) -> Result<LoadedModel, LoadError> {
    let (handle, preprocessor) = provisioner.load(model_id)?;
    let loaded = LoadedModel::new(handle, preprocessor)?;
    info!(
        "Loaded {} on {} ({})",
        model_id,
        loaded.handle.device(),
        loaded.handle.precision()
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stub::{char_preprocessor, STUB_MODEL_ID};

    fn mock_model() -> Box<MockVisionLanguageModel> {
        let mut model = MockVisionLanguageModel::new();
        model.expect_device().return_const(Device::Cpu);
        model.expect_precision().return_const(Precision::F32);
        Box::new(model)
    }

    #[test]
    fn test_handle_reports_placement() {
        let handle = ModelHandle::new(STUB_MODEL_ID, mock_model());
        assert_eq!(handle.model_id(), STUB_MODEL_ID);
        assert_eq!(handle.device(), Device::Cpu);
        assert_eq!(handle.precision(), Precision::F32);
    }

    #[test]
    fn test_loaded_model_accepts_matching_pair() {
        let handle = ModelHandle::new(STUB_MODEL_ID, mock_model());
        let loaded = LoadedModel::new(handle, char_preprocessor(STUB_MODEL_ID)).unwrap();
        assert_eq!(loaded.preprocessor.model_id(), STUB_MODEL_ID);
    }

    #[test]
    fn test_loaded_model_rejects_mismatched_pair() {
        let handle = ModelHandle::new("model-a", mock_model());
        let result = LoadedModel::new(handle, char_preprocessor("model-b"));
        match result {
            Err(LoadError::IdentifierMismatch {
                model,
                preprocessor,
            }) => {
                assert_eq!(model, "model-a");
                assert_eq!(preprocessor, "model-b");
            }
            other => panic!("expected identifier mismatch, got {:?}", other),
        }
    }
}
